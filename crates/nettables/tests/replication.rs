//! End-to-end replication between a server and its clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use nettables::sync::transport::memory::MemoryStreamFactory;
use nettables::sync::verify_convergence;
use nettables::{ConnectionEvent, NetworkTableClient, NetworkTableNode, Value};
use nettables_testkit::fixtures::{fast_client_config, wait_for, MemoryCluster};

const FAST: Duration = Duration::from_millis(20);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn new_client(factory: &MemoryStreamFactory) -> NetworkTableClient {
    NetworkTableClient::new(Arc::new(factory.clone()), &fast_client_config())
}

async fn connected_client(factory: &MemoryStreamFactory) -> Result<NetworkTableClient> {
    let client = new_client(factory);
    client.reconnect().await;
    wait_for("handshake", || client.is_connected()).await?;
    Ok(client)
}

#[tokio::test]
async fn test_client_write_reaches_server_and_peers() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let a = connected_client(&factory).await?;
    let b = connected_client(&factory).await?;

    assert!(a.table("drive").put_number("speed", 1.5));
    wait_for("server sees write", || {
        server.table("drive").get_number("speed") == Some(1.5)
    })
    .await?;
    wait_for("peer sees write", || b.table("drive").get_number("speed") == Some(1.5)).await?;

    // Once the id is known, later writes travel as updates.
    wait_for("writer learns id", || {
        a.store().entry("/drive/speed").is_some_and(|e| e.id().is_known())
    })
    .await?;
    assert!(a.table("drive").put_number("speed", 3.0));
    wait_for("peer sees update", || b.table("drive").get_number("speed") == Some(3.0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_server_write_reaches_clients() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    server.root().put_string("mode", "teleop");

    let client = connected_client(&factory).await?;
    assert_eq!(client.root().get_string("mode").as_deref(), Some("teleop"));

    server.root().put_string("mode", "auto");
    wait_for("client sees update", || {
        client.root().get_string("mode").as_deref() == Some("auto")
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_offline_writes_offered_after_handshake() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let client = new_client(&factory);
    client.root().put_boolean("offline", true);
    assert!(!client.is_connected());

    client.reconnect().await;
    wait_for("server sees offline write", || {
        server.root().get_boolean("offline") == Some(true)
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_server_assignment_wins_over_local() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    server.root().put_number("shared", 2.0);

    let client = new_client(&factory);
    client.root().put_number("shared", 1.0);
    client.reconnect().await;
    wait_for("handshake", || client.is_connected()).await?;

    let entry = client.store().entry("/shared").expect("entry kept");
    assert_eq!(entry.value(), &Value::Double(2.0));
    assert_eq!(Some(entry.id()), server.store().entry("/shared").map(|e| e.id()));
    tokio::time::sleep(FAST * 5).await;
    assert_eq!(server.root().get_number("shared"), Some(2.0));
    Ok(())
}

#[tokio::test]
async fn test_type_conflict_is_rejected_locally() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let client = connected_client(&factory).await?;

    assert!(client.root().put_number("x", 1.0));
    assert!(!client.root().put_string("x", "one"));
    wait_for("server sees number", || server.root().get_number("x") == Some(1.0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_client_heals_after_connection_loss() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let client = new_client(&factory);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.add_connection_listener(move |e| sink.lock().push(*e));

    client.reconnect().await;
    wait_for("first handshake", || client.is_connected()).await?;
    client.root().put_number("before", 1.0);
    wait_for("write delivered", || server.root().contains_key("before")).await?;

    factory.set_available(false);
    server.close_connections().await;
    wait_for("client notices", || !client.is_connected()).await?;

    client.root().put_number("during", 2.0);
    factory.set_available(true);
    wait_for("client reconnects", || client.is_connected()).await?;
    wait_for("offline write delivered", || {
        server.root().get_number("during") == Some(2.0)
    })
    .await?;

    assert_eq!(
        *events.lock(),
        vec![
            ConnectionEvent::Connected,
            ConnectionEvent::Disconnected,
            ConnectionEvent::Connected
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_stopped_client_stays_down() -> Result<()> {
    init_tracing();
    let MemoryCluster { server: _server, factory } = MemoryCluster::start().await?;
    let client = connected_client(&factory).await?;

    client.stop().await;
    assert!(!client.is_connected());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_clients_converge() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let a = connected_client(&factory).await?;
    let b = connected_client(&factory).await?;

    for i in 0..20 {
        a.table("a").put_number(&format!("k{}", i), i as f64);
        b.table("b").put_string(&format!("k{}", i), format!("v{}", i));
    }
    b.table("b").put_number_array("pose", vec![1.0, 2.0, 3.0]);

    wait_for("all nodes agree", || {
        let reference = server.store().snapshot();
        reference.len() == 41
            && verify_convergence(&a.store().snapshot(), &reference).is_converged()
            && verify_convergence(&b.store().snapshot(), &reference).is_converged()
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_listeners_see_remote_changes() -> Result<()> {
    init_tracing();
    let MemoryCluster { server, factory } = MemoryCluster::start().await?;
    let client = connected_client(&factory).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client
        .table("telemetry")
        .add_entry_listener(false, move |key, value, _| {
            sink.lock().push((key.to_owned(), value.clone()));
        });

    server.table("telemetry").put_number("voltage", 12.5);
    wait_for("listener fires", || !seen.lock().is_empty()).await?;
    assert_eq!(
        seen.lock()[0],
        ("voltage".to_string(), Value::Double(12.5))
    );
    Ok(())
}
