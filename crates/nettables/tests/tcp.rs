//! Nodes talking over loopback TCP, and persistence across server restarts.

use std::time::Duration;

use anyhow::{Context, Result};

use nettables::{ClientConfig, NetworkTableClient, NetworkTableNode, NetworkTableServer, ServerConfig};
use nettables_testkit::fixtures::wait_for;

fn server_config() -> ServerConfig {
    ServerConfig::default()
        .with_bind_addr("127.0.0.1")
        .with_port(0)
        .with_write_interval(Duration::from_millis(20))
        .with_persist_interval(Duration::from_millis(50))
}

fn client_config(port: u16) -> ClientConfig {
    ClientConfig::default()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_write_interval(Duration::from_millis(20))
        .with_keep_alive_interval(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_round_trip_over_tcp() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let server = NetworkTableServer::bind_tcp(server_config()).await?;
    let port = server.local_addr().context("server bound")?.port();

    let client = NetworkTableClient::connect(client_config(port)).await;
    wait_for("handshake", || client.is_connected()).await?;
    wait_for("server counts client", || server.connection_count() == 1).await?;

    client.table("arm").put_number_array("angles", vec![0.5, 1.25]);
    wait_for("server sees write", || {
        server.table("arm").get_number_array("angles") == Some(vec![0.5, 1.25])
    })
    .await?;

    server.table("arm").put_boolean("homed", true);
    wait_for("client sees write", || client.table("arm").get_boolean("homed") == Some(true))
        .await?;

    client.stop().await;
    wait_for("server drops client", || server.connection_count() == 0).await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_client_waits_for_late_server() -> Result<()> {
    let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = probe.local_addr()?.port();
    drop(probe);

    let client = NetworkTableClient::connect(client_config(port)).await;
    assert!(!client.is_connected());
    client.root().put_string("status", "waiting");

    let server = NetworkTableServer::bind_tcp(server_config().with_port(port)).await?;
    wait_for("client connects", || client.is_connected()).await?;
    wait_for("offline write delivered", || {
        server.root().get_string("status").as_deref() == Some("waiting")
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_persistent_entries_survive_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("persistent.db");

    {
        let server = NetworkTableServer::bind_tcp(server_config().with_persistence(&db)).await?;
        let port = server.local_addr().context("server bound")?.port();
        let client = NetworkTableClient::connect(client_config(port)).await;
        wait_for("handshake", || client.is_connected()).await?;

        client.table("prefs").put_number("kP", 0.05);
        wait_for("server sees write", || server.table("prefs").contains_key("kP")).await?;
        assert!(server.table("prefs").set_persistent("kP"));
        server.table("prefs").put_number("volatile", 1.0);
        server.stop().await?;
    }

    let server = NetworkTableServer::new(server_config().with_persistence(&db)).await?;
    let prefs = server.table("prefs");
    assert_eq!(prefs.get_number("kP"), Some(0.05));
    assert!(prefs.is_persistent("kP"));
    assert!(!prefs.contains_key("volatile"));
    Ok(())
}
