//! Node configuration.

use std::path::PathBuf;
use std::time::Duration;

use nettables_core::TypeManager;
use nettables_sync::{WriteManagerConfig, DEFAULT_PORT};

/// Configuration for a [`NetworkTableClient`](crate::NetworkTableClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Period between flushes of pending writes.
    pub write_interval: Duration,
    /// Period between keep-alives, which double as the reconnect trigger.
    pub keep_alive_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Value types this client accepts.
    pub type_manager: TypeManager,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            write_interval: Duration::from_millis(1000),
            keep_alive_interval: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(2),
            type_manager: TypeManager::new(),
        }
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_type_manager(mut self, types: TypeManager) -> Self {
        self.type_manager = types;
        self
    }

    pub(crate) fn write_manager(&self) -> WriteManagerConfig {
        WriteManagerConfig {
            write_interval: self.write_interval,
            keep_alive_interval: Some(self.keep_alive_interval),
        }
    }
}

/// Configuration for a [`NetworkTableServer`](crate::NetworkTableServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Port to listen on.
    pub port: u16,
    /// Period between broadcasts of pending changes.
    pub write_interval: Duration,
    /// SQLite file for persistent entries. `None` keeps them in memory only.
    pub persistence_path: Option<PathBuf>,
    /// Period between saves of changed persistent entries.
    pub persist_interval: Duration,
    /// Value types this server accepts.
    pub type_manager: TypeManager,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            write_interval: Duration::from_millis(100),
            persistence_path: None,
            persist_interval: Duration::from_secs(1),
            type_manager: TypeManager::new(),
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_path = Some(path.into());
        self
    }

    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    pub fn with_type_manager(mut self, types: TypeManager) -> Self {
        self.type_manager = types;
        self
    }

    /// Keep-alives go to every client once per second.
    pub(crate) fn write_manager(&self) -> WriteManagerConfig {
        WriteManagerConfig {
            write_interval: self.write_interval,
            keep_alive_interval: Some(Duration::from_secs(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = ClientConfig::default();
        assert_eq!(client.port, 1735);
        assert_eq!(client.write_interval, Duration::from_millis(1000));

        let server = ServerConfig::default();
        assert_eq!(server.bind_addr, "0.0.0.0");
        assert!(server.persistence_path.is_none());
    }

    #[test]
    fn test_builders() {
        let client = ClientConfig::default()
            .with_host("10.0.0.2")
            .with_port(5800)
            .with_write_interval(Duration::from_millis(50));
        assert_eq!(client.host, "10.0.0.2");
        assert_eq!(client.port, 5800);
        assert_eq!(
            client.write_manager().keep_alive_interval,
            Some(Duration::from_millis(1000))
        );

        let server = ServerConfig::default().with_persistence("/tmp/nt.db");
        assert_eq!(server.persistence_path, Some(PathBuf::from("/tmp/nt.db")));
    }
}
