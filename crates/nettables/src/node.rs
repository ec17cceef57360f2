//! What clients and servers have in common.

use std::sync::Arc;

use nettables_store::TableBackend;

use crate::table::NetworkTable;

/// A node holding a replicated table.
pub trait NetworkTableNode: Send + Sync {
    /// The store behind this node's tables.
    fn backend(&self) -> Arc<dyn TableBackend>;

    /// Whether the node is currently talking to its peers.
    fn is_connected(&self) -> bool;

    /// Table rooted at `path`.
    fn table(&self, path: &str) -> NetworkTable {
        NetworkTable::new(self.backend(), path)
    }

    /// The root table.
    fn root(&self) -> NetworkTable {
        self.table("")
    }
}
