//! Key/value view of a store, scoped to a `/` separated path.

use std::collections::BTreeSet;
use std::sync::Arc;

use nettables_core::{EntryFlags, Value};
use nettables_store::{EntryListener, EntryNotification, ListenerHandle, NotifyFlags, TableBackend};
use tracing::debug;

/// Path separator between a table and its keys.
pub const PATH_SEPARATOR: char = '/';

/// A table of entries under a common path prefix.
///
/// Writes that conflict with an entry's established type return `false` and
/// leave the entry untouched.
#[derive(Clone)]
pub struct NetworkTable {
    backend: Arc<dyn TableBackend>,
    path: String,
}

impl NetworkTable {
    /// Table rooted at `path`. Leading, trailing and doubled separators are
    /// ignored, so `"/a//b/"` and `"a/b"` name the same table.
    pub fn new(backend: Arc<dyn TableBackend>, path: &str) -> Self {
        Self {
            backend,
            path: normalize(path),
        }
    }

    /// Full path, `""` for the root table.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entry name for `key` in this table.
    pub fn entry_name(&self, key: &str) -> String {
        format!("{}{}{}", self.path, PATH_SEPARATOR, key)
    }

    pub fn sub_table(&self, name: &str) -> NetworkTable {
        NetworkTable::new(
            Arc::clone(&self.backend),
            &format!("{}{}{}", self.path, PATH_SEPARATOR, name),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    pub fn put_value(&self, key: &str, value: impl Into<Value>) -> bool {
        let name = self.entry_name(key);
        match self.backend.put_value(&name, value.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(name = %name, error = %e, "put rejected");
                false
            }
        }
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.backend.value(&self.entry_name(key))
    }

    pub fn put_number(&self, key: &str, value: f64) -> bool {
        self.put_value(key, value)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get_value(key)?.as_f64()
    }

    pub fn put_boolean(&self, key: &str, value: bool) -> bool {
        self.put_value(key, value)
    }

    pub fn get_boolean(&self, key: &str) -> Option<bool> {
        self.get_value(key)?.as_bool()
    }

    pub fn put_string(&self, key: &str, value: impl Into<String>) -> bool {
        self.put_value(key, Value::String(value.into()))
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_value(key)?.as_str().map(str::to_owned)
    }

    pub fn put_boolean_array(&self, key: &str, value: Vec<bool>) -> bool {
        self.put_value(key, value)
    }

    pub fn get_boolean_array(&self, key: &str) -> Option<Vec<bool>> {
        self.get_value(key)?.as_bool_array().map(<[bool]>::to_vec)
    }

    pub fn put_number_array(&self, key: &str, value: Vec<f64>) -> bool {
        self.put_value(key, value)
    }

    pub fn get_number_array(&self, key: &str) -> Option<Vec<f64>> {
        self.get_value(key)?.as_f64_array().map(<[f64]>::to_vec)
    }

    pub fn put_string_array(&self, key: &str, value: Vec<String>) -> bool {
        self.put_value(key, value)
    }

    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        self.get_value(key)?.as_string_array().map(<[String]>::to_vec)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.backend.contains(&self.entry_name(key))
    }

    /// Keys held directly in this table, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.children()
            .into_iter()
            .filter_map(|(key, nested)| (!nested).then_some(key))
            .collect()
    }

    /// Names of the tables nested directly under this one, sorted.
    pub fn sub_tables(&self) -> Vec<String> {
        self.children()
            .into_iter()
            .filter_map(|(key, nested)| nested.then_some(key))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn children(&self) -> Vec<(String, bool)> {
        let prefix = self.entry_name("");
        self.backend
            .keys()
            .into_iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(&prefix)?;
                Some(match rest.split_once(PATH_SEPARATOR) {
                    Some((table, _)) => (table.to_owned(), true),
                    None => (rest.to_owned(), false),
                })
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Flags
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark an entry persistent. Returns `false` if it doesn't exist.
    pub fn set_persistent(&self, key: &str) -> bool {
        self.update_flags(key, |flags| flags.insert(EntryFlags::PERSISTENT))
    }

    pub fn clear_persistent(&self, key: &str) -> bool {
        self.update_flags(key, |flags| flags.remove(EntryFlags::PERSISTENT))
    }

    pub fn is_persistent(&self, key: &str) -> bool {
        self.backend
            .flags(&self.entry_name(key))
            .is_some_and(|f| f.contains(EntryFlags::PERSISTENT))
    }

    fn update_flags(&self, key: &str, change: impl FnOnce(&mut EntryFlags)) -> bool {
        let name = self.entry_name(key);
        let Some(mut flags) = self.backend.flags(&name) else {
            return false;
        };
        change(&mut flags);
        self.backend.set_flags(&name, flags)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    /// Listen to every entry at or below this table.
    ///
    /// The callback gets the key relative to this table.
    pub fn add_entry_listener(
        &self,
        immediate: bool,
        listener: impl Fn(&str, &Value, NotifyFlags) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let prefix = self.entry_name("");
        let strip = prefix.clone();
        let callback: EntryListener = Arc::new(move |n: &EntryNotification| {
            if let Some(key) = n.name.strip_prefix(&strip) {
                listener(key, &n.value, n.flags);
            }
        });
        self.backend.add_entry_listener(&prefix, immediate, callback)
    }

    pub fn remove_entry_listener(&self, handle: ListenerHandle) -> bool {
        self.backend.remove_entry_listener(handle)
    }
}

impl std::fmt::Debug for NetworkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTable")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn normalize(path: &str) -> String {
    path.split(PATH_SEPARATOR)
        .filter(|part| !part.is_empty())
        .fold(String::new(), |mut out, part| {
            out.push(PATH_SEPARATOR);
            out.push_str(part);
            out
        })
}
