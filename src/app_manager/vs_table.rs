/*
    Copyright 2024 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! In-memory table of virtual-server configurations.

use std::collections::HashMap;
use std::sync::RwLock;

use super::service_key::ServiceKey;
use super::virtual_server::VirtualServerConfig;

/**
  Table of virtual-server configurations indexed by [ServiceKey], then by
  virtual-server name.

  At most one entry exists per (key, name) pair, and removing the last name
  under a key removes the key. Readers always receive copies, never
  references into the table.
*/
#[derive(Default)]
pub struct VirtualServers {
    table: RwLock<HashMap<ServiceKey, HashMap<String, VirtualServerConfig>>>,
}

impl VirtualServers {
    /// Return a new, empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry at (`key`, `vs_name`).
    pub fn assign(&self, key: ServiceKey, vs_name: &str, config: VirtualServerConfig) {
        let mut table = self.table.write().unwrap();
        table
            .entry(key)
            .or_default()
            .insert(vs_name.to_owned(), config);
    }

    /// Copy of the entry at (`key`, `vs_name`), if present.
    pub fn get(&self, key: &ServiceKey, vs_name: &str) -> Option<VirtualServerConfig> {
        let table = self.table.read().unwrap();
        table.get(key).and_then(|m| m.get(vs_name)).cloned()
    }

    /// Copies of all entries under `key`, by virtual-server name.
    pub fn get_all(&self, key: &ServiceKey) -> Option<HashMap<String, VirtualServerConfig>> {
        let table = self.table.read().unwrap();
        table.get(key).cloned()
    }

    /// Remove the entry at (`key`, `vs_name`). True if something was removed.
    pub fn delete(&self, key: &ServiceKey, vs_name: &str) -> bool {
        let mut table = self.table.write().unwrap();
        let Some(by_name) = table.get_mut(key) else {
            return false;
        };
        let removed = by_name.remove(vs_name).is_some();
        if by_name.is_empty() {
            table.remove(key);
        }
        removed
    }

    /// Remove any entry named `vs_name` under a key other than `keep`.
    ///
    /// A source that changes its backend reference moves its entry to a new
    /// key within a single sync; this clears the stale twin.
    pub fn delete_name_elsewhere(&self, keep: &ServiceKey, vs_name: &str) -> usize {
        let mut table = self.table.write().unwrap();
        let mut removed = 0;
        table.retain(|key, by_name| {
            if key != keep && by_name.remove(vs_name).is_some() {
                removed += 1;
            }
            !by_name.is_empty()
        });
        removed
    }

    /// Remove every entry whose key lives in `namespace`. True if any did.
    pub fn delete_namespace(&self, namespace: &str) -> bool {
        let mut table = self.table.write().unwrap();
        let before = table.len();
        table.retain(|key, _| key.namespace != namespace);
        table.len() != before
    }

    /// Number of (key, name) pairs in the table.
    pub fn count(&self) -> usize {
        let table = self.table.read().unwrap();
        table.values().map(HashMap::len).sum()
    }

    /// Number of virtual-server names under `key`.
    pub fn count_of(&self, key: &ServiceKey) -> usize {
        let table = self.table.read().unwrap();
        table.get(key).map(HashMap::len).unwrap_or(0)
    }

    /// All keys currently present.
    pub fn keys(&self) -> Vec<ServiceKey> {
        let table = self.table.read().unwrap();
        table.keys().cloned().collect()
    }

    /// Virtual-server names bound to `key`.
    pub fn names_for(&self, key: &ServiceKey) -> Vec<String> {
        let table = self.table.read().unwrap();
        table
            .get(key)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys in `namespace` that hold an entry named `vs_name`.
    ///
    /// Lets callers locate the entries of a source object by identity alone,
    /// without the source still being parseable.
    pub fn keys_with_name(&self, namespace: &str, vs_name: &str) -> Vec<ServiceKey> {
        let table = self.table.read().unwrap();
        table
            .iter()
            .filter(|(key, by_name)| {
                key.namespace == namespace && by_name.contains_key(vs_name)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Copies of all entries in canonical (partition, virtualServerName) order.
    pub fn snapshot_sorted(&self) -> Vec<VirtualServerConfig> {
        let table = self.table.read().unwrap();
        let mut entries: Vec<VirtualServerConfig> = table
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        drop(table);
        entries.sort_by_key(VirtualServerConfig::sort_key);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_manager::virtual_server::{Backend, Frontend, VirtualServer};

    fn key(name: &str, port: i32) -> ServiceKey {
        ServiceKey {
            service_name: name.to_owned(),
            service_port: port,
            namespace: "default".to_owned(),
        }
    }

    fn config(partition: &str, vs_name: &str) -> VirtualServerConfig {
        VirtualServerConfig {
            virtual_server: VirtualServer {
                backend: Backend::default(),
                frontend: Frontend {
                    virtual_server_name: Some(vs_name.to_owned()),
                    partition: partition.to_owned(),
                    ..Default::default()
                },
            },
            meta_data: Default::default(),
        }
    }

    #[test]
    fn assign_overwrites_in_place() {
        let table = VirtualServers::new();
        table.assign(key("foo", 80), "default_foomap", config("a", "default_foomap"));
        table.assign(key("foo", 80), "default_foomap", config("b", "default_foomap"));
        assert_eq!(1, table.count());
        assert_eq!(1, table.count_of(&key("foo", 80)));
        let entry = table.get(&key("foo", 80), "default_foomap").unwrap();
        assert_eq!("b", entry.virtual_server.frontend.partition);
    }

    #[test]
    fn deleting_the_last_name_removes_the_key() {
        let table = VirtualServers::new();
        table.assign(key("foo", 80), "a", config("p", "a"));
        table.assign(key("foo", 80), "b", config("p", "b"));
        assert_eq!(2, table.count_of(&key("foo", 80)));
        assert!(table.delete(&key("foo", 80), "a"));
        assert_eq!(1, table.count_of(&key("foo", 80)));
        assert!(table.delete(&key("foo", 80), "b"));
        assert_eq!(0, table.count_of(&key("foo", 80)));
        assert!(table.keys().is_empty());
        assert!(!table.delete(&key("foo", 80), "b"));
    }

    #[test]
    fn delete_name_elsewhere_clears_moved_entries() {
        let table = VirtualServers::new();
        table.assign(key("foo", 80), "default_foomap", config("p", "default_foomap"));
        table.assign(key("foo", 8080), "default_foomap", config("p", "default_foomap"));
        assert_eq!(1, table.delete_name_elsewhere(&key("foo", 8080), "default_foomap"));
        assert_eq!(0, table.count_of(&key("foo", 80)));
        assert_eq!(1, table.count_of(&key("foo", 8080)));
    }

    #[test]
    fn keys_with_name_finds_entries_by_identity() {
        let table = VirtualServers::new();
        table.assign(key("foo", 80), "default_foomap", config("p", "default_foomap"));
        table.assign(key("foo", 8080), "default_other", config("p", "default_other"));
        let mut found = table.keys_with_name("default", "default_foomap");
        found.sort();
        assert_eq!(vec![key("foo", 80)], found);
        assert!(table.keys_with_name("other", "default_foomap").is_empty());
        assert!(table.keys_with_name("default", "default_gone").is_empty());
    }

    #[test]
    fn count_sums_over_keys() {
        let table = VirtualServers::new();
        table.assign(key("foo", 80), "a", config("p", "a"));
        table.assign(key("foo", 8080), "b", config("p", "b"));
        table.assign(key("bar", 80), "c", config("p", "c"));
        assert_eq!(3, table.count());
        let total: usize = table.keys().iter().map(|k| table.count_of(k)).sum();
        assert_eq!(table.count(), total);
    }

    #[test]
    fn snapshot_is_sorted_by_partition_then_name() {
        let table = VirtualServers::new();
        table.assign(key("a", 1), "z", config("q", "z"));
        table.assign(key("b", 2), "a", config("q", "a"));
        table.assign(key("c", 3), "m", config("p", "m"));
        let names: Vec<(String, String)> = table
            .snapshot_sorted()
            .iter()
            .map(VirtualServerConfig::sort_key)
            .collect();
        assert_eq!(
            vec![
                ("p".to_owned(), "m".to_owned()),
                ("q".to_owned(), "a".to_owned()),
                ("q".to_owned(), "z".to_owned())
            ],
            names
        );
    }
}
