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

//! Snapshot of schedulable node addresses.

use k8s_openapi::api::core::v1::Node;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/**
  Maintains the sorted, de-duplicated list of addresses of schedulable
  nodes.

  The first list processed only seeds the cache unless the tracker was
  created with `initial_state` set; afterwards every material change is
  reported to the caller so that all pool members can be recomputed.
*/
pub struct NodeTracker {
    use_node_internal: bool,
    initial_state: AtomicBool,
    old_nodes: RwLock<Vec<String>>,
}

impl NodeTracker {
    /// Return a new instance with an empty address cache.
    pub fn new(use_node_internal: bool, initial_state: bool) -> Self {
        Self {
            use_node_internal,
            initial_state: AtomicBool::new(initial_state),
            old_nodes: RwLock::new(Vec::new()),
        }
    }

    /**
      Addresses of all schedulable nodes, in node order.

      Unschedulable nodes are dropped; for each remaining node the first
      address of the configured type (`InternalIP` or `ExternalIP`) is
      selected. Nodes without such an address contribute nothing.
    */
    pub fn get_node_addresses(&self, nodes: &[Node]) -> Vec<String> {
        let wanted_type = if self.use_node_internal {
            "InternalIP"
        } else {
            "ExternalIP"
        };
        nodes
            .iter()
            .filter(|node| {
                !node
                    .spec
                    .as_ref()
                    .and_then(|s| s.unschedulable)
                    .unwrap_or(false)
            })
            .filter_map(|node| {
                node.status
                    .as_ref()
                    .and_then(|s| s.addresses.as_ref())
                    .and_then(|addrs| addrs.iter().find(|a| a.type_ == wanted_type))
                    .map(|a| a.address.clone())
            })
            .collect()
    }

    /**
      Process a fresh node list. Returns the new snapshot when it differs
      from the cached one and the tracker has left its initial state,
      signalling that a full resync is due.
    */
    pub fn process(&self, nodes: &[Node]) -> Option<Vec<String>> {
        let mut addresses = self.get_node_addresses(nodes);
        addresses.sort();
        addresses.dedup();
        if !self.initial_state.swap(true, Ordering::SeqCst) {
            *self.old_nodes.write().unwrap() = addresses;
            return None;
        }
        let mut cached = self.old_nodes.write().unwrap();
        if *cached != addresses {
            *cached = addresses.clone();
            Some(addresses)
        } else {
            None
        }
    }

    /// Copy of the cached address list.
    pub fn snapshot(&self) -> Vec<String> {
        self.old_nodes.read().unwrap().clone()
    }

    /// True once a node list has been processed (or the tracker was seeded).
    pub fn has_initial_state(&self) -> bool {
        self.initial_state.load(Ordering::SeqCst)
    }
}
