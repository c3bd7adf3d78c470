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

//! The application manager: aggregates ConfigMap, Ingress, Service,
//! Endpoints and Node state into a table of virtual-server configurations
//! and publishes the active entries to the configuration writer.

pub mod config_map_parser;
pub mod informer_set;
pub mod ingress_adapter;
pub mod node_tracker;
pub mod resolver;
pub mod service_key;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod virtual_server;
pub mod vs_table;

use crossbeam_skiplist::SkipMap;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use kube::Api;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config_writer::{ConfigWriter, SendOutcome};

use self::config_map_parser::parse_virtual_server_config;
use self::informer_set::InformerSet;
use self::ingress_adapter::create_vs_config_from_ingress;
use self::node_tracker::NodeTracker;
use self::service_key::{format_config_map_vs_name, format_ingress_vs_name, ServiceKey};
use self::virtual_server::VirtualServerConfig;
use self::vs_table::VirtualServers;

/// Label selector that marks a `ConfigMap` as a virtual-server definition.
pub const DEFAULT_CONFIG_MAP_LABEL: &str = "f5type=virtual-server";

/// Construction options for [Manager].
pub struct Params {
    /// Client used to spawn watchers; `None` leaves event delivery to the
    /// caller (tests drive the entry points directly).
    pub kube_client: Option<kube::Client>,
    /// Sink that receives the generated configuration document.
    pub config_writer: Arc<dyn ConfigWriter>,
    /// True resolves pool members from node addresses, false from endpoints.
    pub is_node_port: bool,
    /// Select `InternalIP` node addresses instead of `ExternalIP`.
    pub use_node_internal: bool,
    /// Permit emission on the first node update, even if nothing changed yet.
    pub initial_state: bool,
    /// Watch `Ingress` resources in addition to `ConfigMap`s.
    pub manage_ingress: bool,
    /// Label selector for virtual-server `ConfigMap`s.
    pub config_map_label: String,
    /// How long to wait for the writer to confirm a section.
    pub write_timeout: Duration,
}

/// Conflicting namespace registrations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryConflict {
    /// An all-namespaces registration already covers every namespace.
    #[error("all namespaces are already being watched")]
    AllNamespacesActive,
    /// Named namespaces are registered, excluding broader registrations.
    #[error("explicit namespaces are already being watched")]
    ExplicitNamespacesActive,
    /// A label selector drives the namespace set, excluding explicit ones.
    #[error("a namespace label selector is already registered")]
    LabelSelectorActive,
    /// The namespace to remove was never registered.
    #[error("namespace {0} is not being watched")]
    NotWatched(String),
}

/// How the set of watched namespaces is determined.
enum WatchMode {
    /// Nothing registered yet.
    Inactive,
    /// Fixed namespace list; the empty name stands for all namespaces.
    Explicit,
    /// Namespaces join and leave by matching a label selector.
    Labeled(String),
}

struct Registry {
    mode: WatchMode,
    informers: HashMap<String, Arc<InformerSet>>,
}

/// True when every comma-separated `key=value` (or bare `key`) term matches.
fn match_label_selector(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector.split(',').filter(|t| !t.is_empty()).all(|term| {
        let term = term.trim();
        match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|l| l.get(key))
                .map(|v| v == value)
                .unwrap_or(false),
            None => labels.map(|l| l.contains_key(term)).unwrap_or(false),
        }
    })
}

/**
  Event-driven aggregator of virtual-server configurations.

  Informer callbacks arrive on arbitrary worker threads. Processing of one
  [ServiceKey] is serialised through a per-key mutex while distinct keys
  proceed in parallel; the table, the node snapshot and the output document
  each have their own narrower lock. Lock order is always registry lock,
  then key mutex, then output lock.
*/
pub struct Manager {
    vservers: VirtualServers,
    vs_mutexes: SkipMap<ServiceKey, Arc<Mutex<()>>>,
    registry: Mutex<Registry>,
    namespaces: informer_set::ResourceStore<Namespace>,
    node_tracker: NodeTracker,
    output_lock: Mutex<()>,
    config_writer: Arc<dyn ConfigWriter>,
    kube_client: Option<kube::Client>,
    is_node_port: bool,
    manage_ingress: bool,
    config_map_label: String,
    write_timeout: Duration,
    last_write_millis: AtomicU64,
    watch_guards: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl Manager {
    /// Return a new instance.
    pub fn new(params: Params) -> Arc<Self> {
        Arc::new(Self {
            vservers: VirtualServers::new(),
            vs_mutexes: SkipMap::new(),
            registry: Mutex::new(Registry {
                mode: WatchMode::Inactive,
                informers: HashMap::new(),
            }),
            namespaces: informer_set::ResourceStore::default(),
            node_tracker: NodeTracker::new(params.use_node_internal, params.initial_state),
            output_lock: Mutex::new(()),
            config_writer: params.config_writer,
            kube_client: params.kube_client,
            is_node_port: params.is_node_port,
            manage_ingress: params.manage_ingress,
            config_map_label: params.config_map_label,
            write_timeout: params.write_timeout,
            last_write_millis: AtomicU64::new(0),
            watch_guards: Mutex::new(Vec::new()),
        })
    }

    /// The table of current virtual-server configurations.
    pub fn vservers(&self) -> &VirtualServers {
        &self.vservers
    }

    /// Label selector that `ConfigMap` sources must carry.
    pub fn config_map_label(&self) -> &str {
        &self.config_map_label
    }

    /// Whether `Ingress` resources are watched as configuration sources.
    pub fn manages_ingress(&self) -> bool {
        self.manage_ingress
    }

    /// Milliseconds since epoch of the last confirmed document write.
    pub fn last_write_millis(&self) -> u64 {
        self.last_write_millis.load(Ordering::Relaxed)
    }

    // ---- namespace registry ------------------------------------------------

    /**
      Watch an explicit namespace. The empty name watches all namespaces and
      cannot coexist with named registrations (or vice versa), nor can either
      coexist with a namespace label selector.
    */
    pub fn add_namespace(self: &Arc<Self>, namespace: &str) -> Result<(), RegistryConflict> {
        let set = {
            let mut registry = self.registry.lock().unwrap();
            if let WatchMode::Labeled(_) = registry.mode {
                return Err(RegistryConflict::LabelSelectorActive);
            }
            if namespace.is_empty() && !registry.informers.is_empty() {
                return Err(if registry.informers.contains_key("") {
                    RegistryConflict::AllNamespacesActive
                } else {
                    RegistryConflict::ExplicitNamespacesActive
                });
            }
            if !namespace.is_empty() && registry.informers.contains_key("") {
                return Err(RegistryConflict::AllNamespacesActive);
            }
            if registry.informers.contains_key(namespace) {
                return Ok(());
            }
            let set = InformerSet::new(namespace);
            registry.mode = WatchMode::Explicit;
            registry
                .informers
                .insert(namespace.to_owned(), Arc::clone(&set));
            set
        };
        if let Some(client) = &self.kube_client {
            informer_set::spawn_app_watchers(self, client, &set);
        }
        Ok(())
    }

    /// Stop watching a namespace and drop its table entries.
    pub fn remove_namespace(&self, namespace: &str) -> Result<(), RegistryConflict> {
        let set = {
            let mut registry = self.registry.lock().unwrap();
            let set = registry
                .informers
                .remove(namespace)
                .ok_or_else(|| RegistryConflict::NotWatched(namespace.to_owned()))?;
            if registry.informers.is_empty() && matches!(registry.mode, WatchMode::Explicit) {
                registry.mode = WatchMode::Inactive;
            }
            set
        };
        set.abort_watchers();
        if self.vservers.delete_namespace(namespace) {
            self.output_config();
        }
        Ok(())
    }

    /**
      Switch to label-selected namespaces: every `Namespace` object matching
      `selector` gets its own informer set for as long as it matches.
    */
    pub fn add_namespace_label_informer(
        self: &Arc<Self>,
        selector: &str,
    ) -> Result<(), RegistryConflict> {
        {
            let mut registry = self.registry.lock().unwrap();
            match registry.mode {
                WatchMode::Labeled(_) => return Err(RegistryConflict::LabelSelectorActive),
                WatchMode::Explicit => return Err(RegistryConflict::ExplicitNamespacesActive),
                WatchMode::Inactive => {}
            }
            registry.mode = WatchMode::Labeled(selector.to_owned());
        }
        if let Some(client) = self.kube_client.clone() {
            let manager = Arc::clone(self);
            let selector = selector.to_owned();
            let join_handle = tokio::spawn(async move {
                let api = Api::<Namespace>::all(client);
                watcher(api, watcher::Config::default().labels(&selector))
                    .try_for_each(|event| {
                        match event {
                            watcher::Event::Applied(ns) => {
                                manager.apply_namespace(&ns);
                            }
                            watcher::Event::Deleted(ns) => {
                                manager.delete_namespace_object(&ns);
                            }
                            watcher::Event::Restarted(namespaces) => {
                                for ns in namespaces {
                                    manager.apply_namespace(&ns);
                                }
                            }
                        }
                        futures::future::ready(Ok(()))
                    })
                    .await
                    .map_err(|e| {
                        log::warn!("Canceling namespace monitoring due to error: {e:?}");
                    })
                    .ok();
            });
            self.watch_guards
                .lock()
                .unwrap()
                .push(join_handle.abort_handle());
        }
        Ok(())
    }

    /// Record a `Namespace` object and reconcile its informer set.
    /// True when the namespace matches the registered selector.
    pub fn apply_namespace(self: &Arc<Self>, ns: &Namespace) -> bool {
        let selector = {
            let registry = self.registry.lock().unwrap();
            match &registry.mode {
                WatchMode::Labeled(selector) => selector.clone(),
                _ => return false,
            }
        };
        let name = ns.metadata.name.clone().unwrap_or_default();
        let matched = match_label_selector(&selector, ns.metadata.labels.as_ref());
        self.namespaces.insert(ns.clone());
        self.sync_namespace(&name);
        matched
    }

    /// Forget a deleted `Namespace` object and tear down its informer set.
    pub fn delete_namespace_object(self: &Arc<Self>, ns: &Namespace) {
        let name = ns.metadata.name.clone().unwrap_or_default();
        self.namespaces.remove(ns);
        self.sync_namespace(&name);
    }

    /// Align the informer set of `name` with its current label match state.
    fn sync_namespace(self: &Arc<Self>, name: &str) {
        let selector = {
            let registry = self.registry.lock().unwrap();
            match &registry.mode {
                WatchMode::Labeled(selector) => selector.clone(),
                _ => return,
            }
        };
        let matched = self
            .namespaces
            .get("", name)
            .map(|ns| match_label_selector(&selector, ns.metadata.labels.as_ref()))
            .unwrap_or(false);
        let watched = self.registry.lock().unwrap().informers.contains_key(name);
        if matched && !watched {
            log::info!("Namespace '{name}' matches the selector, watching it.");
            let set = InformerSet::new(name);
            self.registry
                .lock()
                .unwrap()
                .informers
                .insert(name.to_owned(), Arc::clone(&set));
            if let Some(client) = &self.kube_client {
                informer_set::spawn_app_watchers(self, client, &set);
            }
        } else if !matched && watched {
            log::info!("Namespace '{name}' left the selector, dropping it.");
            let set = self.registry.lock().unwrap().informers.remove(name);
            if let Some(set) = set {
                set.abort_watchers();
            }
            if self.vservers.delete_namespace(name) {
                self.output_config();
            }
        }
    }

    /// The informer set responsible for `namespace`, honoring an
    /// all-namespaces registration.
    fn get_namespace_informer(&self, namespace: &str) -> Option<Arc<InformerSet>> {
        let registry = self.registry.lock().unwrap();
        registry
            .informers
            .get(namespace)
            .or_else(|| registry.informers.get(""))
            .cloned()
    }

    /// Stop every watcher owned by this manager.
    pub fn stop_app_informers(&self) {
        for guard in self.watch_guards.lock().unwrap().drain(..) {
            guard.abort();
        }
        let registry = self.registry.lock().unwrap();
        for set in registry.informers.values() {
            set.abort_watchers();
        }
    }

    // ---- resource event entry points ---------------------------------------

    /**
      Accept a `ConfigMap` if it is ours: watched namespace, matching label,
      valid payload. Returns the affected key, or `None` for maps that are
      silently ignored.
    */
    fn check_valid_config_map(&self, cm: &ConfigMap) -> Option<ServiceKey> {
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        self.get_namespace_informer(namespace)?;
        if !match_label_selector(&self.config_map_label, cm.metadata.labels.as_ref()) {
            return None;
        }
        match parse_virtual_server_config(cm) {
            Ok(config) => Some(ServiceKey {
                service_name: config.virtual_server.backend.service_name.clone(),
                service_port: config.virtual_server.backend.service_port,
                namespace: namespace.to_owned(),
            }),
            Err(e) => {
                log::warn!("Ignoring configmap: {e}");
                None
            }
        }
    }

    /// Drop the store object and any table entries previously produced by a
    /// `ConfigMap` that is gone or no longer ours. The entries are located
    /// by source identity, so the object need not still carry our label or
    /// parse. True if anything was bound to the source.
    fn retire_config_map(&self, set: &InformerSet, cm: &ConfigMap) -> bool {
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        set.config_maps.remove(cm);
        let keys = self
            .vservers
            .keys_with_name(namespace, &format_config_map_vs_name(cm));
        let retired = !keys.is_empty();
        for key in &keys {
            self.lock_and_sync(key);
        }
        retired
    }

    /// Create or refresh the virtual server defined by a `ConfigMap`.
    /// Maps that are not ours are ignored, except that a map which produced
    /// an entry before turning invalid has that entry dropped.
    pub fn add_config_map(&self, cm: &ConfigMap) -> bool {
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(namespace) else {
            return false;
        };
        let Some(key) = self.check_valid_config_map(cm) else {
            self.retire_config_map(&set, cm);
            return false;
        };
        let mutex = self.vs_mutex(&key);
        let _key_guard = mutex.lock().unwrap();
        set.config_maps.insert(cm.clone());
        self.sync_virtual_server(&key);
        true
    }

    /// Process a modified `ConfigMap`. Same handling as [Self::add_config_map].
    pub fn update_config_map(&self, cm: &ConfigMap) -> bool {
        self.add_config_map(cm)
    }

    /// Remove the virtual server defined by a deleted `ConfigMap`. Entries
    /// are found by source identity, so a map that lost its label or its
    /// validity before being deleted is still cleaned up.
    pub fn delete_config_map(&self, cm: &ConfigMap) -> bool {
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(namespace) else {
            return false;
        };
        match self.check_valid_config_map(cm) {
            Some(key) => {
                let mutex = self.vs_mutex(&key);
                let _key_guard = mutex.lock().unwrap();
                set.config_maps.remove(cm);
                self.sync_virtual_server(&key);
                true
            }
            None => self.retire_config_map(&set, cm),
        }
    }

    /// Keys affected by a `Service` event: one per declared port plus every
    /// table key that still refers to the service (covers removed ports).
    fn service_queue_keys(&self, namespace: &str, service_name: &str, ports: &[i32]) -> Vec<ServiceKey> {
        let mut keys: BTreeSet<ServiceKey> = ports
            .iter()
            .map(|port| ServiceKey {
                service_name: service_name.to_owned(),
                service_port: *port,
                namespace: namespace.to_owned(),
            })
            .collect();
        for key in self.vservers.keys() {
            if key.namespace == namespace && key.service_name == service_name {
                keys.insert(key);
            }
        }
        keys.into_iter().collect()
    }

    fn declared_ports(svc: &Service) -> Vec<i32> {
        svc.spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.port).collect())
            .unwrap_or_default()
    }

    /// Record a `Service` and resync every key it affects.
    pub fn add_service(&self, svc: &Service) -> bool {
        let namespace = svc.metadata.namespace.clone().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(&namespace) else {
            return false;
        };
        let name = svc.metadata.name.clone().unwrap_or_default();
        set.services.insert(svc.clone());
        for key in self.service_queue_keys(&namespace, &name, &Self::declared_ports(svc)) {
            self.lock_and_sync(&key);
        }
        true
    }

    /// Process a modified `Service`. Same handling as [Self::add_service].
    pub fn update_service(&self, svc: &Service) -> bool {
        self.add_service(svc)
    }

    /// Forget a deleted `Service` and resync every key it affected.
    pub fn delete_service(&self, svc: &Service) -> bool {
        let namespace = svc.metadata.namespace.clone().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(&namespace) else {
            return false;
        };
        let name = svc.metadata.name.clone().unwrap_or_default();
        let keys = self.service_queue_keys(&namespace, &name, &Self::declared_ports(svc));
        set.services.remove(svc);
        for key in keys {
            self.lock_and_sync(&key);
        }
        true
    }

    /// Keys affected by an `Endpoints` event: every table key referring to
    /// the service plus the ports the service object itself declares.
    fn endpoints_queue_keys(&self, set: &InformerSet, ep: &Endpoints) -> Vec<ServiceKey> {
        let namespace = ep.metadata.namespace.clone().unwrap_or_default();
        let name = ep.metadata.name.clone().unwrap_or_default();
        let ports = set
            .services
            .get(&namespace, &name)
            .map(|svc| Self::declared_ports(&svc))
            .unwrap_or_default();
        self.service_queue_keys(&namespace, &name, &ports)
    }

    /// Record an `Endpoints` object and resync every key it affects.
    pub fn add_endpoints(&self, ep: &Endpoints) -> bool {
        let namespace = ep.metadata.namespace.clone().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(&namespace) else {
            return false;
        };
        set.endpoints.insert(ep.clone());
        for key in self.endpoints_queue_keys(&set, ep) {
            self.lock_and_sync(&key);
        }
        true
    }

    /// Process modified `Endpoints`. Same handling as [Self::add_endpoints].
    pub fn update_endpoints(&self, ep: &Endpoints) -> bool {
        self.add_endpoints(ep)
    }

    /// Forget deleted `Endpoints` and resync every key they affected.
    pub fn delete_endpoints(&self, ep: &Endpoints) -> bool {
        let namespace = ep.metadata.namespace.clone().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(&namespace) else {
            return false;
        };
        let keys = self.endpoints_queue_keys(&set, ep);
        set.endpoints.remove(ep);
        for key in keys {
            self.lock_and_sync(&key);
        }
        true
    }

    fn check_valid_ingress(&self, ing: &Ingress) -> Option<ServiceKey> {
        let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
        self.get_namespace_informer(namespace)?;
        let config = create_vs_config_from_ingress(ing)?;
        Some(ServiceKey {
            service_name: config.virtual_server.backend.service_name.clone(),
            service_port: config.virtual_server.backend.service_port,
            namespace: namespace.to_owned(),
        })
    }

    /// Drop the store object and any table entries previously produced by an
    /// `Ingress` that is gone or no longer ours, located by source identity.
    /// True if anything was bound to the source.
    fn retire_ingress(&self, set: &InformerSet, ing: &Ingress) -> bool {
        let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
        set.ingresses.remove(ing);
        let keys = self
            .vservers
            .keys_with_name(namespace, &format_ingress_vs_name(ing));
        let retired = !keys.is_empty();
        for key in &keys {
            self.lock_and_sync(key);
        }
        retired
    }

    /// Create or refresh the virtual server synthesised from an `Ingress`.
    /// Foreign ingress classes are ignored, except that an ingress which
    /// produced an entry before leaving our class has that entry dropped.
    pub fn add_ingress(&self, ing: &Ingress) -> bool {
        let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(namespace) else {
            return false;
        };
        let Some(key) = self.check_valid_ingress(ing) else {
            self.retire_ingress(&set, ing);
            return false;
        };
        let mutex = self.vs_mutex(&key);
        let _key_guard = mutex.lock().unwrap();
        set.ingresses.insert(ing.clone());
        self.sync_virtual_server(&key);
        true
    }

    /// Process a modified `Ingress`. Same handling as [Self::add_ingress].
    pub fn update_ingress(&self, ing: &Ingress) -> bool {
        self.add_ingress(ing)
    }

    /// Remove the virtual server synthesised from a deleted `Ingress`.
    /// Entries are found by source identity, so an ingress that changed
    /// class before being deleted is still cleaned up.
    pub fn delete_ingress(&self, ing: &Ingress) -> bool {
        let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
        let Some(set) = self.get_namespace_informer(namespace) else {
            return false;
        };
        match self.check_valid_ingress(ing) {
            Some(key) => {
                let mutex = self.vs_mutex(&key);
                let _key_guard = mutex.lock().unwrap();
                set.ingresses.remove(ing);
                self.sync_virtual_server(&key);
                true
            }
            None => self.retire_ingress(&set, ing),
        }
    }

    // ---- node handling -----------------------------------------------------

    /// Process a fresh node list; a changed address set resyncs every key.
    pub fn process_node_update(&self, nodes: &[Node]) {
        if self.node_tracker.process(nodes).is_some() {
            for key in self.vservers.keys() {
                self.lock_and_sync(&key);
            }
            self.output_config();
        }
    }

    /// Watch cluster nodes and feed them into [Self::process_node_update].
    pub fn watch_nodes(self: &Arc<Self>) {
        let Some(client) = self.kube_client.clone() else {
            return;
        };
        let manager = Arc::clone(self);
        let join_handle = tokio::spawn(async move {
            let api = Api::<Node>::all(client);
            let (reader, stream) =
                crate::kubers_util::reflector_stream(api, watcher::Config::default());
            stream
                .try_for_each(|_node| {
                    let nodes: Vec<Node> =
                        reader.state().iter().map(|n| (**n).clone()).collect();
                    manager.process_node_update(&nodes);
                    futures::future::ready(Ok(()))
                })
                .await
                .map_err(|e| {
                    log::warn!("Canceling node monitoring due to error: {e:?}");
                })
                .ok();
        });
        self.watch_guards
            .lock()
            .unwrap()
            .push(join_handle.abort_handle());
    }

    // ---- sync engine -------------------------------------------------------

    fn vs_mutex(&self, key: &ServiceKey) -> Arc<Mutex<()>> {
        // Retained across syncs; the map only grows.
        self.vs_mutexes
            .get_or_insert_with(key.clone(), || Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn lock_and_sync(&self, key: &ServiceKey) {
        let mutex = self.vs_mutex(key);
        let _key_guard = mutex.lock().unwrap();
        self.sync_virtual_server(key);
    }

    /**
      Recompute every virtual-server entry bound to `key` from the current
      store snapshots. Callers must hold the key's mutex.

      The work set is the union of names already in the table and names
      derivable from the stores; names without a surviving source are
      deleted, everything else is re-parsed, re-resolved and re-assigned.
      Repeated syncs against unchanged inputs are idempotent.
    */
    fn sync_virtual_server(&self, key: &ServiceKey) {
        let Some(set) = self.get_namespace_informer(&key.namespace) else {
            return;
        };
        let service = set.services.get(&key.namespace, &key.service_name);
        let endpoints = if self.is_node_port {
            None
        } else {
            set.endpoints.get(&key.namespace, &key.service_name)
        };
        let node_addresses = self.node_tracker.snapshot();

        let mut candidates: HashMap<String, VirtualServerConfig> = HashMap::new();
        for cm in set.config_maps.values() {
            if cm.metadata.namespace.as_deref() != Some(key.namespace.as_str()) {
                continue;
            }
            if !match_label_selector(&self.config_map_label, cm.metadata.labels.as_ref()) {
                continue;
            }
            match parse_virtual_server_config(&cm) {
                Ok(config) => {
                    if config.virtual_server.backend.service_name == key.service_name
                        && config.virtual_server.backend.service_port == key.service_port
                    {
                        candidates.insert(format_config_map_vs_name(&cm), config);
                    }
                }
                Err(e) => log::warn!("Skipping configmap during sync: {e}"),
            }
        }
        for ing in set.ingresses.values() {
            if ing.metadata.namespace.as_deref() != Some(key.namespace.as_str()) {
                continue;
            }
            if let Some(config) = create_vs_config_from_ingress(&ing) {
                if config.virtual_server.backend.service_name == key.service_name
                    && config.virtual_server.backend.service_port == key.service_port
                {
                    candidates.insert(format_ingress_vs_name(&ing), config);
                }
            }
        }

        let mut work_set: BTreeSet<String> = self.vservers.names_for(key).into_iter().collect();
        work_set.extend(candidates.keys().cloned());

        for vs_name in work_set {
            match candidates.remove(&vs_name) {
                None => {
                    self.vservers.delete(key, &vs_name);
                }
                Some(mut config) => {
                    let resolution = if self.is_node_port {
                        resolver::resolve_node_port(
                            service.as_deref(),
                            key.service_port,
                            &node_addresses,
                        )
                    } else {
                        resolver::resolve_cluster(
                            service.as_deref(),
                            endpoints.as_deref(),
                            key.service_port,
                        )
                    };
                    config.virtual_server.backend.pool_member_addrs = resolution.pool_member_addrs;
                    config.meta_data.active = resolution.active;
                    config.virtual_server.frontend.virtual_server_name = Some(vs_name.clone());
                    // A source whose backend moved here leaves a twin behind.
                    self.vservers.delete_name_elsewhere(key, &vs_name);
                    self.vservers.assign(key.clone(), &vs_name, config);
                }
            }
        }

        self.output_config();
    }

    // ---- output ------------------------------------------------------------

    /// The document currently described by the table: every active entry,
    /// in canonical order.
    pub fn active_document(&self) -> serde_json::Value {
        let services: Vec<VirtualServerConfig> = self
            .vservers
            .snapshot_sorted()
            .into_iter()
            .filter(|c| c.meta_data.active)
            .collect();
        serde_json::json!({ "services": services })
    }

    /// Serialise the active entries and hand them to the writer. Failures
    /// are logged, counted by the writer, and never propagated; the next
    /// sync produces a fresh attempt.
    pub fn output_config(&self) {
        let _output_guard = self.output_lock.lock().unwrap();
        let payload = self.active_document();
        match self.config_writer.send_section("services", payload) {
            Err(e) => log::warn!("Failed to write services section: {e}"),
            Ok(handle) => match handle.wait_timeout(self.write_timeout) {
                SendOutcome::Done => {
                    self.last_write_millis
                        .store(crate::time::now_as_millis(), Ordering::Relaxed);
                }
                SendOutcome::Failed(e) => {
                    log::warn!("Writer reported failure for services section: {e}");
                }
                SendOutcome::TimedOut => {
                    log::warn!("Writer did not confirm services section in time.");
                }
            },
        }
    }

    // ---- health ------------------------------------------------------------

    /// Return true if the [Manager] has started.
    pub fn is_health_started(&self) -> bool {
        true
    }

    /// Return true if the [Manager] is ready to serve requests: the first
    /// node snapshot has been processed, so pool members can be resolved.
    pub fn is_health_ready(&self) -> bool {
        self.node_tracker.has_initial_state()
    }

    /**
       Return true if the [Manager] is still able to process events.

       *NOTE: This always returns `true`; a lost watcher cancels itself with
       a warning and must not take the whole controller down with it.*
    */
    pub fn is_health_live(&self) -> bool {
        true
    }
}
