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

//! Per-namespace bundle of resource stores and their watchers.

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use kube::runtime::watcher;
use kube::runtime::watcher::Config;
use kube::Api;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use super::Manager;

/**
  Cache of Kubernetes objects keyed by `namespace/name`.

  Written only by the owning watcher task (or by tests that stand in for
  it); read by syncs as a point-in-time snapshot.
*/
pub struct ResourceStore<K> {
    items: RwLock<HashMap<String, Arc<K>>>,
}

impl<K> Default for ResourceStore<K> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

pub(crate) fn store_key(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

impl<K: Metadata<Ty = ObjectMeta>> ResourceStore<K> {
    /// Insert or replace an object.
    pub fn insert(&self, object: K) {
        let key = store_key(object.metadata());
        self.items.write().unwrap().insert(key, Arc::new(object));
    }

    /// Remove the stored object with the same identity, if present.
    pub fn remove(&self, object: &K) {
        let key = store_key(object.metadata());
        self.items.write().unwrap().remove(&key);
    }

    /// Look up one object by namespace and name.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.items
            .read()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    /// Snapshot of all stored objects.
    pub fn values(&self) -> Vec<Arc<K>> {
        self.items.read().unwrap().values().cloned().collect()
    }
}

/**
  The informers of one watched namespace: ConfigMap, Service, Endpoints and
  Ingress stores sharing the sync entry points of the owning [Manager].

  An empty namespace string watches all namespaces through one set.
*/
pub struct InformerSet {
    pub namespace: String,
    pub config_maps: ResourceStore<ConfigMap>,
    pub services: ResourceStore<Service>,
    pub endpoints: ResourceStore<Endpoints>,
    pub ingresses: ResourceStore<Ingress>,
    watch_guards: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl InformerSet {
    /// Return a new instance with empty stores and no watchers.
    pub fn new(namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_owned(),
            config_maps: ResourceStore::default(),
            services: ResourceStore::default(),
            endpoints: ResourceStore::default(),
            ingresses: ResourceStore::default(),
            watch_guards: Mutex::new(Vec::new()),
        })
    }

    fn push_guard(&self, guard: tokio::task::AbortHandle) {
        self.watch_guards.lock().unwrap().push(guard);
    }

    /// Stop all watcher tasks feeding this set.
    pub fn abort_watchers(&self) {
        for guard in self.watch_guards.lock().unwrap().drain(..) {
            guard.abort();
        }
    }
}

fn api_for<K>(client: &kube::Client, namespace: &str) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    if namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), namespace)
    }
}

/// Drive one watcher stream into apply/delete callbacks.
///
/// A `Restarted` relist first retires stored objects that did not come
/// back, then re-applies the listed ones.
fn spawn_kind<K>(
    set: &Arc<InformerSet>,
    api: Api<K>,
    watcher_config: Config,
    list_current: impl Fn() -> Vec<K> + Send + Sync + 'static,
    apply: impl Fn(K) + Send + Sync + 'static,
    delete: impl Fn(K) + Send + Sync + 'static,
) where
    K: Metadata<Ty = ObjectMeta>
        + kube::Resource
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Send
        + 'static,
    <K as kube::Resource>::DynamicType: Default,
{
    let kind = std::any::type_name::<K>();
    let join_handle = tokio::spawn(async move {
        watcher(api, watcher_config)
            .try_for_each(|event| {
                match event {
                    watcher::Event::Applied(object) => apply(object),
                    watcher::Event::Deleted(object) => delete(object),
                    watcher::Event::Restarted(objects) => {
                        let listed: HashSet<String> =
                            objects.iter().map(|o| store_key(o.metadata())).collect();
                        for old in list_current() {
                            if !listed.contains(&store_key(old.metadata())) {
                                delete(old);
                            }
                        }
                        for object in objects {
                            apply(object);
                        }
                    }
                }
                futures::future::ready(Ok(()))
            })
            .await
            .map_err(|e| {
                log::warn!("Canceling {kind} monitoring due to error: {e:?}");
            })
            .ok();
    });
    set.push_guard(join_handle.abort_handle());
}

/// Spawn the watcher tasks that feed one informer set.
pub(crate) fn spawn_app_watchers(
    manager: &Arc<Manager>,
    client: &kube::Client,
    set: &Arc<InformerSet>,
) {
    let namespace = set.namespace.as_str();

    // ConfigMaps are filtered server side by the configured label selector;
    // the manager re-checks locally either way.
    spawn_kind::<ConfigMap>(
        set,
        api_for(client, namespace),
        Config::default().labels(manager.config_map_label()),
        {
            let set = Arc::clone(set);
            move || set.config_maps.values().iter().map(|o| (**o).clone()).collect()
        },
        {
            let manager = Arc::clone(manager);
            move |cm| {
                manager.add_config_map(&cm);
            }
        },
        {
            let manager = Arc::clone(manager);
            move |cm| {
                manager.delete_config_map(&cm);
            }
        },
    );

    spawn_kind::<Service>(
        set,
        api_for(client, namespace),
        Config::default(),
        {
            let set = Arc::clone(set);
            move || set.services.values().iter().map(|o| (**o).clone()).collect()
        },
        {
            let manager = Arc::clone(manager);
            move |svc| {
                manager.add_service(&svc);
            }
        },
        {
            let manager = Arc::clone(manager);
            move |svc| {
                manager.delete_service(&svc);
            }
        },
    );

    spawn_kind::<Endpoints>(
        set,
        api_for(client, namespace),
        Config::default(),
        {
            let set = Arc::clone(set);
            move || set.endpoints.values().iter().map(|o| (**o).clone()).collect()
        },
        {
            let manager = Arc::clone(manager);
            move |ep| {
                manager.add_endpoints(&ep);
            }
        },
        {
            let manager = Arc::clone(manager);
            move |ep| {
                manager.delete_endpoints(&ep);
            }
        },
    );

    if manager.manages_ingress() {
        spawn_kind::<Ingress>(
            set,
            api_for(client, namespace),
            Config::default(),
            {
                let set = Arc::clone(set);
                move || set.ingresses.values().iter().map(|o| (**o).clone()).collect()
            },
            {
                let manager = Arc::clone(manager);
                move |ing| {
                    manager.add_ingress(&ing);
                }
            },
            {
                let manager = Arc::clone(manager);
                move |ing| {
                    manager.delete_ingress(&ing);
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_manager::test_fixtures::*;

    #[test]
    fn store_is_keyed_by_namespace_and_name() {
        let store: ResourceStore<ConfigMap> = ResourceStore::default();
        let a = new_config_map("foomap", "1", "default", &[("schema", SCHEMA_URL)]);
        let b = new_config_map("foomap", "1", "other", &[("schema", SCHEMA_URL)]);
        store.insert(a.clone());
        store.insert(b);
        assert_eq!(2, store.values().len());
        assert!(store.get("default", "foomap").is_some());
        assert!(store.get("other", "foomap").is_some());
        assert!(store.get("third", "foomap").is_none());

        store.remove(&a);
        assert!(store.get("default", "foomap").is_none());
        assert_eq!(1, store.values().len());
    }

    #[test]
    fn insert_replaces_by_identity() {
        let store: ResourceStore<ConfigMap> = ResourceStore::default();
        store.insert(new_config_map("m", "1", "default", &[("data", "a")]));
        store.insert(new_config_map("m", "2", "default", &[("data", "b")]));
        assert_eq!(1, store.values().len());
        let stored = store.get("default", "m").unwrap();
        assert_eq!("b", stored.data.as_ref().unwrap().get("data").unwrap());
    }
}
