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

//! Utilities to simplify use of kube.rs.

use core::hash::Hash;
use kube::runtime::reflector;
use kube::runtime::reflector::Lookup;
use kube::runtime::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use serde::de::DeserializeOwned;

/**
  Return a reflector-backed store of Kubernetes resources of type `K`
  together with the stream of applied objects that keeps it current.

  The store reflects every existing and future resource matched by
  `watcher_config`. Callers drive the stream and read the full resource
  set from the store whenever an element arrives.
*/
pub fn reflector_stream<K>(
    api: Api<K>,
    watcher_config: Config,
) -> (
    reflector::Store<K>,
    impl futures_util::Stream<Item = Result<K, kube::runtime::watcher::Error>>,
)
where
    K: std::fmt::Debug + DeserializeOwned + kube::Resource + Clone + std::marker::Send + 'static,
    <K as kube::Resource>::DynamicType: std::default::Default,
    <K as Lookup>::DynamicType: Eq + Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config)).applied_objects();
    (reader, stream)
}
