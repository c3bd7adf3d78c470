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

//! Identity of virtual-server configurations.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/**
  The join key between configuration sources (`ConfigMap`s, `Ingress`es) and
  the `Service`/`Endpoints` objects backing them.

  Also used to address the per-key mutex that serialises syncs, so events for
  the same service port never interleave while distinct keys proceed in
  parallel.
*/
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceKey {
    /// Name of the referenced `Service`.
    pub service_name: String,
    /// Exposed port of the referenced `Service`.
    pub service_port: i32,
    /// Namespace holding both the source and the `Service`.
    pub namespace: String,
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.namespace, self.service_name, self.service_port
        )
    }
}

fn meta_name(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

fn meta_namespace(meta: &ObjectMeta) -> &str {
    meta.namespace.as_deref().unwrap_or_default()
}

/// Stable virtual-server name for a `ConfigMap` source: `<namespace>_<name>`.
pub fn format_config_map_vs_name(cm: &ConfigMap) -> String {
    format!("{}_{}", meta_namespace(&cm.metadata), meta_name(&cm.metadata))
}

/// Stable virtual-server name for an `Ingress` source: `<namespace>_ingress-<name>`.
pub fn format_ingress_vs_name(ing: &Ingress) -> String {
    format!(
        "{}_ingress-{}",
        meta_namespace(&ing.metadata),
        meta_name(&ing.metadata)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn config_map_names_are_namespace_qualified() {
        let cm = ConfigMap {
            metadata: object_meta("default", "foomap"),
            ..Default::default()
        };
        assert_eq!("default_foomap", format_config_map_vs_name(&cm));
    }

    #[test]
    fn ingress_names_carry_a_source_marker() {
        let ing = Ingress {
            metadata: object_meta("default", "ingress"),
            ..Default::default()
        };
        assert_eq!("default_ingress-ingress", format_ingress_vs_name(&ing));
    }

    #[test]
    fn keys_compare_on_all_three_fields() {
        let a = ServiceKey {
            service_name: "foo".into(),
            service_port: 80,
            namespace: "default".into(),
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.service_port = 8080;
        assert_ne!(a, b);
    }
}
