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

//! Translation of `Ingress` resources into virtual-server configurations.

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};

use super::virtual_server::{
    Backend, Frontend, SslProfile, VirtualAddress, VirtualServer, VirtualServerConfig,
};

/// Only ingresses of this class (or with no class annotation) are handled.
const SUPPORTED_INGRESS_CLASS: &str = "f5";

const CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
const BIND_ADDR_ANNOTATION: &str = "virtual-server.f5.com/ip";
const PARTITION_ANNOTATION: &str = "virtual-server.f5.com/partition";
const HTTP_PORT_ANNOTATION: &str = "virtual-server.f5.com/http-port";
const BALANCE_ANNOTATION: &str = "virtual-server.f5.com/balance";

fn annotation<'a>(ing: &'a Ingress, name: &str) -> Option<&'a str> {
    ing.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(name))
        .map(String::as_str)
}

/// Backend service reference: `spec.defaultBackend` wins over the first rule.
fn backend_reference(ing: &Ingress) -> Option<(String, i32)> {
    let spec = ing.spec.as_ref()?;
    let backend: &IngressBackend = match spec.default_backend.as_ref() {
        Some(backend) => backend,
        None => {
            &spec
                .rules
                .as_ref()?
                .first()?
                .http
                .as_ref()?
                .paths
                .first()?
                .backend
        }
    };
    let service = backend.service.as_ref()?;
    let port = service.port.as_ref()?.number?;
    Some((service.name.clone(), port))
}

/// SSL profile names are partition qualified unless already a full path.
pub fn format_ingress_ssl_profile_name(partition: &str, secret: &str) -> String {
    if secret.contains('/') {
        secret.to_owned()
    } else {
        format!("{partition}/{secret}")
    }
}

/**
  Synthesise a virtual-server configuration from an `Ingress`.

  Returns `None` when the ingress belongs to a different ingress class or
  carries no usable backend service reference. Only the first TLS entry is
  mapped to an SSL profile; further entries are ignored.
*/
pub fn create_vs_config_from_ingress(ing: &Ingress) -> Option<VirtualServerConfig> {
    if let Some(class) = annotation(ing, CLASS_ANNOTATION) {
        if class != SUPPORTED_INGRESS_CLASS {
            return None;
        }
    }
    let (service_name, service_port) = backend_reference(ing)?;

    let tls_secret = ing
        .spec
        .as_ref()
        .and_then(|s| s.tls.as_ref())
        .and_then(|tls| tls.first())
        .and_then(|t| t.secret_name.clone());

    let partition = annotation(ing, PARTITION_ANNOTATION)
        .unwrap_or_default()
        .to_owned();
    let port = annotation(ing, HTTP_PORT_ANNOTATION)
        .and_then(|p| p.parse::<i32>().ok())
        .unwrap_or(if tls_secret.is_some() { 443 } else { 80 });
    let balance = annotation(ing, BALANCE_ANNOTATION)
        .unwrap_or("round-robin")
        .to_owned();
    let bind_addr = annotation(ing, BIND_ADDR_ANNOTATION)
        .unwrap_or_default()
        .to_owned();

    let ssl_profile = tls_secret.map(|secret| SslProfile {
        f5_profile_name: format_ingress_ssl_profile_name(&partition, &secret),
    });

    Some(VirtualServerConfig {
        virtual_server: VirtualServer {
            backend: Backend {
                service_name,
                service_port,
                pool_member_addrs: None,
                health_monitors: None,
            },
            frontend: Frontend {
                virtual_server_name: None,
                partition,
                balance: Some(balance),
                mode: Some("http".to_owned()),
                virtual_address: Some(VirtualAddress { bind_addr, port }),
                ssl_profile,
                ..Default::default()
            },
        },
        meta_data: Default::default(),
    })
}
