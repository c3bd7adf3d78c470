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

//! Pure pool-member resolution.
//!
//! Given snapshots of the relevant `Service`, `Endpoints` and node
//! addresses, compute the pool members for one virtual-server entry. No
//! locks, no I/O.

use k8s_openapi::api::core::v1::{EndpointPort, Endpoints, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Result of resolving one entry.
#[derive(Debug, PartialEq, Eq)]
pub struct Resolution {
    /// `ip:port` members, `None` when resolution produced nothing.
    pub pool_member_addrs: Option<Vec<String>>,
    /// Whether the entry should appear in the emitted document.
    pub active: bool,
}

impl Resolution {
    fn unresolved(active: bool) -> Self {
        Self {
            pool_member_addrs: None,
            active,
        }
    }
}

fn find_service_port(service: Option<&Service>, service_port: i32) -> Option<&ServicePort> {
    service?
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == service_port)
}

/**
  NodePort mode: every schedulable node address at the service's node port.

  Inactive when the service is absent, is not of type `NodePort`, or does
  not expose the requested port.
*/
pub fn resolve_node_port(
    service: Option<&Service>,
    service_port: i32,
    node_addresses: &[String],
) -> Resolution {
    let is_node_port_service = service
        .and_then(|s| s.spec.as_ref())
        .and_then(|s| s.type_.as_deref())
        == Some("NodePort");
    if !is_node_port_service {
        return Resolution::unresolved(false);
    }
    let Some(node_port) = find_service_port(service, service_port).and_then(|p| p.node_port)
    else {
        return Resolution::unresolved(false);
    };
    Resolution {
        pool_member_addrs: Some(
            node_addresses
                .iter()
                .map(|addr| format!("{addr}:{node_port}"))
                .collect(),
        ),
        active: true,
    }
}

/// Endpoint ports match by target-port name, then port name, then number.
fn port_matches(endpoint_port: &EndpointPort, service_port: &ServicePort, wanted: i32) -> bool {
    if let Some(IntOrString::String(target_name)) = &service_port.target_port {
        return endpoint_port.name.as_deref() == Some(target_name.as_str());
    }
    if service_port.name.is_some() && endpoint_port.name == service_port.name {
        return true;
    }
    endpoint_port.port == wanted
}

fn ready_members(
    endpoints: &Endpoints,
    service_port: &ServicePort,
    wanted: i32,
) -> Option<Vec<String>> {
    let subsets = endpoints.subsets.as_ref()?;
    let mut members: Option<Vec<String>> = None;
    for subset in subsets {
        let Some(port) = subset
            .ports
            .iter()
            .flatten()
            .find(|p| port_matches(p, service_port, wanted))
        else {
            continue;
        };
        let addrs = members.get_or_insert_with(Vec::new);
        for address in subset.addresses.iter().flatten() {
            addrs.push(format!("{}:{}", address.ip, port.port));
        }
    }
    members
}

/**
  Cluster mode: the ready pod addresses of the matching endpoint subset.

  Not-ready addresses are excluded. Resolution requires the service itself
  to exist and expose the requested port; with no matching subset (or no
  ready addresses) the entry stays in the document without members.
*/
pub fn resolve_cluster(
    service: Option<&Service>,
    endpoints: Option<&Endpoints>,
    service_port: i32,
) -> Resolution {
    let Some(svc_port) = find_service_port(service, service_port) else {
        return Resolution::unresolved(false);
    };
    let members = endpoints.and_then(|ep| ready_members(ep, svc_port, service_port));
    match members {
        Some(addrs) if !addrs.is_empty() => Resolution {
            pool_member_addrs: Some(addrs),
            active: true,
        },
        _ => Resolution::unresolved(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_manager::test_fixtures::*;

    fn nodes() -> Vec<String> {
        vec!["127.0.0.1".to_owned(), "127.0.0.2".to_owned()]
    }

    #[test]
    fn node_port_members_cover_every_node() {
        let svc = new_service(
            "foo",
            "1",
            "default",
            "NodePort",
            vec![node_svc_port(80, 30001)],
        );
        let resolution = resolve_node_port(Some(&svc), 80, &nodes());
        assert!(resolution.active);
        assert_eq!(
            Some(vec!["127.0.0.1:30001".to_owned(), "127.0.0.2:30001".to_owned()]),
            resolution.pool_member_addrs
        );
    }

    #[test]
    fn node_port_requires_a_matching_port() {
        let svc = new_service(
            "foo",
            "1",
            "default",
            "NodePort",
            vec![node_svc_port(80, 30001)],
        );
        assert_eq!(
            Resolution::unresolved(false),
            resolve_node_port(Some(&svc), 8080, &nodes())
        );
        assert_eq!(
            Resolution::unresolved(false),
            resolve_node_port(None, 80, &nodes())
        );
    }

    #[test]
    fn node_port_rejects_cluster_ip_services() {
        let svc = new_service(
            "foo",
            "1",
            "default",
            "ClusterIP",
            vec![node_svc_port(80, 30001)],
        );
        assert_eq!(
            Resolution::unresolved(false),
            resolve_node_port(Some(&svc), 80, &nodes())
        );
    }

    #[test]
    fn node_port_with_no_nodes_is_active_and_empty() {
        let svc = new_service(
            "foo",
            "1",
            "default",
            "NodePort",
            vec![node_svc_port(80, 30001)],
        );
        let resolution = resolve_node_port(Some(&svc), 80, &[]);
        assert!(resolution.active);
        assert_eq!(Some(Vec::new()), resolution.pool_member_addrs);
    }

    #[test]
    fn cluster_members_are_the_ready_addresses() {
        let ports = vec![svc_port("port0", 80)];
        let svc = new_service("foo", "1", "default", "ClusterIP", ports.clone());
        let ep = new_endpoints(
            "foo",
            "1",
            "default",
            &["10.2.96.0", "10.2.96.1"],
            &["10.2.96.2"],
            convert_svc_ports_to_endpoint_ports(&ports),
        );
        let resolution = resolve_cluster(Some(&svc), Some(&ep), 80);
        assert!(resolution.active);
        assert_eq!(
            Some(vec!["10.2.96.0:80".to_owned(), "10.2.96.1:80".to_owned()]),
            resolution.pool_member_addrs
        );
    }

    #[test]
    fn cluster_without_endpoints_stays_listed_while_service_exists() {
        let ports = vec![svc_port("port0", 80)];
        let svc = new_service("foo", "1", "default", "ClusterIP", ports.clone());
        let resolution = resolve_cluster(Some(&svc), None, 80);
        assert_eq!(None, resolution.pool_member_addrs);
        assert!(resolution.active);

        let empty = new_endpoints(
            "foo",
            "1",
            "default",
            &[],
            &[],
            convert_svc_ports_to_endpoint_ports(&ports),
        );
        let resolution = resolve_cluster(Some(&svc), Some(&empty), 80);
        assert_eq!(None, resolution.pool_member_addrs);
        assert!(resolution.active);
    }

    #[test]
    fn cluster_without_service_or_matching_port_is_inactive() {
        let resolution = resolve_cluster(None, None, 80);
        assert_eq!(Resolution::unresolved(false), resolution);

        let svc = new_service("foo", "1", "default", "ClusterIP", vec![svc_port("p", 8080)]);
        let resolution = resolve_cluster(Some(&svc), None, 80);
        assert_eq!(Resolution::unresolved(false), resolution);
    }

    #[test]
    fn target_port_names_route_the_match() {
        let mut port = svc_port("web", 80);
        port.target_port = Some(IntOrString::String("http-alt".to_owned()));
        let svc = new_service("foo", "1", "default", "ClusterIP", vec![port]);
        let ep = new_endpoints(
            "foo",
            "1",
            "default",
            &["10.2.96.0"],
            &[],
            vec![
                endpoint_port("http-alt", 8080),
                endpoint_port("web", 80),
            ],
        );
        let resolution = resolve_cluster(Some(&svc), Some(&ep), 80);
        assert_eq!(
            Some(vec!["10.2.96.0:8080".to_owned()]),
            resolution.pool_member_addrs
        );
    }
}
