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

//! Builders for the Kubernetes objects used throughout the tests.

use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace, Node,
    NodeAddress, NodeSpec, NodeStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::app_manager::{Params, DEFAULT_CONFIG_MAP_LABEL};
use crate::config_writer::mock::{FailStyle, MockWriter};
use crate::config_writer::ConfigWriter;

/// Schema URL as carried by production config maps.
pub const SCHEMA_URL: &str = "f5schemadb://bigip-virtual-server_v0.1.3.json";

pub const CONFIGMAP_FOO: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 80,
      "healthMonitors": [ {
        "interval": 30,
        "timeout": 20,
        "send": "GET /",
        "protocol": "tcp"
        }
      ]
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "http",
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.240",
        "port": 5051
      },
      "sslProfile": {
        "f5ProfileName": "velcro/testcert"
      }
    }
  }
}"#;

pub const CONFIGMAP_FOO_8080: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 8080
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "http",
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.240",
        "port": 5051
      }
    }
  }
}"#;

pub const CONFIGMAP_FOO_9090: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 9090
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "tcp",
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.200",
        "port": 4041
      }
    }
  }
}"#;

pub const CONFIGMAP_FOO_TCP: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 80
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "tcp",
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.240",
        "port": 5051
      }
    }
  }
}"#;

pub const CONFIGMAP_FOO_INVALID: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "",
      "servicePort": 0
    },
    "frontend": {
      "balance": "super-duper-mojo",
      "mode": "udp",
      "partition": "",
      "virtualAddress": {
        "bindAddr": "10.128.10.260",
        "port": 500000
      },
      "sslProfile": {
        "f5ProfileName": ""
      }
    }
  }
}"#;

pub const CONFIGMAP_BAR: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "bar",
      "servicePort": 80
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "http",
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.240",
        "port": 6051
      }
    }
  }
}"#;

pub const CONFIGMAP_NO_MODE_BALANCE: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "bar",
      "servicePort": 80
    },
    "frontend": {
      "partition": "velcro",
      "virtualAddress": {
        "bindAddr": "10.128.10.240",
        "port": 80
      }
    }
  }
}"#;

pub const CONFIGMAP_NO_BIND_ADDR: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 80
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "http",
      "partition": "velcro",
      "virtualAddress": {
        "port": 10000
      },
      "sslProfile": {
        "f5ProfileName": "velcro/testcert"
      }
    }
  }
}"#;

pub const CONFIGMAP_NO_VIRTUAL_ADDRESS: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "foo",
      "servicePort": 80
    },
    "frontend": {
      "balance": "round-robin",
      "mode": "http",
      "partition": "velcro",
      "sslProfile": {
        "f5ProfileName": "velcro/testcert"
      }
    }
  }
}"#;

pub const CONFIGMAP_IAPP_1: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "iapp1",
      "servicePort": 80
    },
    "frontend": {
      "partition": "velcro",
      "iapp": "/Common/f5.http",
      "iappPoolMemberTable": {
        "name": "pool__members",
        "columns": [
          {"name": "IPAddress", "kind": "IPAddress"},
          {"name": "Port", "kind": "Port"},
          {"name": "ConnectionLimit", "value": "0"},
          {"name": "SomeOtherValue", "value": "value-1"}
        ]
      },
      "iappOptions": {
        "description": "iApp 1"
      },
      "iappVariables": {
        "monitor__monitor": "/#create_new#",
        "monitor__resposne": "none",
        "monitor__uri": "/",
        "net__client_mode": "wan",
        "net__server_mode": "lan",
        "pool__addr": "127.0.0.1",
        "pool__pool_to_use": "/#create_new#",
        "pool__port": "8080"
      }
    }
  }
}"#;

pub const CONFIGMAP_IAPP_2: &str = r#"{
  "virtualServer": {
    "backend": {
      "serviceName": "iapp2",
      "servicePort": 80
    },
    "frontend": {
      "partition": "velcro",
      "iapp": "/Common/f5.http",
      "iappOptions": {
        "description": "iApp 2"
      },
      "iappTables": {
        "pool__Pools": {
          "columns": ["Index", "Name", "Description", "LbMethod", "Monitor",
                      "AdvOptions"],
          "rows": [["0", "", "", "round-robin", "0", "none"]]
        },
        "monitor__Monitors": {
          "columns": ["Index", "Name", "Type", "Options"],
          "rows": [["0", "/Common/tcp", "none", "none"]]
        }
      },
      "iappPoolMemberTable": {
        "name": "pool__members",
        "columns": [
          {"name": "IPAddress", "kind": "IPAddress"},
          {"name": "Port", "kind": "Port"},
          {"name": "ConnectionLimit", "value": "0"},
          {"name": "SomeOtherValue", "value": "value-1"}
        ]
      },
      "iappVariables": {
        "monitor__monitor": "/#create_new#",
        "monitor__resposne": "none",
        "monitor__uri": "/",
        "net__client_mode": "wan",
        "net__server_mode": "lan",
        "pool__addr": "127.0.0.2",
        "pool__pool_to_use": "/#create_new#",
        "pool__port": "4430"
      }
    }
  }
}"#;

fn object_meta(name: &str, version: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: namespace.map(str::to_owned),
        resource_version: Some(version.to_owned()),
        ..Default::default()
    }
}

/// ConfigMap carrying the configured virtual-server label.
pub fn new_config_map(
    name: &str,
    version: &str,
    namespace: &str,
    keys: &[(&str, &str)],
) -> ConfigMap {
    let mut metadata = object_meta(name, version, Some(namespace));
    let (label_key, label_value) = DEFAULT_CONFIG_MAP_LABEL
        .split_once('=')
        .expect("default label is key=value");
    metadata.labels = Some(BTreeMap::from([(
        label_key.to_owned(),
        label_value.to_owned(),
    )]));
    ConfigMap {
        metadata,
        data: Some(
            keys.iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn svc_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        ..Default::default()
    }
}

pub fn node_svc_port(port: i32, node_port: i32) -> ServicePort {
    ServicePort {
        port,
        node_port: Some(node_port),
        ..Default::default()
    }
}

pub fn new_service(
    name: &str,
    version: &str,
    namespace: &str,
    type_: &str,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: object_meta(name, version, Some(namespace)),
        spec: Some(ServiceSpec {
            type_: Some(type_.to_owned()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoint_port(name: &str, port: i32) -> EndpointPort {
    EndpointPort {
        name: Some(name.to_owned()),
        port,
        ..Default::default()
    }
}

pub fn convert_svc_ports_to_endpoint_ports(svc_ports: &[ServicePort]) -> Vec<EndpointPort> {
    svc_ports
        .iter()
        .map(|p| EndpointPort {
            name: p.name.clone(),
            port: p.port,
            ..Default::default()
        })
        .collect()
}

/// Endpoints with one subset of ready and not-ready addresses.
pub fn new_endpoints(
    name: &str,
    version: &str,
    namespace: &str,
    ready_ips: &[&str],
    not_ready_ips: &[&str],
    ports: Vec<EndpointPort>,
) -> Endpoints {
    let to_addresses = |ips: &[&str]| -> Option<Vec<EndpointAddress>> {
        if ips.is_empty() {
            None
        } else {
            Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: (*ip).to_owned(),
                        ..Default::default()
                    })
                    .collect(),
            )
        }
    };
    Endpoints {
        metadata: object_meta(name, version, Some(namespace)),
        subsets: Some(vec![EndpointSubset {
            addresses: to_addresses(ready_ips),
            not_ready_addresses: to_addresses(not_ready_ips),
            ports: Some(ports),
        }]),
    }
}

pub fn new_node(
    name: &str,
    version: &str,
    unschedulable: bool,
    addresses: &[(&str, &str)],
) -> Node {
    Node {
        metadata: object_meta(name, version, None),
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: (*type_).to_owned(),
                        address: (*address).to_owned(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// Ingress spec with a default backend reference.
pub fn backend_ingress_spec(service_name: &str, port: i32) -> IngressSpec {
    IngressSpec {
        default_backend: Some(IngressBackend {
            service: Some(IngressServiceBackend {
                name: service_name.to_owned(),
                port: Some(ServiceBackendPort {
                    number: Some(port),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress spec carrying the backend only on its first rule.
pub fn rule_ingress_spec(service_name: &str, port: i32) -> IngressSpec {
    IngressSpec {
        rules: Some(vec![IngressRule {
            host: Some("apps.example.com".to_owned()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_owned()),
                    path_type: "Prefix".to_owned(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: service_name.to_owned(),
                            port: Some(ServiceBackendPort {
                                number: Some(port),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        }]),
        ..Default::default()
    }
}

pub fn new_ingress(
    name: &str,
    version: &str,
    namespace: &str,
    spec: IngressSpec,
    annotations: &[(&str, &str)],
) -> Ingress {
    let mut metadata = object_meta(name, version, Some(namespace));
    if !annotations.is_empty() {
        metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        );
    }
    Ingress {
        metadata,
        spec: Some(spec),
        ..Default::default()
    }
}

pub fn new_namespace(name: &str, version: &str, labels: &[(&str, &str)]) -> Namespace {
    let mut metadata = object_meta(name, version, None);
    if !labels.is_empty() {
        metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        );
    }
    Namespace {
        metadata,
        ..Default::default()
    }
}

/// Manager parameters wired to a fresh mock writer.
pub fn params(writer: Arc<dyn ConfigWriter>) -> Params {
    Params {
        kube_client: None,
        config_writer: writer,
        is_node_port: true,
        use_node_internal: false,
        initial_state: false,
        manage_ingress: false,
        config_map_label: DEFAULT_CONFIG_MAP_LABEL.to_owned(),
        write_timeout: Duration::from_millis(20),
    }
}

pub fn mock_writer() -> Arc<MockWriter> {
    MockWriter::new(FailStyle::Success)
}

/// `ip:port` expectations for a member list.
pub fn expected_addrs(port: i32, ips: &[&str]) -> Vec<String> {
    ips.iter().map(|ip| format!("{ip}:{port}")).collect()
}
