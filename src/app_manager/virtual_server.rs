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

//! Typed virtual-server configuration as exchanged with the writer.
//!
//! Wire names are the camelCase keys of the published virtual-server schema,
//! so a parsed `ConfigMap` payload and an emitted document round-trip through
//! the same types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One virtual server plus controller-private bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualServerConfig {
    /// The declarative virtual-server description.
    #[serde(rename = "virtualServer")]
    pub virtual_server: VirtualServer,
    /// Controller-private state, never serialised.
    #[serde(skip)]
    pub meta_data: MetaData,
}

/// Controller-private per-entry state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaData {
    /// True once pool members could be resolved for the entry.
    pub active: bool,
}

/// A frontend listener backed by a pool of member addresses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualServer {
    pub backend: Backend,
    pub frontend: Frontend,
}

/// The pool side: which service is load balanced and to which members.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub service_name: String,
    pub service_port: i32,
    /// Resolved `ip:port` pool members, in deterministic order. `None` until
    /// (or unless) resolution succeeds.
    #[serde(default)]
    pub pool_member_addrs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_monitors: Option<Vec<HealthMonitor>>,
}

/// Health monitor attached to the pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthMonitor {
    pub interval: i32,
    pub timeout: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<String>,
    pub protocol: String,
}

/// The listener side: either an explicit virtual address or an iApp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    /// Stamped by the sync engine with the source-derived virtual-server name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_server_name: Option<String>,
    pub partition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<VirtualAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<SslProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iapp_options: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iapp_tables: Option<BTreeMap<String, IappTable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iapp_pool_member_table: Option<IappPoolMemberTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iapp_variables: Option<BTreeMap<String, String>>,
}

/// Listener address. An empty `bindAddr` declares a pool-only virtual server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAddress {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bind_addr: String,
    pub port: i32,
}

/// Client SSL profile attached to the listener.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslProfile {
    pub f5_profile_name: String,
}

/// Generic iApp table: named columns and string rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IappTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<String>>>,
}

/// The iApp table that receives the resolved pool members.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IappPoolMemberTable {
    pub name: String,
    pub columns: Vec<IappTableColumn>,
}

/// Column description: either a generated `kind` or a literal `value`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IappTableColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl VirtualServerConfig {
    /// Canonical output position: entries sort by (partition, virtualServerName).
    pub fn sort_key(&self) -> (String, String) {
        (
            self.virtual_server.frontend.partition.clone(),
            self.virtual_server
                .frontend
                .virtual_server_name
                .clone()
                .unwrap_or_default(),
        )
    }

    /// Name of the attached client SSL profile, or the empty string.
    pub fn frontend_ssl_profile_name(&self) -> &str {
        self.virtual_server
            .frontend
            .ssl_profile
            .as_ref()
            .map(|p| p.f5_profile_name.as_str())
            .unwrap_or_default()
    }
}
