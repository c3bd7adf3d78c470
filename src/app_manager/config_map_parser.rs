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

//! Parsing and schema validation of `ConfigMap` virtual-server payloads.

use jsonschema::{Draft, JSONSchema};
use k8s_openapi::api::core::v1::ConfigMap;
use std::sync::OnceLock;

use super::virtual_server::VirtualServerConfig;

/// Listener mode applied when a non-iApp frontend omits `mode`.
const DEFAULT_MODE: &str = "tcp";
/// Balancing algorithm applied when a non-iApp frontend omits `balance`.
const DEFAULT_BALANCE: &str = "round-robin";

/// The schema document this build understands, addressed by URL basename.
const SCHEMA_BASENAME: &str = "bigip-virtual-server_v0.1.3.json";
const SCHEMA_SOURCE: &str = include_str!("../../schemas/bigip-virtual-server_v0.1.3.json");

/// Why a `ConfigMap` payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigMapParseError {
    #[error("configmap {0} does not contain schema key")]
    MissingSchemaKey(String),
    #[error("configmap {0} does not contain data key")]
    MissingDataKey(String),
    #[error("configmap {name} references unsupported schema {url}")]
    UnsupportedSchema { name: String, url: String },
    #[error("{0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("configmap {name} is not a valid virtual server: {violations}")]
    SchemaViolation { name: String, violations: String },
}

fn compiled_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let document: serde_json::Value =
            serde_json::from_str(SCHEMA_SOURCE).expect("embedded schema is well-formed JSON");
        JSONSchema::options()
            .with_draft(Draft::Draft4)
            .should_validate_formats(true)
            .compile(&document)
            .expect("embedded schema compiles")
    })
}

/// A dotted instance path reads better in the warning log than a JSON pointer.
fn dotted_path(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

/**
  Parse the `schema`/`data` keys of a `ConfigMap` into a typed virtual-server
  configuration.

  The payload is validated against the schema referenced by URL basename
  before the typed value is constructed; every violation is reported. Mode
  and balance defaults are filled in for non-iApp frontends. The function is
  pure and performs no I/O.
*/
pub fn parse_virtual_server_config(
    cm: &ConfigMap,
) -> Result<VirtualServerConfig, ConfigMapParseError> {
    let cm_name = cm.metadata.name.clone().unwrap_or_default();
    let data = cm.data.as_ref();
    let schema_url = data
        .and_then(|d| d.get("schema"))
        .ok_or_else(|| ConfigMapParseError::MissingSchemaKey(cm_name.clone()))?;
    let payload = data
        .and_then(|d| d.get("data"))
        .ok_or_else(|| ConfigMapParseError::MissingDataKey(cm_name.clone()))?;

    let basename = schema_url.rsplit('/').next().unwrap_or(schema_url);
    if basename != SCHEMA_BASENAME {
        return Err(ConfigMapParseError::UnsupportedSchema {
            name: cm_name,
            url: schema_url.clone(),
        });
    }

    let value: serde_json::Value = serde_json::from_str(payload)?;
    if let Err(errors) = compiled_schema().validate(&value) {
        let violations = errors
            .map(|e| format!("{}: {}", dotted_path(&e.instance_path.to_string()), e))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigMapParseError::SchemaViolation {
            name: cm_name,
            violations,
        });
    }

    let mut config: VirtualServerConfig = serde_json::from_value(value)?;
    let frontend = &mut config.virtual_server.frontend;
    if frontend.iapp.is_none() {
        frontend
            .mode
            .get_or_insert_with(|| DEFAULT_MODE.to_owned());
        frontend
            .balance
            .get_or_insert_with(|| DEFAULT_BALANCE.to_owned());
    }
    Ok(config)
}
