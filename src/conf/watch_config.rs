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

//! Parsing of configuration for watched namespaces and resource selection.

use config::builder::BuilderState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};

use super::AppConfigDefaults;
use crate::app_manager::DEFAULT_CONFIG_MAP_LABEL;

/// Which namespaces and configuration sources the controller watches.
#[derive(Debug, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Comma separated list of namespaces. Empty to watch all namespaces.
    namespaces: Option<String>,
    /// Namespace label selector. Mutually exclusive with `namespaces`.
    namespacelabel: Option<String>,
    /// Label selector that virtual-server `ConfigMap`s must carry.
    configmaplabel: String,
    /// Also derive virtual servers from `Ingress` resources.
    manageingress: bool,
}

impl AppConfigDefaults for WatchConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "namespaces", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "namespacelabel", "")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "configmaplabel",
                DEFAULT_CONFIG_MAP_LABEL,
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "manageingress", "false")
            .unwrap()
    }
}

impl WatchConfig {
    /// Namespaces to watch. Empty means all namespaces.
    pub fn namespaces(&self) -> Vec<String> {
        let mut ret = Vec::new();
        if let Some(namespaces) = &self.namespaces {
            if !namespaces.is_empty() {
                ret = namespaces
                    .split(',')
                    .map(|x| x.trim().to_string())
                    .collect();
            }
        }
        ret
    }

    /// Namespace label selector, when namespaces are label driven.
    pub fn namespace_label(&self) -> Option<String> {
        self.namespacelabel
            .as_ref()
            .filter(|label| !label.is_empty())
            .cloned()
    }

    /// Label selector that virtual-server `ConfigMap`s must carry.
    pub fn config_map_label(&self) -> String {
        self.configmaplabel.clone()
    }

    /// Whether `Ingress` resources are configuration sources as well.
    pub fn manage_ingress(&self) -> bool {
        self.manageingress
    }
}
