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

//! Parsing of configuration for pool-member resolution.

use config::builder::BuilderState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};

use super::AppConfigDefaults;

/// How virtual-server pool members are derived.
#[derive(Debug, Deserialize, Serialize)]
pub struct PoolConfig {
    /// `nodeport` resolves members from node addresses, `cluster` from
    /// endpoint addresses.
    membermode: String,
    /// Select `InternalIP` node addresses instead of `ExternalIP`.
    usenodeinternal: bool,
}

impl AppConfigDefaults for PoolConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "membermode", "nodeport")
            .unwrap()
            .set_default(prefix.to_string() + "." + "usenodeinternal", "false")
            .unwrap()
    }
}

impl PoolConfig {
    /// True when pool members are node addresses at the service's node port.
    pub fn is_node_port(&self) -> bool {
        self.membermode.eq_ignore_ascii_case("nodeport")
    }

    /// Whether node address selection prefers `InternalIP`.
    pub fn use_node_internal(&self) -> bool {
        self.usenodeinternal
    }
}
