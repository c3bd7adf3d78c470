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

//! Parsing of configuration for the configuration-document writer.

use config::builder::BuilderState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AppConfigDefaults;

/// Where and how the generated configuration document is delivered.
#[derive(Debug, Deserialize, Serialize)]
pub struct WriterConfig {
    /// Path of the JSON document consumed by the BIG-IP driver.
    outputpath: String,
    /// Milliseconds to wait for the writer to confirm a section.
    sendtimeoutms: u64,
}

impl AppConfigDefaults for WriterConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(
                prefix.to_string() + "." + "outputpath",
                "/tmp/vsbridge.config.json",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "sendtimeoutms", "1000")
            .unwrap()
    }
}

impl WriterConfig {
    /// Path of the generated JSON document.
    pub fn output_path(&self) -> String {
        self.outputpath.clone()
    }

    /// How long the emitter waits for a write confirmation.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.sendtimeoutms)
    }
}
