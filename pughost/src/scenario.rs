//! The scenario store: upstream, local proxy port and named fault profiles.
//!
//! Stored as `pughost.json` by default. A `.toml` extension switches the
//! format, which is handy when the store lives next to other TOML config.

use std::collections::BTreeMap;
use std::fs::{read_to_string, write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fault parameters for one named scenario. Absent and zero fields inject nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    /// Added delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u32>,
    /// Delay variation in milliseconds. Ignored without `latency`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
    /// Throughput cap in KB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u32>,
    /// Probability in [0, 1] that a connection stalls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStore {
    /// `host:port` of the real service under test.
    pub upstream: String,
    /// Local port the degraded route listens on.
    #[serde(rename = "proxyPort")]
    pub proxy_port: u16,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioDescriptor>,
}

impl Default for ScenarioStore {
    fn default() -> Self {
        let mut scenarios = BTreeMap::new();
        scenarios.insert(
            "mobile_3g_slow".to_owned(),
            ScenarioDescriptor {
                latency: Some(1000),
                jitter: Some(500),
                bandwidth: Some(50),
                packet_loss: Some(0.02),
            },
        );
        scenarios.insert(
            "wifi_cafe_crowded".to_owned(),
            ScenarioDescriptor {
                latency: Some(100),
                jitter: Some(800),
                bandwidth: None,
                packet_loss: Some(0.05),
            },
        );
        scenarios.insert(
            "satellite_link".to_owned(),
            ScenarioDescriptor {
                latency: Some(800),
                jitter: Some(50),
                bandwidth: Some(1000),
                packet_loss: Some(0.005),
            },
        );

        Self {
            upstream: "localhost:3000".to_owned(),
            proxy_port: 3001,
            scenarios,
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "toml")
}

impl ScenarioStore {
    /// Read and validate the store at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigMissing(path.to_path_buf()));
        }

        let text = read_to_string(path)?;
        let store: Self = if is_toml(path) {
            toml_edit::de::from_str(&text).map_err(|e| Error::invalid(path, e))?
        } else {
            serde_json::from_str(&text).map_err(|e| Error::invalid(path, e))?
        };

        store.validate().map_err(|reason| Error::invalid(path, reason))?;

        Ok(store)
    }

    /// Write the store to `path`. Refuses to clobber an existing file unless `force`.
    pub fn save(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(Error::invalid(path, "already exists"));
        }

        let text = if is_toml(path) {
            toml_edit::ser::to_string_pretty(self).map_err(|e| Error::invalid(path, e))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| Error::invalid(path, e))?
        };

        write(path, text)?;

        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.upstream.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return Err(format!("upstream '{}' is not host:port", self.upstream)),
        }

        if self.proxy_port == 0 {
            return Err("proxyPort must be non-zero".to_owned());
        }

        for (name, scenario) in &self.scenarios {
            if let Some(loss) = scenario.packet_loss {
                if !(0.0..=1.0).contains(&loss) {
                    return Err(format!(
                        "scenario '{name}': packet_loss {loss} is outside [0, 1]"
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn scenario(&self, name: &str) -> Result<&ScenarioDescriptor> {
        self.scenarios
            .get(name)
            .ok_or_else(|| Error::ScenarioNotFound {
                name: name.to_owned(),
                available: self.names().map(str::to_owned).collect(),
            })
    }

    /// Scenario names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }
}
