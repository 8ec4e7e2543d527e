//! osbsim.toml settings parser.
//!
//! Every section is optional; missing keys fall back to the defaults below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::version::ApiVersion;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub protocol: ProtocolSettings,
    pub response: ResponseSettings,
    pub behavior: BehaviorSettings,
    pub binding: BindingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    /// Catalog file (`.json` or `.toml`). The built-in sample is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Lowest `X-Broker-API-Version` accepted; older requests get 412.
    pub min_api_version: ApiVersion,
}

/// Toggles for optional response fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponseSettings {
    pub dashboard_url: bool,
    pub dashboard_base_url: String,
    pub instance_metadata: bool,
    pub fetch_parameters: bool,
    pub fetch_maintenance_info: bool,
    pub credentials: bool,
    pub endpoints: bool,
    pub binding_metadata: bool,
    /// Suppress the response body of a resource once it has been delivered.
    pub return_once: bool,
}

/// Defaults for simulated operations when the request carries no knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    pub async_by_default: bool,
    pub seconds_to_complete: u64,
    pub allow_deprovision_with_bindings: bool,
    /// Deleted resources remembered per table for polling.
    pub retired_capacity: usize,
}

/// Values used when building binding responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BindingSettings {
    pub credential_host: String,
    pub credential_port: u16,
    pub credential_salt: String,
    pub syslog_drain_url: String,
    pub route_service_url: String,
    pub volume_driver: String,
    pub volume_container_dir: String,
    /// Lifetime advertised in binding metadata.
    pub expires_after_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            catalog: None,
        }
    }
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            dashboard_url: true,
            dashboard_base_url: "https://dashboard.osbsim.local".to_string(),
            instance_metadata: false,
            fetch_parameters: true,
            fetch_maintenance_info: true,
            credentials: true,
            endpoints: false,
            binding_metadata: false,
            return_once: false,
        }
    }
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            async_by_default: false,
            seconds_to_complete: 0,
            allow_deprovision_with_bindings: true,
            retired_capacity: 1024,
        }
    }
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            credential_host: "db.osbsim.local".to_string(),
            credential_port: 5432,
            credential_salt: "osbsim".to_string(),
            syslog_drain_url: "syslog-tls://logs.osbsim.local:6514".to_string(),
            route_service_url: "https://route.osbsim.local".to_string(),
            volume_driver: "osbsim-nfs".to_string(),
            volume_container_dir: "/data".to_string(),
            expires_after_secs: 3600,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.behavior.allow_deprovision_with_bindings);
        assert_eq!(settings.protocol.min_api_version.to_string(), "2.13");
    }

    #[test]
    fn parses_partial_sections() {
        let toml_str = r#"
[protocol]
min_api_version = "2.16"

[response]
return_once = true

[behavior]
async_by_default = true
seconds_to_complete = 5
retired_capacity = 16
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.protocol.min_api_version, ApiVersion::new(2, 16));
        assert!(settings.response.return_once);
        assert!(settings.response.dashboard_url);
        assert!(settings.behavior.async_by_default);
        assert_eq!(settings.behavior.seconds_to_complete, 5);
        assert_eq!(settings.behavior.retired_capacity, 16);
    }

    #[test]
    fn round_trips_through_toml() {
        let toml_str = Settings::default().to_toml_string().unwrap();
        let parsed: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, Settings::default());
    }
}
