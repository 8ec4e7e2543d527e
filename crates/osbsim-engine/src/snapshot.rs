//! Binding snapshot computation.
//!
//! Credentials are derived from the binding id, the owning instance id and
//! the configured salt, so they are stable for a binding and change on
//! rotation.

use serde_json::json;
use sha2::{Digest, Sha256};

use osbsim_core::catalog::{REQUIRES_ROUTE_FORWARDING, REQUIRES_SYSLOG_DRAIN, REQUIRES_VOLUME_MOUNT};
use osbsim_core::response::{BindingMetadata, BindingSnapshot, Endpoint, VolumeDevice, VolumeMount};
use osbsim_core::{Offering, Settings};

/// Snapshot for a freshly created binding.
pub fn compute(
    binding_id: &str,
    instance_id: &str,
    offering: &Offering,
    settings: &Settings,
    now_secs: u64,
) -> BindingSnapshot {
    let binding = &settings.binding;
    BindingSnapshot {
        credentials: settings
            .response
            .credentials
            .then(|| credentials(binding_id, instance_id, settings)),
        syslog_drain_url: offering
            .requires(REQUIRES_SYSLOG_DRAIN)
            .then(|| binding.syslog_drain_url.clone()),
        route_service_url: offering
            .requires(REQUIRES_ROUTE_FORWARDING)
            .then(|| binding.route_service_url.clone()),
        volume_mounts: if offering.requires(REQUIRES_VOLUME_MOUNT) {
            vec![VolumeMount {
                driver: binding.volume_driver.clone(),
                container_dir: binding.volume_container_dir.clone(),
                mode: "rw".to_string(),
                device_type: "shared".to_string(),
                device: VolumeDevice {
                    volume_id: format!("{instance_id}-{binding_id}"),
                },
            }]
        } else {
            Vec::new()
        },
        endpoints: if settings.response.endpoints {
            vec![Endpoint {
                host: binding.credential_host.clone(),
                ports: vec![binding.credential_port.to_string()],
                protocol: "tcp".to_string(),
            }]
        } else {
            Vec::new()
        },
        metadata: settings
            .response
            .binding_metadata
            .then(|| metadata(now_secs, binding.expires_after_secs)),
    }
}

/// Snapshot for a rotated binding: the predecessor's drains, mounts and
/// endpoints with fresh credentials and a fresh expiry.
pub fn rotate(
    predecessor: &BindingSnapshot,
    binding_id: &str,
    instance_id: &str,
    settings: &Settings,
    now_secs: u64,
) -> BindingSnapshot {
    BindingSnapshot {
        credentials: predecessor
            .credentials
            .as_ref()
            .map(|_| credentials(binding_id, instance_id, settings)),
        metadata: predecessor
            .metadata
            .as_ref()
            .map(|_| metadata(now_secs, settings.binding.expires_after_secs)),
        ..predecessor.clone()
    }
}

fn credentials(binding_id: &str, instance_id: &str, settings: &Settings) -> serde_json::Value {
    let binding = &settings.binding;
    let digest = derive(&[instance_id, binding_id, &binding.credential_salt]);
    let username = format!("u{}", &digest[..15]);
    let password = digest[16..48].to_string();
    json!({
        "uri": format!(
            "osbsim://{username}:{password}@{}:{}/{instance_id}",
            binding.credential_host, binding.credential_port
        ),
        "username": username,
        "password": password,
    })
}

fn derive(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn metadata(now_secs: u64, expires_after_secs: u64) -> BindingMetadata {
    let expires = now_secs.saturating_add(expires_after_secs);
    let renew = now_secs.saturating_add(expires_after_secs / 2);
    BindingMetadata {
        expires_at: rfc3339(expires),
        renew_before: rfc3339(renew),
    }
}

fn rfc3339(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use osbsim_core::Catalog;

    fn offering(id: &str) -> Offering {
        Catalog::sample().offering(id).unwrap().clone()
    }

    #[test]
    fn credentials_are_stable_per_binding() {
        let settings = Settings::default();
        let db = offering("osbsim-database");
        let a = compute("b1", "i1", &db, &settings, 0);
        let b = compute("b1", "i1", &db, &settings, 0);
        let c = compute("b2", "i1", &db, &settings, 0);
        assert_eq!(a.credentials, b.credentials);
        assert_ne!(a.credentials, c.credentials);

        let creds = a.credentials.unwrap();
        assert!(creds["uri"].as_str().unwrap().starts_with("osbsim://u"));
        assert_eq!(creds["password"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn requires_tags_drive_optional_fields() {
        let settings = Settings::default();
        let logging = compute("b1", "i1", &offering("osbsim-logging"), &settings, 0);
        assert_eq!(
            logging.syslog_drain_url.as_deref(),
            Some(settings.binding.syslog_drain_url.as_str())
        );
        assert!(logging.route_service_url.is_none());
        assert!(logging.volume_mounts.is_empty());

        let mut db = offering("osbsim-database");
        db.requires.insert(REQUIRES_VOLUME_MOUNT.to_string());
        let mounted = compute("b1", "i1", &db, &settings, 0);
        assert_eq!(mounted.volume_mounts[0].device.volume_id, "i1-b1");
    }

    #[test]
    fn toggles_gate_credentials_endpoints_metadata() {
        let mut settings = Settings::default();
        settings.response.credentials = false;
        settings.response.endpoints = true;
        settings.response.binding_metadata = true;
        settings.binding.expires_after_secs = 3600;

        let snap = compute("b1", "i1", &offering("osbsim-database"), &settings, 0);
        assert!(snap.credentials.is_none());
        assert_eq!(snap.endpoints[0].ports, vec!["5432"]);
        let meta = snap.metadata.unwrap();
        assert_eq!(meta.expires_at, "1970-01-01T01:00:00Z");
        assert_eq!(meta.renew_before, "1970-01-01T00:30:00Z");
    }

    #[test]
    fn rotation_keeps_drains_and_renews_credentials() {
        let settings = Settings::default();
        let original = compute("b1", "i1", &offering("osbsim-logging"), &settings, 0);
        let rotated = rotate(&original, "b2", "i1", &settings, 10);
        assert_eq!(rotated.syslog_drain_url, original.syslog_drain_url);
        assert!(rotated.credentials.is_some());
        assert_ne!(rotated.credentials, original.credentials);
    }
}
