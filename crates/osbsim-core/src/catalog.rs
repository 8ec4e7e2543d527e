//! Service catalog: the offerings and plans the broker advertises.
//!
//! The catalog is loaded once (from JSON, TOML, or the built-in sample) and
//! never mutated afterwards. Lookups are linear scans by id.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// `requires` tag asking for a syslog drain URL in binding responses.
pub const REQUIRES_SYSLOG_DRAIN: &str = "syslog_drain";
/// `requires` tag asking for a route service URL in binding responses.
pub const REQUIRES_ROUTE_FORWARDING: &str = "route_forwarding";
/// `requires` tag asking for volume mounts in binding responses.
pub const REQUIRES_VOLUME_MOUNT: &str = "volume_mount";

/// The full catalog as served from `GET /v2/catalog`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub services: Vec<Offering>,
}

/// A service offering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offering {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub instances_retrievable: bool,
    #[serde(default)]
    pub bindings_retrievable: bool,
    #[serde(default)]
    pub allow_context_updates: bool,
    #[serde(default = "default_true")]
    pub plan_updateable: bool,
    /// Overrides `behavior.allow_deprovision_with_bindings` for this offering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_deprovision_with_bindings: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub requires: BTreeSet<String>,
    pub plans: Vec<Plan>,
}

/// A plan within an offering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the offering's `bindable` flag when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_info: Option<MaintenanceInfo>,
}

/// Plan-level maintenance version tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceInfo {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Catalog {
    /// Load a catalog from a `.json` or `.toml` file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog: Catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check the uniqueness invariants lookups depend on.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut offering_ids = HashSet::new();
        let mut plan_ids = HashSet::new();
        for offering in &self.services {
            if !offering_ids.insert(offering.id.as_str()) {
                anyhow::bail!("duplicate service offering id {:?}", offering.id);
            }
            if offering.plans.is_empty() {
                anyhow::bail!("service offering {:?} has no plans", offering.id);
            }
            for plan in &offering.plans {
                if !plan_ids.insert(plan.id.as_str()) {
                    anyhow::bail!("duplicate plan id {:?}", plan.id);
                }
            }
        }
        Ok(())
    }

    pub fn offering(&self, id: &str) -> Option<&Offering> {
        self.services.iter().find(|o| o.id == id)
    }

    /// Built-in catalog used when no catalog file is configured.
    pub fn sample() -> Self {
        Catalog {
            services: vec![
                Offering {
                    id: "osbsim-database".to_string(),
                    name: "simulated-database".to_string(),
                    description: "Simulated database offering".to_string(),
                    bindable: true,
                    instances_retrievable: true,
                    bindings_retrievable: true,
                    allow_context_updates: true,
                    plan_updateable: true,
                    allow_deprovision_with_bindings: None,
                    requires: BTreeSet::new(),
                    plans: vec![
                        Plan {
                            id: "osbsim-database-small".to_string(),
                            name: "small".to_string(),
                            description: "Small simulated database".to_string(),
                            bindable: None,
                            maintenance_info: Some(MaintenanceInfo {
                                version: "1.0.0".to_string(),
                                description: None,
                            }),
                        },
                        Plan {
                            id: "osbsim-database-large".to_string(),
                            name: "large".to_string(),
                            description: "Large simulated database".to_string(),
                            bindable: None,
                            maintenance_info: Some(MaintenanceInfo {
                                version: "1.0.0".to_string(),
                                description: None,
                            }),
                        },
                    ],
                },
                Offering {
                    id: "osbsim-logging".to_string(),
                    name: "simulated-log-drain".to_string(),
                    description: "Simulated log drain offering".to_string(),
                    bindable: true,
                    instances_retrievable: false,
                    bindings_retrievable: false,
                    allow_context_updates: false,
                    plan_updateable: false,
                    allow_deprovision_with_bindings: Some(false),
                    requires: BTreeSet::from([REQUIRES_SYSLOG_DRAIN.to_string()]),
                    plans: vec![Plan {
                        id: "osbsim-logging-default".to_string(),
                        name: "default".to_string(),
                        description: String::new(),
                        bindable: None,
                        maintenance_info: None,
                    }],
                },
            ],
        }
    }
}

impl Offering {
    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn requires(&self, tag: &str) -> bool {
        self.requires.contains(tag)
    }

    /// Whether bindings may be created against the given plan of this offering.
    pub fn plan_bindable(&self, plan: &Plan) -> bool {
        plan.bindable.unwrap_or(self.bindable)
    }
}

impl Plan {
    pub fn maintenance_version(&self) -> Option<&str> {
        self.maintenance_info.as_ref().map(|m| m.version.as_str())
    }
}
