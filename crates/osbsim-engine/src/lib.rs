//! osbsim-engine: resource lifecycle engine for the broker simulator.
//!
//! Turns typed requests into simulated operations on the in-memory tables
//! of `osbsim-state`:
//!
//! - Validates requests against the [`Catalog`](osbsim_core::Catalog)
//! - Applies idempotency rules (replay, conflict, return-once)
//! - Plans operations from simulation knobs and behavior settings
//! - Maps every failure onto a [`BrokerError`] with its own status
//!
//! # Architecture
//!
//! ```text
//! Broker
//!   ├── DeploymentService   provision / fetch / update / poll / deprovision
//!   ├── BindingService      bind (+ rotation) / fetch / poll / unbind
//!   └── Arc<BrokerContext>
//!       ├── Arc<Catalog>, Arc<Settings>
//!       ├── ResourceTable<Instance>
//!       └── ResourceTable<Binding>
//! ```

pub mod binding;
pub mod context;
pub mod deployment;
pub mod error;
pub mod reply;
pub mod simulation;
pub mod snapshot;

use std::sync::Arc;

use osbsim_core::{Catalog, Settings};

pub use binding::BindingService;
pub use context::BrokerContext;
pub use deployment::DeploymentService;
pub use error::{BrokerError, BrokerResult};
pub use reply::{Reply, Status};

/// Entry point bundling both lifecycle services over one shared context.
#[derive(Clone)]
pub struct Broker {
    ctx: Arc<BrokerContext>,
    deployments: DeploymentService,
    bindings: BindingService,
}

impl Broker {
    pub fn new(catalog: Arc<Catalog>, settings: Arc<Settings>) -> Self {
        let ctx = Arc::new(BrokerContext::new(catalog, settings));
        Self {
            deployments: DeploymentService::new(Arc::clone(&ctx)),
            bindings: BindingService::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.ctx.catalog
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    pub fn deployments(&self) -> &DeploymentService {
        &self.deployments
    }

    pub fn bindings(&self) -> &BindingService {
        &self.bindings
    }
}
