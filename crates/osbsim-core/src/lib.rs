//! osbsim-core: shared types for the osbsim broker simulator.
//!
//! Holds the read-only reference data (the service [`Catalog`]), the
//! [`Settings`] toggles that shape responses and simulated behavior, and the
//! typed request/response bodies exchanged with the lifecycle engine.

pub mod catalog;
pub mod request;
pub mod response;
pub mod settings;
pub mod types;
pub mod version;

pub use catalog::{Catalog, MaintenanceInfo, Offering, Plan};
pub use settings::Settings;
pub use types::*;
pub use version::ApiVersion;
