//! # Impulse Core
//!
//! Shared building blocks for the Impulse automation engine:
//! configuration, the error type, and the capability seam through which
//! the host application plugs real domain actions into the scheduler.
//!
//! ```text
//! ImpulseConfig (TOML)
//!   ├── [scheduler]      tick, backoff, execution budget, history, seed
//!   ├── [detector]       default probability / cooldown, partial ratio
//!   ├── [optimizer]      threshold + boost range
//!   ├── [[triggers]]     name → interval, effectiveness, capability
//!   ├── [[opportunities]] name → probability, ranges, capability
//!   ├── [[streams]]      name → target, shares per source
//!   └── [capabilities]   host-side bindings (simulated, webhook)
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod types;

pub use capability::{Capability, CapabilitySet, FnCapability};
pub use config::ImpulseConfig;
pub use error::{ImpulseError, Result};
pub use types::{Invocation, Outcome, SourceKind};
