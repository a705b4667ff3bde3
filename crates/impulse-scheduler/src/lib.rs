//! # Impulse Scheduler
//!
//! Periodic trigger scheduling and weighted resource allocation.
//!
//! Each cycle fires due triggers, detects probabilistic opportunities,
//! routes the resulting impact into streams and boosts under-used streams.
//! The [`Scheduler`] repeats this on a fixed tick until stopped.
//!
//! ```text
//! Scheduler ──tick──▶ Engine::run_cycle
//!                        ├── TriggerRegistry (cooldown-gated)
//!                        ├── OpportunityDetector (probability + cooldown)
//!                        ├── StreamAllocator (route + optimize)
//!                        └── MetricsAggregator (counters + history)
//! ```

pub mod allocator;
pub mod clock;
pub mod cooldown;
pub mod engine;
mod guard;
pub mod metrics;
pub mod opportunity;
pub mod registry;
pub mod report;
pub mod scheduler;

pub use allocator::{RoutingPolicy, Stream, StreamAllocator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineBuilder, LoopState};
pub use metrics::{CycleResult, MetricsAggregator, MetricsSnapshot};
pub use opportunity::OpportunityDetector;
pub use registry::TriggerRegistry;
pub use report::Report;
pub use scheduler::Scheduler;
