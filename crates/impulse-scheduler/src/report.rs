//! Point-in-time status report (streams, sources, cumulative metrics).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::allocator::StreamTotals;
use crate::engine::{Engine, LoopState};
use crate::metrics::{CycleResult, MetricsSnapshot, SourceStats};

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub state: LoopState,
    pub streams: Vec<StreamReport>,
    pub totals: StreamTotals,
    pub triggers: Vec<TriggerReport>,
    pub opportunities: Vec<CategoryReport>,
    pub metrics: MetricsSnapshot,
    pub recent_cycles: Vec<CycleResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub name: String,
    pub accumulated: f64,
    pub target: f64,
    pub utilization: f64,
    pub auto_optimize: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerReport {
    pub name: String,
    pub interval_secs: u64,
    pub effectiveness: f64,
    pub last_fired: Option<DateTime<Utc>>,
    /// None until first fired.
    pub next_due: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SourceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub name: String,
    pub probability: f64,
    pub cooldown_secs: u64,
    pub last_detected: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SourceStats>,
}

impl Engine {
    /// Build a consistent report. Streams and metrics are read under the
    /// same locks a cycle holds while committing, so a report never mixes
    /// two cycles.
    pub async fn report(&self) -> Report {
        let allocator = self.allocator.read().await;
        let metrics = self.metrics.read().await;

        let streams = allocator
            .streams()
            .iter()
            .map(|s| StreamReport {
                name: s.name.clone(),
                accumulated: s.accumulated,
                target: s.target,
                utilization: s.utilization(),
                auto_optimize: s.auto_optimize,
            })
            .collect();

        let triggers = self
            .catalog
            .triggers
            .iter()
            .map(|t| {
                let stats = metrics.source(&t.name).cloned();
                let last_fired = stats.as_ref().and_then(|s| s.last_run);
                let next_due = last_fired.and_then(|at| {
                    chrono::Duration::from_std(t.interval)
                        .ok()
                        .and_then(|d| at.checked_add_signed(d))
                });
                TriggerReport {
                    name: t.name.clone(),
                    interval_secs: t.interval.as_secs(),
                    effectiveness: t.effectiveness,
                    last_fired,
                    next_due,
                    stats,
                }
            })
            .collect();

        let opportunities = self
            .catalog
            .categories
            .iter()
            .map(|c| {
                let stats = metrics.source(&c.name).cloned();
                CategoryReport {
                    name: c.name.clone(),
                    probability: c.probability,
                    cooldown_secs: c.cooldown.as_secs(),
                    last_detected: stats.as_ref().and_then(|s| s.last_run),
                    stats,
                }
            })
            .collect();

        Report {
            generated_at: self.now(),
            state: self.state(),
            streams,
            totals: allocator.totals(),
            triggers,
            opportunities,
            metrics: metrics.snapshot(),
            recent_cycles: metrics.history().cloned().collect(),
        }
    }
}
