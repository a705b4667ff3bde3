//! Cycle results and the cumulative counters they fold into.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use impulse_core::SourceKind;
use serde::Serialize;

use crate::allocator::StreamAdjustment;

/// One trigger execution or opportunity resolution within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub source: String,
    pub kind: SourceKind,
    pub success: bool,
    pub impact: f64,
    pub sub_actions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one scheduler cycle (or one manual firing).
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Produced by a manual firing rather than the loop.
    pub manual: bool,
    pub triggers_fired: usize,
    pub opportunities_acted: usize,
    /// Impact produced by executions.
    pub total_impact: f64,
    /// Impact that actually reached streams.
    pub distributed: f64,
    pub optimizations: Vec<StreamAdjustment>,
    pub executions: Vec<ExecutionRecord>,
    /// Set when the cycle was abandoned during distribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleResult {
    pub(crate) fn begin(sequence: u64, started_at: DateTime<Utc>, manual: bool) -> Self {
        Self {
            sequence,
            started_at,
            finished_at: started_at,
            manual,
            triggers_fired: 0,
            opportunities_acted: 0,
            total_impact: 0.0,
            distributed: 0.0,
            optimizations: Vec::new(),
            executions: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn record(&mut self, record: ExecutionRecord) {
        match record.kind {
            SourceKind::Trigger => self.triggers_fired += 1,
            SourceKind::Opportunity => self.opportunities_acted += 1,
        }
        self.total_impact += record.impact;
        self.executions.push(record);
    }

    /// Nothing was executed.
    pub fn is_idle(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn is_abandoned(&self) -> bool {
        self.error.is_some()
    }

    /// Impact per source in execution order, summed when a source repeats.
    pub fn impact_by_source(&self) -> Vec<(String, f64)> {
        let mut totals: Vec<(String, f64)> = Vec::new();
        for record in &self.executions {
            match totals.iter_mut().find(|(s, _)| *s == record.source) {
                Some((_, impact)) => *impact += record.impact,
                None => totals.push((record.source.clone(), record.impact)),
            }
        }
        totals
    }
}

/// Running status of a single trigger or category.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub kind: SourceKind,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    pub total_impact: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceStats {
    fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            executions: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            total_impact: 0.0,
            last_run: None,
            last_error: None,
        }
    }
}

/// Cumulative counters for external reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub manual_firings: u64,
    pub abandoned_cycles: u64,
    pub triggers_fired: u64,
    pub trigger_failures: u64,
    pub opportunities_acted: u64,
    pub opportunity_failures: u64,
    pub total_impact: f64,
    pub total_distributed: f64,
    pub optimizations_applied: u64,
    pub total_boost: f64,
    /// Successful executions / all executions (0–1).
    pub success_rate: f64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct MetricsAggregator {
    totals: MetricsSnapshot,
    successes: u64,
    sources: BTreeMap<String, SourceStats>,
    /// Ring buffer of recent cycles.
    history: VecDeque<CycleResult>,
    history_size: usize,
}

impl MetricsAggregator {
    pub fn new(history_size: usize) -> Self {
        Self {
            totals: MetricsSnapshot::default(),
            successes: 0,
            sources: BTreeMap::new(),
            history: VecDeque::with_capacity(history_size.min(256)),
            history_size,
        }
    }

    /// Fold a finished (or abandoned) cycle into the counters.
    pub fn fold(&mut self, result: CycleResult) {
        let totals = &mut self.totals;
        if result.manual {
            totals.manual_firings += 1;
        } else if result.is_abandoned() {
            totals.abandoned_cycles += 1;
        } else {
            totals.cycles += 1;
        }
        if let Some(err) = &result.error {
            totals.last_error = Some(err.clone());
        }

        for record in &result.executions {
            match (record.kind, record.success) {
                (SourceKind::Trigger, true) => totals.triggers_fired += 1,
                (SourceKind::Trigger, false) => {
                    totals.triggers_fired += 1;
                    totals.trigger_failures += 1;
                }
                (SourceKind::Opportunity, true) => totals.opportunities_acted += 1,
                (SourceKind::Opportunity, false) => {
                    totals.opportunities_acted += 1;
                    totals.opportunity_failures += 1;
                }
            }
            if record.success {
                self.successes += 1;
            }

            let stats = self
                .sources
                .entry(record.source.clone())
                .or_insert_with(|| SourceStats::new(record.kind));
            stats.executions += 1;
            stats.total_impact += record.impact;
            stats.last_run = Some(result.started_at);
            if record.success {
                stats.successes += 1;
                stats.consecutive_failures = 0;
            } else {
                stats.failures += 1;
                stats.consecutive_failures += 1;
                stats.last_error = record.error.clone();
            }
        }

        totals.total_impact += result.total_impact;
        totals.total_distributed += result.distributed;
        totals.optimizations_applied += result.optimizations.len() as u64;
        totals.total_boost += result.optimizations.iter().map(|a| a.boost).sum::<f64>();
        totals.last_cycle_at = Some(result.finished_at);

        let executions = totals.triggers_fired + totals.opportunities_acted;
        totals.success_rate = if executions > 0 {
            self.successes as f64 / executions as f64
        } else {
            0.0
        };

        if self.history_size > 0 {
            if self.history.len() >= self.history_size {
                self.history.pop_front();
            }
            self.history.push_back(result);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.totals.clone()
    }

    pub fn source(&self, name: &str) -> Option<&SourceStats> {
        self.sources.get(name)
    }

    pub fn sources(&self) -> &BTreeMap<String, SourceStats> {
        &self.sources
    }

    /// Most recent cycles, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CycleResult> {
        self.history.iter()
    }

    pub fn last(&self) -> Option<&CycleResult> {
        self.history.back()
    }
}
