//! Stream allocator: routes impact into weighted streams and runs the
//! rebalancing pass.
//!
//! Accumulated values only ever grow: impact and boosts are non-negative and
//! there is no cap, so utilization may exceed 1.0.

use std::collections::HashMap;

use impulse_core::{ImpulseError, Result};
use rand::Rng;
use serde::Serialize;

/// A named accumulator with a capacity target.
#[derive(Debug, Clone, Serialize)]
pub struct Stream {
    pub name: String,
    /// Value representing full utilization.
    pub target: f64,
    pub accumulated: f64,
    /// Eligible for optimizer boosts.
    pub auto_optimize: bool,
}

impl Stream {
    pub fn new(name: &str, target: f64) -> Self {
        Self {
            name: name.to_string(),
            target,
            accumulated: 0.0,
            auto_optimize: true,
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.target > 0.0 {
            self.accumulated / self.target
        } else {
            0.0
        }
    }
}

/// One `(stream, share)` routing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub stream: String,
    pub share: f64,
}

impl Route {
    pub fn new(stream: &str, share: f64) -> Self {
        Self {
            stream: stream.to_string(),
            share,
        }
    }
}

/// Static mapping from impact source to routes. Shares need not sum to 1;
/// the remainder is overhead.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    routes: HashMap<String, Vec<Route>>,
}

impl RoutingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: &str, route: Route) {
        self.routes.entry(source.to_string()).or_default().push(route);
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, source: &str, stream: &str, share: f64) -> Self {
        self.add(source, Route::new(stream, share));
        self
    }

    pub fn routes_for(&self, source: &str) -> &[Route] {
        self.routes.get(source).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|k| k.as_str())
    }
}

/// Applied share of an impact event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub stream: String,
    pub delta: f64,
}

/// One optimizer boost.
#[derive(Debug, Clone, Serialize)]
pub struct StreamAdjustment {
    pub stream: String,
    pub utilization_before: f64,
    pub boost: f64,
    pub accumulated_after: f64,
}

/// Rebalancing parameters.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub enabled: bool,
    pub threshold: f64,
    pub boost_min: f64,
    pub boost_max: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
            boost_min: 0.05,
            boost_max: 0.15,
        }
    }
}

/// Aggregate view across streams.
#[derive(Debug, Clone, Serialize)]
pub struct StreamTotals {
    pub accumulated: f64,
    pub target: f64,
    /// accumulated / target in percent.
    pub efficiency_pct: f64,
}

pub struct StreamAllocator {
    streams: Vec<Stream>,
    index: HashMap<String, usize>,
    policy: RoutingPolicy,
    optimizer: OptimizerSettings,
}

impl StreamAllocator {
    pub fn new(policy: RoutingPolicy, optimizer: OptimizerSettings) -> Self {
        Self {
            streams: Vec::new(),
            index: HashMap::new(),
            policy,
            optimizer,
        }
    }

    pub fn add_stream(&mut self, stream: Stream) -> Result<()> {
        if self.index.contains_key(&stream.name) {
            return Err(ImpulseError::Config(format!(
                "stream '{}' already defined",
                stream.name
            )));
        }
        self.index.insert(stream.name.clone(), self.streams.len());
        self.streams.push(stream);
        Ok(())
    }

    /// Route `impact` from `source` through the policy.
    /// A source without routes distributes nothing.
    pub fn distribute(&mut self, source: &str, impact: f64) -> Result<Vec<Allocation>> {
        let routes = self.policy.routes_for(source).to_vec();
        if routes.is_empty() {
            tracing::debug!("🕳️ No routes for '{}', {:.2} impact dropped", source, impact);
        }
        self.distribute_with(impact, &routes)
    }

    /// Apply `impact` over explicit routes. Every route is checked before any
    /// stream is touched, so a rejected event leaves all streams unchanged.
    pub fn distribute_with(&mut self, impact: f64, routes: &[Route]) -> Result<Vec<Allocation>> {
        if !impact.is_finite() || impact < 0.0 {
            return Err(ImpulseError::Allocation(format!(
                "impact must be finite and non-negative, got {impact}"
            )));
        }

        let mut plan = Vec::with_capacity(routes.len());
        for route in routes {
            let idx = *self.index.get(&route.stream).ok_or_else(|| {
                ImpulseError::Allocation(format!("unknown stream '{}'", route.stream))
            })?;
            if !route.share.is_finite() || route.share < 0.0 {
                return Err(ImpulseError::Allocation(format!(
                    "invalid share {} for stream '{}'",
                    route.share, route.stream
                )));
            }
            let delta = impact * route.share;
            if !(self.streams[idx].accumulated + delta).is_finite() {
                return Err(ImpulseError::Allocation(format!(
                    "stream '{}' would overflow",
                    route.stream
                )));
            }
            plan.push((idx, delta));
        }

        let mut applied = Vec::with_capacity(plan.len());
        for (idx, delta) in plan {
            let stream = &mut self.streams[idx];
            stream.accumulated += delta;
            applied.push(Allocation {
                stream: stream.name.clone(),
                delta,
            });
        }
        Ok(applied)
    }

    /// accumulated / target.
    pub fn utilization(&self, name: &str) -> Option<f64> {
        self.stream(name).map(Stream::utilization)
    }

    /// Boost every eligible stream below the threshold by `target * r`,
    /// `r` drawn from `[boost_min, boost_max]`.
    pub fn optimize<R: Rng>(&mut self, rng: &mut R) -> Vec<StreamAdjustment> {
        if !self.optimizer.enabled {
            return Vec::new();
        }
        let OptimizerSettings {
            threshold,
            boost_min,
            boost_max,
            ..
        } = self.optimizer;

        let mut adjustments = Vec::new();
        for stream in self.streams.iter_mut() {
            if !stream.auto_optimize {
                continue;
            }
            let before = stream.utilization();
            if before >= threshold {
                continue;
            }
            let r = if boost_max > boost_min {
                rng.gen_range(boost_min..=boost_max)
            } else {
                boost_min
            };
            let boost = (stream.target * r).max(0.0);
            stream.accumulated += boost;
            tracing::debug!(
                "📈 Stream '{}' boosted by {:.2} (utilization {:.1}% → {:.1}%)",
                stream.name,
                boost,
                before * 100.0,
                stream.utilization() * 100.0
            );
            adjustments.push(StreamAdjustment {
                stream: stream.name.clone(),
                utilization_before: before,
                boost,
                accumulated_after: stream.accumulated,
            });
        }
        adjustments
    }

    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.index.get(name).map(|&i| &self.streams[i])
    }

    /// Streams in definition order.
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn totals(&self) -> StreamTotals {
        let accumulated: f64 = self.streams.iter().map(|s| s.accumulated).sum();
        let target: f64 = self.streams.iter().map(|s| s.target).sum();
        StreamTotals {
            accumulated,
            target,
            efficiency_pct: if target > 0.0 {
                accumulated / target * 100.0
            } else {
                0.0
            },
        }
    }
}
