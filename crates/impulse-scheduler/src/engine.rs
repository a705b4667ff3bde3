//! Scheduler engine: one evaluation cycle at a time.
//!
//! ```text
//! run_cycle()
//!   ├── Evaluating:   due triggers → execute + mark fired
//!   │                 detect opportunities → resolve
//!   ├── Distributing: impact per source → streams, then optimize()
//!   └── fold CycleResult into metrics
//! ```
//!
//! Cycle state (cooldowns, RNGs, sequence) sits behind one async mutex, so
//! cycles and manual firings never overlap. Streams and metrics sit behind
//! read/write locks; a cycle holds the stream write lock from the first
//! distribution until its result is folded, so readers never see a torn cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use impulse_core::config::ImpulseConfig;
use impulse_core::{Capability, CapabilitySet, ImpulseError, Result, SourceKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};

use crate::allocator::{OptimizerSettings, Route, RoutingPolicy, Stream, StreamAllocator};
use crate::clock::{Clock, SystemClock};
use crate::metrics::{CycleResult, ExecutionRecord, MetricsAggregator, MetricsSnapshot};
use crate::opportunity::{OpportunityCategory, OpportunityDetector, ResolutionResult};
use crate::registry::{ExecutionResult, Trigger, TriggerRegistry};

/// Scheduler loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Evaluating,
    Distributing,
    Sleeping,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Evaluating => write!(f, "evaluating"),
            LoopState::Distributing => write!(f, "distributing"),
            LoopState::Sleeping => write!(f, "sleeping"),
        }
    }
}

struct CycleCore {
    registry: TriggerRegistry,
    detector: OpportunityDetector,
    /// Drives optimizer boosts.
    rng: StdRng,
    sequence: u64,
}

/// Static definitions kept for reporting.
#[derive(Debug, Clone)]
pub(crate) struct Catalog {
    pub(crate) triggers: Vec<Trigger>,
    pub(crate) categories: Vec<OpportunityCategory>,
}

/// The automation engine. Construct with [`Engine::builder`]; building has no
/// side effects, the background loop is started by [`crate::Scheduler`].
pub struct Engine {
    core: Mutex<CycleCore>,
    pub(crate) allocator: RwLock<StreamAllocator>,
    pub(crate) metrics: RwLock<MetricsAggregator>,
    pub(crate) catalog: Catalog,
    clock: Arc<dyn Clock>,
    state: watch::Sender<LoopState>,
    loop_claimed: AtomicBool,
    tick: Duration,
    error_backoff: Duration,
}

impl Engine {
    pub fn builder(config: ImpulseConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Run one full cycle. Execution failures are contained in the result;
    /// an allocation failure abandons the cycle and is returned as an error
    /// after being folded into the metrics. The state returns to `Idle`.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        self.cycle(false).await
    }

    /// Cycle driven by the background loop: the state stays `Distributing`
    /// and the loop moves it on to `Sleeping`.
    pub(crate) async fn run_loop_cycle(&self) -> Result<CycleResult> {
        self.cycle(true).await
    }

    async fn cycle(&self, in_loop: bool) -> Result<CycleResult> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let now = self.clock.now();
        core.sequence += 1;
        let mut result = CycleResult::begin(core.sequence, now, false);

        self.set_state(LoopState::Evaluating);
        let due: Vec<String> = core
            .registry
            .due_triggers(now)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        for name in &due {
            let record = match core.registry.fire(name, now).await {
                Ok(exec) => trigger_record(exec),
                Err(e) => failed_record(name, SourceKind::Trigger, e),
            };
            result.record(record);
        }

        let opportunities = core.detector.detect(now);
        for opportunity in &opportunities {
            let record = match core.detector.resolve(opportunity).await {
                Ok(resolution) => opportunity_record(resolution),
                Err(e) => failed_record(&opportunity.category, SourceKind::Opportunity, e),
            };
            result.record(record);
        }

        self.set_state(LoopState::Distributing);
        let outcome = self.distribute_and_fold(&mut core.rng, &mut result, true).await;
        if !in_loop {
            self.set_state(LoopState::Idle);
        }

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    "🔁 Cycle #{}: {} triggers, {} opportunities, impact {:.2}",
                    result.sequence,
                    result.triggers_fired,
                    result.opportunities_acted,
                    result.total_impact
                );
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    /// Fire one trigger immediately, outside its schedule. Its cooldown
    /// restarts from now.
    pub async fn fire_now(&self, name: &str) -> Result<CycleResult> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        if core.registry.get(name).is_none() {
            return Err(ImpulseError::UnknownSource(name.to_string()));
        }
        let now = self.clock.now();
        core.sequence += 1;
        let mut result = CycleResult::begin(core.sequence, now, true);

        tracing::info!("👆 Manual firing: '{}'", name);
        let exec = core.registry.fire(name, now).await?;
        result.record(trigger_record(exec));

        self.distribute_and_fold(&mut core.rng, &mut result, false)
            .await?;
        Ok(result)
    }

    async fn distribute_and_fold(
        &self,
        rng: &mut StdRng,
        result: &mut CycleResult,
        optimize: bool,
    ) -> Result<()> {
        let mut allocator = self.allocator.write().await;
        let outcome = distribute(&mut allocator, rng, result, optimize);
        result.finished_at = self.clock.now();
        if let Err(e) = &outcome {
            tracing::error!("❌ Cycle #{} abandoned: {}", result.sequence, e);
            result.error = Some(e.to_string());
        }
        self.metrics.write().await.fold(result.clone());
        drop(allocator);
        outcome
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch loop state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }

    /// Claim the right to run the background loop (single-flight).
    pub(crate) fn claim_loop(&self) -> bool {
        self.loop_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_loop(&self) {
        self.loop_claimed.store(false, Ordering::Release);
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_claimed.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn error_backoff(&self) -> Duration {
        self.error_backoff
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// accumulated / target for one stream.
    pub async fn utilization(&self, stream: &str) -> Option<f64> {
        self.allocator.read().await.utilization(stream)
    }

    /// Copy of every stream in definition order.
    pub async fn streams(&self) -> Vec<Stream> {
        self.allocator.read().await.streams().to_vec()
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.read().await.snapshot()
    }

    /// Most recent cycle result, if any.
    pub async fn last_cycle(&self) -> Option<CycleResult> {
        self.metrics.read().await.last().cloned()
    }

    pub fn trigger_names(&self) -> impl Iterator<Item = &str> {
        self.catalog.triggers.iter().map(|t| t.name.as_str())
    }
}

/// Route each source's impact, then (optionally) run the optimizer.
/// Deltas applied before a failure stay applied.
fn distribute(
    allocator: &mut StreamAllocator,
    rng: &mut StdRng,
    result: &mut CycleResult,
    optimize: bool,
) -> Result<()> {
    for (source, impact) in result.impact_by_source() {
        if impact <= 0.0 {
            continue;
        }
        let applied = allocator.distribute(&source, impact)?;
        result.distributed += applied.iter().map(|a| a.delta).sum::<f64>();
    }
    if optimize && !result.is_idle() {
        result.optimizations = allocator.optimize(rng);
    }
    Ok(())
}

fn trigger_record(exec: ExecutionResult) -> ExecutionRecord {
    ExecutionRecord {
        source: exec.source,
        kind: SourceKind::Trigger,
        success: exec.success,
        impact: exec.impact,
        sub_actions: exec.sub_impact_count,
        error: exec.error,
    }
}

fn opportunity_record(resolution: ResolutionResult) -> ExecutionRecord {
    ExecutionRecord {
        source: resolution.category,
        kind: SourceKind::Opportunity,
        success: resolution.success,
        impact: resolution.impact,
        sub_actions: 0,
        error: resolution.error,
    }
}

fn failed_record(source: &str, kind: SourceKind, err: ImpulseError) -> ExecutionRecord {
    tracing::warn!("⚠️ {} '{}' could not run: {}", kind, source, err);
    ExecutionRecord {
        source: source.to_string(),
        kind,
        success: false,
        impact: 0.0,
        sub_actions: 0,
        error: Some(err.to_string()),
    }
}

/// Builds an [`Engine`] from configuration plus host capabilities.
pub struct EngineBuilder {
    config: ImpulseConfig,
    capabilities: CapabilitySet,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new(config: ImpulseConfig) -> Self {
        Self {
            config,
            capabilities: CapabilitySet::new(),
            clock: None,
        }
    }

    /// Bind one capability by reference name.
    pub fn capability(mut self, name: &str, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.insert(name, capability);
        self
    }

    /// Bind every capability in `set` (later bindings win).
    pub fn capabilities(mut self, set: CapabilitySet) -> Self {
        for name in set.names() {
            if let Some(cap) = set.get(name) {
                self.capabilities.insert(name, cap);
            }
        }
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate everything and assemble the engine. Any definition problem
    /// is an [`ImpulseError::Config`].
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let (detector_rng, optimizer_rng) = match config.scheduler.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_entropy(), StdRng::from_entropy()),
        };
        let budget = config.scheduler.execution_timeout();

        let mut registry = TriggerRegistry::new(budget);
        for def in &config.triggers {
            let capability = lookup(&self.capabilities, def.capability_ref(), &def.name)?;
            registry.register(
                Trigger {
                    name: def.name.clone(),
                    interval: def.interval(),
                    effectiveness: def.effectiveness,
                },
                capability,
            )?;
        }

        let mut detector =
            OpportunityDetector::new(detector_rng, config.detector.partial_ratio, budget);
        for def in &config.opportunities {
            let capability = lookup(&self.capabilities, def.capability_ref(), &def.name)?;
            detector.register(
                OpportunityCategory {
                    name: def.name.clone(),
                    probability: def.probability_or(&config.detector),
                    cooldown: def.cooldown_or(&config.detector),
                    potential: def.potential,
                    confidence: def.confidence,
                },
                capability,
            )?;
        }

        let mut policy = RoutingPolicy::new();
        for stream in &config.streams {
            for (source, share) in &stream.shares {
                policy.add(source, Route::new(&stream.name, *share));
            }
        }
        let optimizer = OptimizerSettings {
            enabled: config.optimizer.enabled,
            threshold: config.optimizer.threshold,
            boost_min: config.optimizer.boost_min,
            boost_max: config.optimizer.boost_max,
        };
        let mut allocator = StreamAllocator::new(policy, optimizer);
        for def in &config.streams {
            allocator.add_stream(Stream {
                name: def.name.clone(),
                target: def.target,
                accumulated: def.accumulated,
                auto_optimize: def.auto_optimize,
            })?;
        }

        let catalog = Catalog {
            triggers: registry.triggers().cloned().collect(),
            categories: detector.categories().cloned().collect(),
        };
        let (state, _) = watch::channel(LoopState::Idle);
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        tracing::info!(
            "⚙️ Engine ready: {} triggers, {} opportunity categories, {} streams",
            registry.len(),
            detector.len(),
            allocator.streams().len()
        );

        Ok(Engine {
            core: Mutex::new(CycleCore {
                registry,
                detector,
                rng: optimizer_rng,
                sequence: 0,
            }),
            allocator: RwLock::new(allocator),
            metrics: RwLock::new(MetricsAggregator::new(config.scheduler.history_size)),
            catalog,
            clock,
            state,
            loop_claimed: AtomicBool::new(false),
            tick: config.scheduler.tick(),
            error_backoff: config.scheduler.error_backoff(),
        })
    }
}

fn lookup(set: &CapabilitySet, reference: &str, source: &str) -> Result<Arc<dyn Capability>> {
    set.get(reference).ok_or_else(|| {
        ImpulseError::Config(format!(
            "'{source}' references capability '{reference}' which the host did not provide"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use impulse_core::{FnCapability, Invocation, Outcome};
    use std::sync::atomic::AtomicU32;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn fixed(impact: f64) -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("fixed", move |_inv: Invocation| async move {
            Ok(Outcome::success(impact, 1))
        }))
    }

    fn counting(counter: Arc<AtomicU32>, impact: f64) -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("counting", move |_inv: Invocation| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::success(impact, 1))
            }
        }))
    }

    fn throwing() -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("throwing", |inv: Invocation| async move {
            Err(ImpulseError::execution(inv.source, "gateway returned 502"))
        }))
    }

    fn config(toml: &str) -> ImpulseConfig {
        let mut config = ImpulseConfig::parse(toml).unwrap();
        config.scheduler.seed = Some(11);
        config
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(t0()))
    }

    #[tokio::test]
    async fn test_failing_trigger_is_isolated() {
        let clock = clock();
        let engine = Engine::builder(config(
            r#"
            [optimizer]
            enabled = false

            [[triggers]]
            name = "good"
            interval_secs = 300

            [[triggers]]
            name = "bad"
            interval_secs = 300

            [[streams]]
            name = "S1"
            target = 1000.0
            [streams.shares]
            good = 0.5
            bad = 0.5
            "#,
        ))
        .capability("good", fixed(100.0))
        .capability("bad", throwing())
        .clock(clock.clone())
        .build()
        .unwrap();

        let result = engine.run_cycle().await.unwrap();
        assert_eq!(result.triggers_fired, 2);
        assert_eq!(result.total_impact, 100.0);
        let bad = result.executions.iter().find(|r| r.source == "bad").unwrap();
        assert!(!bad.success);
        assert_eq!(bad.impact, 0.0);
        assert!(bad.error.as_deref().unwrap().contains("502"));
        assert_eq!(engine.utilization("S1").await, Some(0.05));

        // cooldown advanced for the failing trigger too
        clock.advance(chrono::Duration::minutes(1));
        let next = engine.run_cycle().await.unwrap();
        assert!(next.is_idle());

        let metrics = engine.metrics().await;
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.trigger_failures, 1);
    }

    #[tokio::test]
    async fn test_idle_cycle_changes_nothing() {
        let clock = clock();
        let engine = Engine::builder(config(
            r#"
            [[triggers]]
            name = "hourly"
            interval_secs = 3600

            [[streams]]
            name = "S1"
            target = 1000.0
            [streams.shares]
            hourly = 1.0
            "#,
        ))
        .capability("hourly", fixed(10.0))
        .clock(clock.clone())
        .build()
        .unwrap();

        engine.run_cycle().await.unwrap();
        let before = engine.streams().await;

        clock.advance(chrono::Duration::minutes(1));
        let idle = engine.run_cycle().await.unwrap();
        assert!(idle.is_idle());
        assert_eq!(idle.total_impact, 0.0);
        assert_eq!(idle.distributed, 0.0);
        assert!(idle.optimizations.is_empty());
        let after = engine.streams().await;
        assert_eq!(before[0].accumulated, after[0].accumulated);
    }

    #[tokio::test]
    async fn test_interval_extremes() {
        let clock = clock();
        let always = Arc::new(AtomicU32::new(0));
        let once = Arc::new(AtomicU32::new(0));
        let engine = Engine::builder(config(
            r#"
            [[triggers]]
            name = "always"
            interval_secs = 0

            [[triggers]]
            name = "once"
            interval_secs = 9223372036854775807
            "#,
        ))
        .capability("always", counting(always.clone(), 1.0))
        .capability("once", counting(once.clone(), 1.0))
        .clock(clock.clone())
        .build()
        .unwrap();

        for _ in 0..5 {
            engine.run_cycle().await.unwrap();
            clock.advance(chrono::Duration::days(3650));
        }
        assert_eq!(always.load(Ordering::SeqCst), 5);
        assert_eq!(once.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_opportunities_flow_into_streams() {
        let clock = clock();
        let engine = Engine::builder(config(
            r#"
            [optimizer]
            enabled = false

            [[opportunities]]
            name = "upsell"
            probability = 1.0
            cooldown_secs = 3600
            potential = [500.0, 500.0]
            confidence = [1.0, 1.0]

            [[opportunities]]
            name = "dormant"
            probability = 0.0
            potential = [1.0, 1.0]
            confidence = [1.0, 1.0]

            [[streams]]
            name = "product_sales"
            target = 10000.0
            [streams.shares]
            upsell = 0.6
            "#,
        ))
        .capability("upsell", fixed(0.0))
        .capability("dormant", fixed(0.0))
        .clock(clock.clone())
        .build()
        .unwrap();

        let result = engine.run_cycle().await.unwrap();
        assert_eq!(result.opportunities_acted, 1);
        assert_eq!(result.total_impact, 500.0);
        assert!((result.distributed - 300.0).abs() < 1e-9);

        clock.advance(chrono::Duration::minutes(10));
        assert!(engine.run_cycle().await.unwrap().is_idle());

        clock.advance(chrono::Duration::minutes(50));
        assert_eq!(engine.run_cycle().await.unwrap().opportunities_acted, 1);
    }

    #[tokio::test]
    async fn test_optimizer_runs_on_active_cycles() {
        let clock = clock();
        let engine = Engine::builder(config(
            r#"
            [[triggers]]
            name = "t1"
            interval_secs = 3600

            [[streams]]
            name = "S1"
            target = 1000.0
            [streams.shares]
            t1 = 0.5
            "#,
        ))
        .capability("t1", fixed(100.0))
        .clock(clock.clone())
        .build()
        .unwrap();

        let result = engine.run_cycle().await.unwrap();
        assert_eq!(result.optimizations.len(), 1);
        let boost = result.optimizations[0].boost;
        assert!((50.0..=150.0).contains(&boost));
        let accumulated = engine.streams().await[0].accumulated;
        assert!((accumulated - (50.0 + boost)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fire_now() {
        let clock = clock();
        let counter = Arc::new(AtomicU32::new(0));
        let engine = Engine::builder(config(
            r#"
            [[triggers]]
            name = "revenue_maximizer"
            interval_secs = 300
            "#,
        ))
        .capability("revenue_maximizer", counting(counter.clone(), 10.0))
        .clock(clock.clone())
        .build()
        .unwrap();

        engine.run_cycle().await.unwrap();
        let manual = engine.fire_now("revenue_maximizer").await.unwrap();
        assert!(manual.manual);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(matches!(
            engine.fire_now("ghost").await,
            Err(ImpulseError::UnknownSource(_))
        ));
        let metrics = engine.metrics().await;
        assert_eq!(metrics.cycles, 1);
        assert_eq!(metrics.manual_firings, 1);
    }

    #[tokio::test]
    async fn test_allocation_failure_abandons_cycle() {
        let clock = clock();
        let engine = Engine::builder(config(
            r#"
            [optimizer]
            enabled = false

            [[triggers]]
            name = "a"
            interval_secs = 3600

            [[triggers]]
            name = "b"
            interval_secs = 3600

            [[streams]]
            name = "S1"
            target = 1000.0
            [streams.shares]
            a = 1.0
            b = 1.0
            "#,
        ))
        .capability("a", fixed(f64::MAX))
        .capability("b", fixed(f64::MAX))
        .clock(clock.clone())
        .build()
        .unwrap();

        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, ImpulseError::Allocation(_)));
        assert_eq!(engine.state(), LoopState::Idle);

        let metrics = engine.metrics().await;
        assert_eq!(metrics.abandoned_cycles, 1);
        assert_eq!(metrics.triggers_fired, 2);
        assert!(metrics.last_error.unwrap().contains("overflow"));

        // next cycle proceeds normally
        clock.advance(chrono::Duration::minutes(1));
        assert!(engine.run_cycle().await.unwrap().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readers_never_see_a_partial_cycle() {
        let clock = clock();
        let slow: Arc<dyn Capability> = Arc::new(FnCapability::new("slow", |_inv: Invocation| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Outcome::success(100.0, 1))
        }));
        let engine = Arc::new(
            Engine::builder(config(
                r#"
                [[triggers]]
                name = "t1"
                interval_secs = 3600

                [[triggers]]
                name = "t2"
                interval_secs = 3600

                [[streams]]
                name = "S1"
                target = 1000.0
                accumulated = 200.0
                [streams.shares]
                t1 = 0.5
                t2 = 0.5
                "#,
            ))
            .capability("t1", fixed(100.0))
            .capability("t2", slow)
            .clock(clock.clone())
            .build()
            .unwrap(),
        );

        let mut state = engine.subscribe_state();
        let worker = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cycle().await })
        };
        state
            .wait_for(|s| *s == LoopState::Evaluating)
            .await
            .unwrap();

        // t1 has already run, t2 is still sleeping
        assert_eq!(engine.streams().await[0].accumulated, 200.0);
        let mid = engine.report().await;
        assert_eq!(mid.streams[0].accumulated, 200.0);
        assert_eq!(mid.metrics.cycles, 0);
        assert_eq!(mid.metrics.total_distributed, 0.0);

        let result = worker.await.unwrap().unwrap();
        assert_eq!(result.distributed, 100.0);
        let boost: f64 = result.optimizations.iter().map(|a| a.boost).sum();
        assert_eq!(result.optimizations.len(), 1);

        let after = engine.report().await;
        assert!((after.streams[0].accumulated - (200.0 + 100.0 + boost)).abs() < 1e-9);
        assert_eq!(after.metrics.cycles, 1);
        assert_eq!(after.metrics.total_distributed, 100.0);
        assert!((after.metrics.total_boost - boost).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_loop_cycle_leaves_state_for_the_loop() {
        let engine = Engine::builder(config(
            r#"
            [[triggers]]
            name = "pulse"
            interval_secs = 0
            "#,
        ))
        .capability("pulse", fixed(1.0))
        .clock(clock())
        .build()
        .unwrap();

        engine.run_loop_cycle().await.unwrap();
        assert_eq!(engine.state(), LoopState::Distributing);

        engine.run_cycle().await.unwrap();
        assert_eq!(engine.state(), LoopState::Idle);
    }

    #[test]
    fn test_build_validates_config() {
        let result = Engine::builder(config(
            r#"
            [[triggers]]
            name = "twin"
            interval_secs = 60

            [[triggers]]
            name = "twin"
            interval_secs = 120
            "#,
        ))
        .capability("twin", fixed(1.0))
        .build();
        match result {
            Err(ImpulseError::Config(msg)) => assert!(msg.contains("duplicate")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("engine built from duplicate triggers"),
        }
    }

    #[test]
    fn test_missing_capability_is_config_error() {
        let result = Engine::builder(config(
            r#"
            [[triggers]]
            name = "orphan"
            interval_secs = 60
            "#,
        ))
        .build();
        match result {
            Err(ImpulseError::Config(msg)) => assert!(msg.contains("orphan")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("engine built without capability"),
        }
    }

    #[test]
    fn test_builtin_config_builds_with_stub_capabilities() {
        let config = ImpulseConfig::builtin().unwrap();
        let mut set = CapabilitySet::new();
        for name in config.capabilities.keys() {
            set.insert(name, fixed(1.0));
        }
        let engine = Engine::builder(config).capabilities(set).build().unwrap();
        assert_eq!(engine.trigger_names().count(), 5);
        assert_eq!(engine.tick(), Duration::from_secs(60));
        assert_eq!(engine.state(), LoopState::Idle);
    }
}
