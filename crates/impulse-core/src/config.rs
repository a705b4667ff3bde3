//! Impulse configuration system.
//!
//! Loaded once at startup. Every definition error is reported as
//! [`ImpulseError::Config`] before the scheduler is allowed to start.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImpulseError, Result};

/// Bundled default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpulseConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub opportunities: Vec<OpportunityConfig>,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    /// Host-side capability bindings, keyed by reference name.
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilityConfig>,
}

impl ImpulseConfig {
    /// Load config from the default path (~/.impulse/config.toml),
    /// falling back to the bundled defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Self::builtin()
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImpulseError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ImpulseError::Config(format!("Failed to parse config: {e}")))
    }

    /// The bundled default configuration.
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ImpulseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Impulse home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".impulse")
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerConfig> {
        self.triggers.iter().find(|t| t.name == name)
    }

    pub fn opportunity(&self, name: &str) -> Option<&OpportunityConfig> {
        self.opportunities.iter().find(|o| o.name == name)
    }

    /// Startup validation of every definition.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.detector.validate()?;
        self.optimizer.validate()?;

        let mut sources = HashSet::new();
        for trigger in &self.triggers {
            trigger.validate()?;
            if !sources.insert(trigger.name.as_str()) {
                return Err(config_err(format!(
                    "duplicate trigger name '{}'",
                    trigger.name
                )));
            }
        }
        for opportunity in &self.opportunities {
            opportunity.validate()?;
            if !sources.insert(opportunity.name.as_str()) {
                return Err(config_err(format!(
                    "opportunity category '{}' collides with another source",
                    opportunity.name
                )));
            }
        }

        let mut streams = HashSet::new();
        let mut share_totals: BTreeMap<&str, f64> = BTreeMap::new();
        for stream in &self.streams {
            stream.validate()?;
            if !streams.insert(stream.name.as_str()) {
                return Err(config_err(format!("duplicate stream name '{}'", stream.name)));
            }
            for (source, share) in &stream.shares {
                if !sources.contains(source.as_str()) {
                    return Err(config_err(format!(
                        "stream '{}' routes from unknown source '{}'",
                        stream.name, source
                    )));
                }
                *share_totals.entry(source.as_str()).or_default() += share;
            }
        }
        for (source, total) in share_totals {
            if total > 1.0 + f64::EPSILON {
                tracing::warn!(
                    "⚠️ Shares for '{}' sum to {:.2}; distribution will amplify impact",
                    source,
                    total
                );
            }
        }

        for (name, capability) in &self.capabilities {
            capability
                .validate()
                .map_err(|e| config_err(format!("capability '{name}': {e}")))?;
        }
        Ok(())
    }
}

fn config_err(msg: String) -> ImpulseError {
    ImpulseError::Config(msg)
}

fn check_unit(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(config_err(format!("{what} must be within [0, 1], got {value}")))
    }
}

fn check_range(what: &str, range: [f64; 2]) -> Result<()> {
    let [min, max] = range;
    if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
        return Err(config_err(format!(
            "{what} must be a non-negative [min, max] range, got [{min}, {max}]"
        )));
    }
    Ok(())
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(config_err(format!("{what} name must not be empty")));
    }
    Ok(())
}

/// Loop cadence and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sleep between cycles.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Sleep after an abandoned cycle.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Upper bound for a single capability call.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Cycle results kept for debugging.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Fixed RNG seed for detection and optimization (None = entropy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_tick_secs() -> u64 { 60 }
fn default_error_backoff_secs() -> u64 { 30 }
fn default_execution_timeout_secs() -> u64 { 30 }
fn default_history_size() -> usize { 50 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            history_size: default_history_size(),
            seed: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_secs == 0 {
            return Err(config_err("scheduler.tick_secs must be > 0".into()));
        }
        if self.execution_timeout_secs == 0 {
            return Err(config_err("scheduler.execution_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Opportunity detection defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Per-cycle selection probability for categories that don't set one.
    #[serde(default = "default_probability")]
    pub default_probability: f64,
    /// Per-category cooldown for categories that don't set one.
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,
    /// Fraction of potential realized when resolution fails.
    #[serde(default = "default_partial_ratio")]
    pub partial_ratio: f64,
}

fn default_probability() -> f64 { 0.3 }
fn default_cooldown_secs() -> u64 { 3600 }
fn default_partial_ratio() -> f64 { 0.3 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            default_probability: default_probability(),
            default_cooldown_secs: default_cooldown_secs(),
            partial_ratio: default_partial_ratio(),
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> Result<()> {
        check_unit("detector.default_probability", self.default_probability)?;
        check_unit("detector.partial_ratio", self.partial_ratio)
    }
}

/// Stream rebalancing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Streams below this utilization get a boost.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_boost_min")]
    pub boost_min: f64,
    #[serde(default = "default_boost_max")]
    pub boost_max: f64,
}

fn bool_true() -> bool { true }
fn default_threshold() -> f64 { 0.8 }
fn default_boost_min() -> f64 { 0.05 }
fn default_boost_max() -> f64 { 0.15 }

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            boost_min: default_boost_min(),
            boost_max: default_boost_max(),
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(config_err(format!(
                "optimizer.threshold must be >= 0, got {}",
                self.threshold
            )));
        }
        check_range("optimizer boost", [self.boost_min, self.boost_max])
    }
}

/// A cooldown-gated trigger definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    /// Minimum seconds between firings (0 = every cycle).
    pub interval_secs: u64,
    #[serde(default = "default_effectiveness")]
    pub effectiveness: f64,
    /// Capability reference; defaults to the trigger name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

fn default_effectiveness() -> f64 { 1.0 }

impl TriggerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn capability_ref(&self) -> &str {
        self.capability.as_deref().unwrap_or(&self.name)
    }

    fn validate(&self) -> Result<()> {
        check_name("trigger", &self.name)?;
        check_unit(&format!("trigger '{}' effectiveness", self.name), self.effectiveness)
    }
}

/// An opportunity category definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityConfig {
    pub name: String,
    /// Per-cycle selection probability (None = detector default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    /// Category cooldown (None = detector default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    /// Potential impact range sampled on detection.
    pub potential: [f64; 2],
    /// Confidence range sampled on detection.
    pub confidence: [f64; 2],
    /// Capability reference; defaults to the category name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl OpportunityConfig {
    pub fn probability_or(&self, detector: &DetectorConfig) -> f64 {
        self.probability.unwrap_or(detector.default_probability)
    }

    pub fn cooldown_or(&self, detector: &DetectorConfig) -> Duration {
        Duration::from_secs(self.cooldown_secs.unwrap_or(detector.default_cooldown_secs))
    }

    pub fn capability_ref(&self) -> &str {
        self.capability.as_deref().unwrap_or(&self.name)
    }

    fn validate(&self) -> Result<()> {
        check_name("opportunity", &self.name)?;
        if let Some(p) = self.probability {
            check_unit(&format!("opportunity '{}' probability", self.name), p)?;
        }
        check_range(&format!("opportunity '{}' potential", self.name), self.potential)?;
        check_range(&format!("opportunity '{}' confidence", self.name), self.confidence)?;
        if self.confidence[1] > 1.0 {
            return Err(config_err(format!(
                "opportunity '{}' confidence must not exceed 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// A weighted stream definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    /// Value representing full utilization.
    pub target: f64,
    /// Starting accumulated value.
    #[serde(default)]
    pub accumulated: f64,
    /// Whether the optimizer may boost this stream.
    #[serde(default = "bool_true")]
    pub auto_optimize: bool,
    /// Share of each source's impact routed to this stream.
    #[serde(default)]
    pub shares: BTreeMap<String, f64>,
}

impl StreamConfig {
    fn validate(&self) -> Result<()> {
        check_name("stream", &self.name)?;
        if !self.target.is_finite() || self.target <= 0.0 {
            return Err(config_err(format!(
                "stream '{}' target must be > 0, got {}",
                self.name, self.target
            )));
        }
        if !self.accumulated.is_finite() || self.accumulated < 0.0 {
            return Err(config_err(format!(
                "stream '{}' accumulated must be >= 0",
                self.name
            )));
        }
        for (source, share) in &self.shares {
            check_unit(&format!("stream '{}' share for '{}'", self.name, source), *share)?;
        }
        Ok(())
    }
}

/// Host-side capability binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityConfig {
    /// Random outcome within configured ranges.
    Simulated(SimulatedConfig),
    /// HTTP call to an external service.
    Webhook(WebhookConfig),
}

impl CapabilityConfig {
    fn validate(&self) -> Result<()> {
        match self {
            CapabilityConfig::Simulated(sim) => {
                check_unit("success_rate", sim.success_rate)?;
                check_range("impact", sim.impact)?;
                if sim.actions[0] > sim.actions[1] {
                    return Err(config_err("actions must be a [min, max] range".into()));
                }
                Ok(())
            }
            CapabilityConfig::Webhook(hook) => {
                if !hook.url.starts_with("http://") && !hook.url.starts_with("https://") {
                    return Err(config_err(format!("invalid webhook url '{}'", hook.url)));
                }
                if hook.timeout_secs == 0 {
                    return Err(config_err("timeout_secs must be > 0".into()));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub impact: [f64; 2],
    #[serde(default = "default_actions")]
    pub actions: [u32; 2],
}

fn default_success_rate() -> f64 { 1.0 }
fn default_actions() -> [u32; 2] { [1, 1] }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String { "POST".into() }
fn default_webhook_timeout() -> u64 { 10 }
