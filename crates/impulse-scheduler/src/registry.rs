//! Trigger registry: named, cooldown-gated units of scheduled work.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use impulse_core::{Capability, ImpulseError, Invocation, Result};
use serde::Serialize;

use crate::cooldown::Cooldown;
use crate::guard;

/// A trigger definition.
#[derive(Debug, Clone, Serialize)]
pub struct Trigger {
    pub name: String,
    /// Minimum time between firings.
    pub interval: Duration,
    /// Static effectiveness coefficient (0–1), passed to the capability.
    pub effectiveness: f64,
}

/// Result of executing one trigger.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub source: String,
    pub success: bool,
    /// Zero unless `success`.
    pub impact: f64,
    pub sub_impact_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TriggerSlot {
    trigger: Trigger,
    capability: Arc<dyn Capability>,
    cooldown: Cooldown,
    fire_count: u64,
}

/// Registered triggers in registration order.
pub struct TriggerRegistry {
    slots: Vec<TriggerSlot>,
    budget: Duration,
}

impl TriggerRegistry {
    /// `budget` bounds every capability call.
    pub fn new(budget: Duration) -> Self {
        Self {
            slots: Vec::new(),
            budget,
        }
    }

    /// Register a trigger. Names must be unique.
    pub fn register(&mut self, trigger: Trigger, capability: Arc<dyn Capability>) -> Result<()> {
        if self.slots.iter().any(|s| s.trigger.name == trigger.name) {
            return Err(ImpulseError::Config(format!(
                "trigger '{}' already registered",
                trigger.name
            )));
        }
        tracing::info!(
            "📅 Trigger registered: '{}' (every {}s, effectiveness {:.2})",
            trigger.name,
            trigger.interval.as_secs(),
            trigger.effectiveness
        );
        self.slots.push(TriggerSlot {
            cooldown: Cooldown::new(trigger.interval),
            trigger,
            capability,
            fire_count: 0,
        });
        Ok(())
    }

    /// Every trigger whose cooldown has elapsed, in registration order.
    pub fn due_triggers(&self, now: DateTime<Utc>) -> Vec<&Trigger> {
        self.slots
            .iter()
            .filter(|s| s.cooldown.is_ready(now))
            .map(|s| &s.trigger)
            .collect()
    }

    /// Record a firing. Called once per execution whatever its outcome.
    pub fn mark_fired(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let slot = self.slot_mut(name)?;
        slot.cooldown.mark(now);
        slot.fire_count += 1;
        Ok(())
    }

    /// Run the trigger's capability. Capability failures are folded into
    /// the result; only an unknown name is an error.
    pub async fn execute(&self, name: &str, now: DateTime<Utc>) -> Result<ExecutionResult> {
        let slot = self.slot(name)?;
        let invocation = Invocation::trigger(name, slot.trigger.effectiveness, now);

        let result = match guard::invoke(&slot.capability, &invocation, self.budget).await {
            Ok(outcome) if outcome.success => ExecutionResult {
                source: name.to_string(),
                success: true,
                impact: outcome.sanitized_impact(),
                sub_impact_count: outcome.sub_actions,
                error: None,
            },
            Ok(outcome) => ExecutionResult {
                source: name.to_string(),
                success: false,
                impact: 0.0,
                sub_impact_count: outcome.sub_actions,
                error: Some("capability reported failure".into()),
            },
            Err(reason) => ExecutionResult {
                source: name.to_string(),
                success: false,
                impact: 0.0,
                sub_impact_count: 0,
                error: Some(reason),
            },
        };

        if let Some(err) = &result.error {
            tracing::warn!(
                "⚠️ Trigger '{}' ({}) failed: {}",
                name,
                slot.capability.name(),
                err
            );
        } else {
            tracing::debug!("✅ Trigger '{}' impact {:.2}", name, result.impact);
        }
        Ok(result)
    }

    /// Execute, then mark fired regardless of outcome.
    pub async fn fire(&mut self, name: &str, now: DateTime<Utc>) -> Result<ExecutionResult> {
        let result = self.execute(name, now).await?;
        self.mark_fired(name, now)?;
        Ok(result)
    }

    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.slots
            .iter()
            .find(|s| s.trigger.name == name)
            .map(|s| &s.trigger)
    }

    pub fn last_fired(&self, name: &str) -> Option<DateTime<Utc>> {
        self.slot(name).ok()?.cooldown.last_fired()
    }

    /// When the trigger becomes due again (`None` = due now or never).
    pub fn next_due(&self, name: &str) -> Option<DateTime<Utc>> {
        self.slot(name).ok()?.cooldown.next_ready()
    }

    pub fn fire_count(&self, name: &str) -> u64 {
        self.slot(name).map(|s| s.fire_count).unwrap_or(0)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.slots.iter().map(|s| &s.trigger)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, name: &str) -> Result<&TriggerSlot> {
        self.slots
            .iter()
            .find(|s| s.trigger.name == name)
            .ok_or_else(|| ImpulseError::UnknownSource(name.to_string()))
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut TriggerSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.trigger.name == name)
            .ok_or_else(|| ImpulseError::UnknownSource(name.to_string()))
    }
}
