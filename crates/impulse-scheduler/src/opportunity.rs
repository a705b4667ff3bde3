//! Opportunity detector: ad-hoc, probability-gated work that is not bound
//! to a fixed interval.
//!
//! Each `detect` call runs one Bernoulli trial per category (in registration
//! order). A selected category enters its cooldown immediately, so the same
//! kind of opportunity is acted on at most once per window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use impulse_core::{Capability, ImpulseError, Invocation, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use crate::cooldown::Cooldown;
use crate::guard;

/// A configured opportunity category.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityCategory {
    pub name: String,
    /// Per-cycle selection probability.
    pub probability: f64,
    /// Minimum time between two opportunities of this category.
    pub cooldown: Duration,
    /// Potential impact sampled on detection.
    pub potential: [f64; 2],
    /// Confidence sampled on detection.
    pub confidence: [f64; 2],
}

/// A detected opportunity. Lives for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    /// Category name; doubles as the cooldown key.
    pub category: String,
    pub potential_impact: f64,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

/// Result of resolving an opportunity.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub category: String,
    pub success: bool,
    pub impact: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct CategorySlot {
    category: OpportunityCategory,
    capability: Arc<dyn Capability>,
    cooldown: Cooldown,
}

pub struct OpportunityDetector {
    slots: Vec<CategorySlot>,
    rng: StdRng,
    /// Share of potential realized when resolution fails.
    partial_ratio: f64,
    budget: Duration,
}

impl OpportunityDetector {
    pub fn new(rng: StdRng, partial_ratio: f64, budget: Duration) -> Self {
        Self {
            slots: Vec::new(),
            rng,
            partial_ratio: partial_ratio.clamp(0.0, 1.0),
            budget,
        }
    }

    pub fn register(
        &mut self,
        category: OpportunityCategory,
        capability: Arc<dyn Capability>,
    ) -> Result<()> {
        if self.slots.iter().any(|s| s.category.name == category.name) {
            return Err(ImpulseError::Config(format!(
                "opportunity category '{}' already registered",
                category.name
            )));
        }
        tracing::info!(
            "🎯 Opportunity category registered: '{}' (p={:.2}, cooldown {}s)",
            category.name,
            category.probability,
            category.cooldown.as_secs()
        );
        self.slots.push(CategorySlot {
            cooldown: Cooldown::new(category.cooldown),
            category,
            capability,
        });
        Ok(())
    }

    /// One independent trial per category not in cooldown.
    pub fn detect(&mut self, now: DateTime<Utc>) -> Vec<Opportunity> {
        let mut found = Vec::new();
        for slot in self.slots.iter_mut() {
            if !slot.cooldown.is_ready(now) {
                continue;
            }
            let p = slot.category.probability.clamp(0.0, 1.0);
            if !self.rng.gen_bool(p) {
                continue;
            }
            let potential = sample(&mut self.rng, slot.category.potential);
            let confidence = sample(&mut self.rng, slot.category.confidence).clamp(0.0, 1.0);
            slot.cooldown.mark(now);
            tracing::debug!(
                "🔎 Opportunity '{}' detected: potential {:.2}, confidence {:.2}",
                slot.category.name,
                potential,
                confidence
            );
            found.push(Opportunity {
                category: slot.category.name.clone(),
                potential_impact: potential,
                confidence,
                detected_at: now,
            });
        }
        found
    }

    /// Invoke the category's capability, then gate the result on the
    /// opportunity's confidence. Only a successful call that also passes the
    /// confidence draw realizes `potential * confidence`; anything else
    /// realizes the partial ratio.
    pub async fn resolve(&mut self, opportunity: &Opportunity) -> Result<ResolutionResult> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.category.name == opportunity.category)
            .ok_or_else(|| ImpulseError::UnknownSource(opportunity.category.clone()))?;

        let invocation = Invocation::opportunity(
            &opportunity.category,
            opportunity.potential_impact,
            opportunity.confidence,
            opportunity.detected_at,
        );
        let outcome = guard::invoke(&slot.capability, &invocation, self.budget).await;
        let potential = opportunity.potential_impact.max(0.0);
        let confidence = opportunity.confidence.clamp(0.0, 1.0);
        let partial = ResolutionResult {
            category: opportunity.category.clone(),
            success: false,
            impact: potential * self.partial_ratio,
            error: None,
        };

        let result = match outcome {
            Ok(outcome) if outcome.success => {
                if self.rng.gen_bool(confidence) {
                    ResolutionResult {
                        category: opportunity.category.clone(),
                        success: true,
                        impact: potential * confidence,
                        error: None,
                    }
                } else {
                    ResolutionResult {
                        error: Some(format!("not converted (confidence {confidence:.2})")),
                        ..partial
                    }
                }
            }
            Ok(_) => ResolutionResult {
                error: Some("capability reported failure".into()),
                ..partial
            },
            Err(reason) => ResolutionResult {
                error: Some(reason),
                ..partial
            },
        };

        if let Some(err) = &result.error {
            tracing::warn!(
                "⚠️ Opportunity '{}' unresolved ({}), partial impact {:.2}",
                opportunity.category,
                err,
                result.impact
            );
        } else {
            tracing::info!(
                "💡 Opportunity '{}' resolved, impact {:.2}",
                opportunity.category,
                result.impact
            );
        }
        Ok(result)
    }

    pub fn categories(&self) -> impl Iterator<Item = &OpportunityCategory> {
        self.slots.iter().map(|s| &s.category)
    }

    pub fn last_detected(&self, category: &str) -> Option<DateTime<Utc>> {
        self.slots
            .iter()
            .find(|s| s.category.name == category)
            .and_then(|s| s.cooldown.last_fired())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn sample(rng: &mut StdRng, [min, max]: [f64; 2]) -> f64 {
    if max > min {
        rng.gen_range(min..=max)
    } else {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use impulse_core::{FnCapability, Outcome};
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn category(name: &str, probability: f64, cooldown_secs: u64) -> OpportunityCategory {
        OpportunityCategory {
            name: name.into(),
            probability,
            cooldown: Duration::from_secs(cooldown_secs),
            potential: [1000.0, 1000.0],
            confidence: [0.8, 0.8],
        }
    }

    fn succeed() -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("succeed", |_inv: Invocation| async {
            Ok(Outcome::success(0.0, 1))
        }))
    }

    fn refuse() -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("refuse", |_inv: Invocation| async {
            Ok(Outcome::failure())
        }))
    }

    fn detector() -> OpportunityDetector {
        OpportunityDetector::new(StdRng::seed_from_u64(7), 0.3, Duration::from_secs(5))
    }

    #[test]
    fn test_zero_probability_never_detected() {
        let mut det = detector();
        det.register(category("never", 0.0, 0), succeed()).unwrap();
        det.register(category("often", 0.5, 0), succeed()).unwrap();
        for i in 0..1000 {
            let now = t0() + chrono::Duration::seconds(i);
            assert!(det.detect(now).iter().all(|o| o.category != "never"));
        }
    }

    #[test]
    fn test_certain_probability_respects_cooldown() {
        let mut det = detector();
        det.register(category("upsell", 1.0, 3600), succeed()).unwrap();

        assert_eq!(det.detect(t0()).len(), 1);
        assert!(det.detect(t0() + chrono::Duration::minutes(59)).is_empty());
        assert_eq!(det.detect(t0() + chrono::Duration::minutes(60)).len(), 1);
        assert_eq!(
            det.last_detected("upsell"),
            Some(t0() + chrono::Duration::minutes(60))
        );
    }

    #[test]
    fn test_registration_order_and_sampling() {
        let mut det = detector();
        let mut wide = category("wide", 1.0, 0);
        wide.potential = [500.0, 3000.0];
        wide.confidence = [0.8, 0.95];
        det.register(category("first", 1.0, 0), succeed()).unwrap();
        det.register(wide, succeed()).unwrap();

        for i in 0..50 {
            let found = det.detect(t0() + chrono::Duration::seconds(i));
            assert_eq!(found.len(), 2);
            assert_eq!(found[0].category, "first");
            assert_eq!(found[1].category, "wide");
            assert!((500.0..=3000.0).contains(&found[1].potential_impact));
            assert!((0.8..=0.95).contains(&found[1].confidence));
        }
    }

    #[test]
    fn test_seeded_detection_is_reproducible() {
        let run = || {
            let mut det = detector();
            det.register(category("a", 0.3, 0), succeed()).unwrap();
            det.register(category("b", 0.3, 0), succeed()).unwrap();
            (0..100)
                .map(|i| det.detect(t0() + chrono::Duration::seconds(i)).len())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_resolve_success_uses_confidence() {
        let mut det = detector();
        let mut certain = category("upsell", 1.0, 0);
        certain.confidence = [1.0, 1.0];
        det.register(certain, succeed()).unwrap();
        let opp = det.detect(t0()).pop().unwrap();
        let result = det.resolve(&opp).await.unwrap();
        assert!(result.success);
        assert!((result.impact - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_confidence_gates_resolution() {
        let mut det = detector();
        let mut even = category("cross_sell", 1.0, 0);
        even.confidence = [0.5, 0.5];
        det.register(even, succeed()).unwrap();

        let mut successes = 0;
        for i in 0..1000 {
            let opp = det.detect(t0() + chrono::Duration::seconds(i)).pop().unwrap();
            let result = det.resolve(&opp).await.unwrap();
            if result.success {
                successes += 1;
                assert!((result.impact - 500.0).abs() < 1e-9);
            } else {
                assert!((result.impact - 300.0).abs() < 1e-9);
            }
        }
        assert!((400..=600).contains(&successes), "{successes} of 1000 converted");
    }

    #[tokio::test]
    async fn test_zero_confidence_yields_partial() {
        let mut det = detector();
        let mut hopeless = category("new_market", 1.0, 0);
        hopeless.confidence = [0.0, 0.0];
        det.register(hopeless, succeed()).unwrap();
        for i in 0..20 {
            let opp = det.detect(t0() + chrono::Duration::seconds(i)).pop().unwrap();
            let result = det.resolve(&opp).await.unwrap();
            assert!(!result.success);
            assert!((result.impact - 300.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_resolve_failure_yields_partial() {
        let mut det = detector();
        det.register(category("retention", 1.0, 0), refuse()).unwrap();
        let opp = det.detect(t0()).pop().unwrap();
        let result = det.resolve(&opp).await.unwrap();
        assert!(!result.success);
        assert!((result.impact - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_resolve_failure_with_zero_ratio() {
        let mut det = OpportunityDetector::new(StdRng::seed_from_u64(1), 0.0, Duration::from_secs(5));
        det.register(category("retention", 1.0, 0), refuse()).unwrap();
        let opp = det.detect(t0()).pop().unwrap();
        assert_eq!(det.resolve(&opp).await.unwrap().impact, 0.0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_category() {
        let mut det = detector();
        let opp = Opportunity {
            category: "ghost".into(),
            potential_impact: 10.0,
            confidence: 0.5,
            detected_at: t0(),
        };
        assert!(det.resolve(&opp).await.is_err());
    }
}
