//! Invocation/outcome types exchanged between the scheduler and capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a unit of work came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Cooldown-gated scheduled trigger.
    Trigger,
    /// Probability-gated ad-hoc opportunity.
    Opportunity,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Trigger => write!(f, "trigger"),
            SourceKind::Opportunity => write!(f, "opportunity"),
        }
    }
}

/// What the scheduler hands to a capability when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Trigger name or opportunity category.
    pub source: String,
    pub kind: SourceKind,
    /// Snapshot of the cycle clock.
    pub fired_at: DateTime<Utc>,
    /// Static effectiveness coefficient (triggers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effectiveness: Option<f64>,
    /// Sampled potential impact (opportunities only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_impact: Option<f64>,
    /// Sampled confidence (opportunities only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Invocation {
    /// Invocation for a scheduled trigger.
    pub fn trigger(name: &str, effectiveness: f64, fired_at: DateTime<Utc>) -> Self {
        Self {
            source: name.to_string(),
            kind: SourceKind::Trigger,
            fired_at,
            effectiveness: Some(effectiveness),
            potential_impact: None,
            confidence: None,
        }
    }

    /// Invocation for a detected opportunity.
    pub fn opportunity(
        category: &str,
        potential_impact: f64,
        confidence: f64,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: category.to_string(),
            kind: SourceKind::Opportunity,
            fired_at,
            effectiveness: None,
            potential_impact: Some(potential_impact),
            confidence: Some(confidence),
        }
    }
}

/// What a capability reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// Numeric impact produced by the action.
    #[serde(default)]
    pub impact: f64,
    /// Number of sub-actions the capability performed.
    #[serde(default)]
    pub sub_actions: u32,
}

impl Outcome {
    pub fn success(impact: f64, sub_actions: u32) -> Self {
        Self {
            success: true,
            impact,
            sub_actions,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            impact: 0.0,
            sub_actions: 0,
        }
    }

    /// Impact clamped to a finite, non-negative value.
    pub fn sanitized_impact(&self) -> f64 {
        if self.impact.is_finite() && self.impact > 0.0 {
            self.impact
        } else {
            0.0
        }
    }
}
