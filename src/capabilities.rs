//! Host-side capabilities bound from the `[capabilities]` config table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use impulse_core::config::{CapabilityConfig, ImpulseConfig, SimulatedConfig, WebhookConfig};
use impulse_core::{Capability, CapabilitySet, ImpulseError, Invocation, Outcome, Result};
use rand::Rng;

/// Rolls a random outcome within configured ranges.
pub struct SimulatedCapability {
    name: String,
    config: SimulatedConfig,
}

impl SimulatedCapability {
    pub fn new(name: &str, config: SimulatedConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    fn roll(&self) -> Outcome {
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.config.success_rate.clamp(0.0, 1.0)) {
            return Outcome::failure();
        }
        let [lo, hi] = self.config.impact;
        let impact = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
        let [min_actions, max_actions] = self.config.actions;
        let actions = if max_actions > min_actions {
            rng.gen_range(min_actions..=max_actions)
        } else {
            min_actions
        };
        Outcome::success(impact, actions)
    }
}

#[async_trait]
impl Capability for SimulatedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Outcome> {
        let outcome = self.roll();
        tracing::debug!(
            "🎲 Simulated '{}' for {} '{}': success={}, impact {:.2}",
            self.name,
            invocation.kind,
            invocation.source,
            outcome.success,
            outcome.impact
        );
        Ok(outcome)
    }
}

/// Sends the invocation as JSON and reads an [`Outcome`] back.
pub struct WebhookCapability {
    name: String,
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookCapability {
    pub fn new(name: &str, config: WebhookConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Capability for WebhookCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Outcome> {
        let url = self.config.url.as_str();
        tracing::debug!("🌐 Webhook '{}': {} {}", self.name, self.config.method, url);

        let mut req = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(url),
            "GET" => self.client.get(url),
            _ => self.client.post(url),
        };
        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .json(invocation)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| ImpulseError::execution(&invocation.source, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ImpulseError::execution(
                &invocation.source,
                format!("webhook '{}' returned {}", self.name, status),
            ));
        }
        resp.json::<Outcome>().await.map_err(|e| {
            ImpulseError::execution(&invocation.source, format!("invalid webhook response: {e}"))
        })
    }
}

/// One capability per `[capabilities.<name>]` entry.
pub fn build_capabilities(config: &ImpulseConfig) -> CapabilitySet {
    let mut set = CapabilitySet::new();
    for (name, entry) in &config.capabilities {
        let capability: Arc<dyn Capability> = match entry {
            CapabilityConfig::Simulated(sim) => Arc::new(SimulatedCapability::new(name, sim.clone())),
            CapabilityConfig::Webhook(hook) => Arc::new(WebhookCapability::new(name, hook.clone())),
        };
        set.insert(name, capability);
    }
    set
}
