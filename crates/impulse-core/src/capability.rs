//! Capability seam: the host-supplied callables that perform real domain
//! actions ("send campaign", "apply discount") when a trigger fires or an
//! opportunity is resolved. The scheduler never implements these itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Invocation, Outcome};

/// A pluggable action bound to a trigger or opportunity category.
///
/// Implementations performing real I/O should bound their own latency;
/// the scheduler additionally enforces an execution budget.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Capability name (used in logs).
    fn name(&self) -> &str;

    /// Perform the action.
    async fn execute(&self, invocation: &Invocation) -> Result<Outcome>;
}

/// Adapter turning an async closure into a [`Capability`].
pub struct FnCapability<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnCapability<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Outcome> {
        (self.f)(invocation.clone()).await
    }
}

/// Named capabilities supplied by the host application.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a capability under a reference name. Replaces any previous binding.
    pub fn insert(&mut self, name: &str, capability: Arc<dyn Capability>) {
        if self.entries.insert(name.to_string(), capability).is_some() {
            tracing::debug!("🔁 Capability '{}' rebound", name);
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: &str, capability: Arc<dyn Capability>) -> Self {
        self.insert(name, capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("names", &self.names())
            .finish()
    }
}
