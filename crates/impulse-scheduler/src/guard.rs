//! Isolation around capability calls: errors, panics and overruns all
//! come back as a plain failure reason so the cycle keeps going.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use impulse_core::{Capability, Invocation, Outcome};

/// Run a capability within `budget`.
pub(crate) async fn invoke(
    capability: &Arc<dyn Capability>,
    invocation: &Invocation,
    budget: Duration,
) -> Result<Outcome, String> {
    let call = AssertUnwindSafe(capability.execute(invocation)).catch_unwind();
    match tokio::time::timeout(budget, call).await {
        Ok(Ok(Ok(outcome))) => Ok(outcome),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(panic)) => Err(format!("capability panicked: {}", panic_message(&*panic))),
        Err(_) => Err(format!("timed out after {:?}", budget)),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
