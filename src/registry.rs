//! Registry holding one retry policy per task type.
//!
//! Lookups hand out clones, so a policy update never changes the parameters of a decision
//! that is already in flight.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::policy::{PolicyError, RetryPolicy, RetryPolicyPatch};
use tracing::{info, warn};

/// Trait for policy registries (injectable into the decision engine).
pub trait PolicyRegistry: Send + Sync + std::fmt::Debug {
    /// Register a policy, replacing any existing policy for the same task type.
    fn register(&self, policy: RetryPolicy) -> Result<(), PolicyError>;
    /// Get the policy for a task type.
    fn lookup(&self, task_type: &str) -> Option<RetryPolicy>;
    /// Apply a partial update, erroring if the task type was never registered.
    fn update(&self, task_type: &str, patch: &RetryPolicyPatch)
        -> Result<RetryPolicy, PolicyError>;
    /// Snapshot all policies sorted by task type.
    fn snapshot(&self) -> Vec<RetryPolicy>;
}

/// In-memory implementation backed by an RwLock.
#[derive(Default, Clone, Debug)]
pub struct InMemoryPolicyRegistry {
    inner: Arc<RwLock<HashMap<String, RetryPolicy>>>,
}

impl InMemoryPolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `policies`.
    pub fn with_policies<I>(policies: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = RetryPolicy>,
    {
        let registry = Self::new();
        for policy in policies {
            registry.register(policy)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyRegistry for InMemoryPolicyRegistry {
    fn register(&self, policy: RetryPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(policy.task_type()) {
            warn!(
                target: "afterlife::registry",
                task_type = %policy.task_type(),
                "retry policy replaced; last registration wins"
            );
        }
        map.insert(policy.task_type().to_string(), policy);
        Ok(())
    }

    fn lookup(&self, task_type: &str) -> Option<RetryPolicy> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(task_type).cloned()
    }

    fn update(
        &self,
        task_type: &str,
        patch: &RetryPolicyPatch,
    ) -> Result<RetryPolicy, PolicyError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let current = map
            .get(task_type)
            .ok_or_else(|| PolicyError::NotFound { task_type: task_type.to_string() })?;
        let updated = current.apply(patch)?;
        map.insert(task_type.to_string(), updated.clone());
        info!(target: "afterlife::registry", task_type = %task_type, "retry policy updated");
        Ok(updated)
    }

    fn snapshot(&self) -> Vec<RetryPolicy> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut policies: Vec<RetryPolicy> = map.values().cloned().collect();
        policies.sort_by(|a, b| a.task_type().cmp(b.task_type()));
        policies
    }
}
