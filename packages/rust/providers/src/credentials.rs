//! Per-run credential pool with random selection and retirement.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use aibridge_shared::mask_credential;

/// Credentials of one provider. Retired keys stay out of rotation until
/// [`CredentialPool::reset`].
#[derive(Debug, Default)]
pub struct CredentialPool {
    keys: Vec<String>,
    retired: Mutex<HashSet<String>>,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Uniformly random key among those not yet retired.
    pub fn pick(&self) -> Option<String> {
        let retired = self.retired();
        let available: Vec<&String> = self.keys.iter().filter(|k| !retired.contains(*k)).collect();
        if available.is_empty() {
            return None;
        }
        Some(available[fastrand::usize(..available.len())].clone())
    }

    /// Take `key` out of rotation for the rest of the run.
    pub fn retire(&self, key: &str) {
        if self.retired().insert(key.to_string()) {
            tracing::debug!(key = %mask_credential(key), "credential retired");
        }
    }

    /// Number of keys still eligible.
    pub fn available(&self) -> usize {
        let retired = self.retired();
        self.keys.iter().filter(|k| !retired.contains(*k)).count()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Put every key back into rotation.
    pub fn reset(&self) {
        self.retired().clear();
    }

    fn retired(&self) -> MutexGuard<'_, HashSet<String>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
