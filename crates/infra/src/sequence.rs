//! Per-tenant order numbers.

use std::collections::HashMap;
use std::sync::Mutex;

use mealflow_core::TenantId;

use crate::error::FulfillmentError;

/// Hands out human-facing order numbers, monotonically increasing per tenant.
///
/// A number taken by a checkout that later fails is not reused.
pub trait OrderNumbers: Send + Sync {
    fn next(&self, tenant_id: TenantId) -> Result<u64, FulfillmentError>;
}

#[derive(Debug, Default)]
pub struct InMemoryOrderNumbers {
    counters: Mutex<HashMap<TenantId, u64>>,
}

impl InMemoryOrderNumbers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderNumbers for InMemoryOrderNumbers {
    fn next(&self, tenant_id: TenantId) -> Result<u64, FulfillmentError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| FulfillmentError::Store("order number lock poisoned".to_string()))?;
        let counter = counters.entry(tenant_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
