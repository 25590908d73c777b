//! Operation Context
//!
//! Request metadata that travels with a ledger command into its outbox rows.

use serde::{Deserialize, Serialize};

/// Context for an operation, used for tracing events back to their request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Correlation ID copied onto every outbox message the operation emits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Module or principal that issued the command (e.g. "wallet", "payments")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Create context with the issuing module or principal
    pub fn with_initiator(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = Some(initiated_by.into());
        self
    }
}
