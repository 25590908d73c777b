//! Outbox Message
//!
//! Row shape of `outbox_messages` and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{LedgerEvent, OperationContext};

/// Delivery status of an outbox message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
        }
    }

    /// Completed and Failed are never picked up again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Failed)
    }

    /// Allowed lifecycle moves.
    ///
    /// Processing -> Pending is the retry path; Processing -> Processing is a
    /// reclaim after the claim lease expired.
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        use OutboxStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Pending)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "completed" => Ok(OutboxStatus::Completed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status '{}'", other)),
        }
    }
}

/// A serialized event waiting for (or done with) delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Also used as the published event id
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// When the current Processing claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    pub correlation_id: Option<String>,
    pub initiated_by: Option<String>,
}

impl OutboxMessage {
    /// Serialize an event into a fresh Pending message
    pub fn from_event(
        event: &LedgerEvent,
        context: &OperationContext,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            payload: event.to_payload()?,
            occurred_at: Utc::now(),
            processed_at: None,
            claimed_at: None,
            status: OutboxStatus::Pending,
            retry_count: 0,
            error: None,
            correlation_id: context.correlation_id.clone(),
            initiated_by: context.initiated_by.clone(),
        })
    }
}

/// Per-status row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl OutboxStatusCounts {
    pub fn add(&mut self, status: OutboxStatus, count: i64) {
        match status {
            OutboxStatus::Pending => self.pending += count,
            OutboxStatus::Processing => self.processing += count,
            OutboxStatus::Completed => self.completed += count,
            OutboxStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}
