//! Event Emitter
//!
//! Collects the events of one ledger operation so they can be written to the
//! outbox in the same transaction as the state change.

use crate::domain::{LedgerEvent, OperationContext};

use super::OutboxMessage;

#[derive(Debug, Default)]
pub struct EventEmitter {
    events: Vec<LedgerEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: impl Into<LedgerEvent>) {
        self.events.push(event.into());
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize the collected events into Pending outbox rows, in emit order
    pub fn into_outbox(
        self,
        context: &OperationContext,
    ) -> Result<Vec<OutboxMessage>, serde_json::Error> {
        self.events
            .iter()
            .map(|event| OutboxMessage::from_event(event, context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BalanceUpdated, EntryVoided};
    use uuid::Uuid;

    #[test]
    fn test_into_outbox_preserves_order() {
        let account_id = Uuid::new_v4();
        let mut emitter = EventEmitter::new();
        emitter.emit(BalanceUpdated {
            account_id,
            currency_code: "MAD".to_string(),
            previous_balance: 0,
            new_balance: 10,
            change_amount: 10,
            version: 1,
        });
        emitter.emit(EntryVoided {
            original_entry_id: Uuid::new_v4(),
            void_entry_id: Uuid::new_v4(),
            account_id,
            reason: "test".to_string(),
        });

        let messages = emitter.into_outbox(&OperationContext::new()).unwrap();
        let types: Vec<_> = messages.iter().map(|m| m.event_type.as_str()).collect();
        assert_eq!(types, vec!["BalanceUpdated", "EntryVoided"]);
        assert!(messages.iter().all(|m| m.correlation_id.is_none()));
    }
}
