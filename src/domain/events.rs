//! Domain Events
//!
//! Facts emitted by ledger mutations. They carry only plain serializable
//! fields so they can be stored as outbox payloads and decoded by any
//! consumer without access to the ledger's storage.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// A concrete event payload with a stable wire name.
pub trait EventPayload: Serialize + DeserializeOwned + Into<LedgerEvent> {
    /// Name stored in `outbox_messages.event_type`
    const EVENT_TYPE: &'static str;
}

/// A ledger entry was appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCreated {
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
    pub entry_type: String,
    pub running_balance: i64,
    pub reference: Option<String>,
}

/// A balance slot was credited or debited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdated {
    pub account_id: Uuid,
    pub currency_code: String,
    pub previous_balance: i64,
    pub new_balance: i64,
    /// Signed: positive for credits, negative for debits
    pub change_amount: i64,
    pub version: i64,
}

/// A compensating entry reversed an earlier one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryVoided {
    pub original_entry_id: Uuid,
    pub void_entry_id: Uuid,
    pub account_id: Uuid,
    pub reason: String,
}

/// Part of a balance was earmarked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsReserved {
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
    pub reserved_total: i64,
    pub available_balance: i64,
    pub version: i64,
}

/// An earmark was lifted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
    pub reserved_total: i64,
    pub available_balance: i64,
    pub version: i64,
}

impl EventPayload for EntryCreated {
    const EVENT_TYPE: &'static str = "EntryCreated";
}

impl EventPayload for BalanceUpdated {
    const EVENT_TYPE: &'static str = "BalanceUpdated";
}

impl EventPayload for EntryVoided {
    const EVENT_TYPE: &'static str = "EntryVoided";
}

impl EventPayload for FundsReserved {
    const EVENT_TYPE: &'static str = "FundsReserved";
}

impl EventPayload for ReservationReleased {
    const EVENT_TYPE: &'static str = "ReservationReleased";
}

/// Every event the ledger can emit.
///
/// Serializes as the bare payload; the event type travels separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LedgerEvent {
    EntryCreated(EntryCreated),
    BalanceUpdated(BalanceUpdated),
    EntryVoided(EntryVoided),
    FundsReserved(FundsReserved),
    ReservationReleased(ReservationReleased),
}

impl LedgerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::EntryCreated(_) => EntryCreated::EVENT_TYPE,
            LedgerEvent::BalanceUpdated(_) => BalanceUpdated::EVENT_TYPE,
            LedgerEvent::EntryVoided(_) => EntryVoided::EVENT_TYPE,
            LedgerEvent::FundsReserved(_) => FundsReserved::EVENT_TYPE,
            LedgerEvent::ReservationReleased(_) => ReservationReleased::EVENT_TYPE,
        }
    }

    /// Get the account ID this event relates to
    pub fn account_id(&self) -> Uuid {
        match self {
            LedgerEvent::EntryCreated(e) => e.account_id,
            LedgerEvent::BalanceUpdated(e) => e.account_id,
            LedgerEvent::EntryVoided(e) => e.account_id,
            LedgerEvent::FundsReserved(e) => e.account_id,
            LedgerEvent::ReservationReleased(e) => e.account_id,
        }
    }

    /// Serialize the inner payload
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl From<EntryCreated> for LedgerEvent {
    fn from(event: EntryCreated) -> Self {
        LedgerEvent::EntryCreated(event)
    }
}

impl From<BalanceUpdated> for LedgerEvent {
    fn from(event: BalanceUpdated) -> Self {
        LedgerEvent::BalanceUpdated(event)
    }
}

impl From<EntryVoided> for LedgerEvent {
    fn from(event: EntryVoided) -> Self {
        LedgerEvent::EntryVoided(event)
    }
}

impl From<FundsReserved> for LedgerEvent {
    fn from(event: FundsReserved) -> Self {
        LedgerEvent::FundsReserved(event)
    }
}

impl From<ReservationReleased> for LedgerEvent {
    fn from(event: ReservationReleased) -> Self {
        LedgerEvent::ReservationReleased(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_created_payload_is_untagged() {
        let event = LedgerEvent::from(EntryCreated {
            entry_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            currency_code: "MAD".to_string(),
            amount_minor_units: 100_000,
            entry_type: "Credit".to_string(),
            running_balance: 500_000,
            reference: Some("REF-123".to_string()),
        });

        let payload = event.to_payload().unwrap();
        assert_eq!(payload["amount_minor_units"], 100_000);
        assert_eq!(payload["reference"], "REF-123");
        assert!(payload.get("EntryCreated").is_none());
        assert_eq!(event.event_type(), "EntryCreated");
    }

    #[test]
    fn test_balance_updated_keeps_signed_change() {
        let account_id = Uuid::new_v4();
        let event = LedgerEvent::from(BalanceUpdated {
            account_id,
            currency_code: "USD".to_string(),
            previous_balance: 150_000,
            new_balance: 100_000,
            change_amount: -50_000,
            version: 4,
        });

        assert_eq!(event.account_id(), account_id);
        assert_eq!(event.to_payload().unwrap()["change_amount"], -50_000);
    }

    #[test]
    fn test_entry_voided_event_type() {
        let event = LedgerEvent::from(EntryVoided {
            original_entry_id: Uuid::new_v4(),
            void_entry_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            reason: "Customer request".to_string(),
        });

        assert_eq!(event.event_type(), EntryVoided::EVENT_TYPE);
    }
}
