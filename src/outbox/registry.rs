//! Event Registry
//!
//! Maps a stored `event_type` name to the decoder for its payload. Built once
//! at startup; lookups never touch reflection or dynamic type names.

use std::collections::HashMap;

use crate::domain::{
    BalanceUpdated, EntryCreated, EntryVoided, EventPayload, FundsReserved, LedgerEvent,
    ReservationReleased,
};

use super::OutboxError;

type Decoder = fn(serde_json::Value) -> Result<LedgerEvent, serde_json::Error>;

#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl EventRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that knows every event the ledger emits
    pub fn ledger_events() -> Self {
        let mut registry = Self::new();
        registry
            .register::<EntryCreated>()
            .register::<BalanceUpdated>()
            .register::<EntryVoided>()
            .register::<FundsReserved>()
            .register::<ReservationReleased>();
        registry
    }

    pub fn register<E: EventPayload>(&mut self) -> &mut Self {
        self.decoders.insert(E::EVENT_TYPE, decode_as::<E>);
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a stored payload into its typed event
    pub fn decode(
        &self,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent, OutboxError> {
        let decoder = self
            .decoders
            .get(event_type)
            .ok_or_else(|| OutboxError::UnknownEventType(event_type.to_string()))?;

        decoder(payload).map_err(|source| OutboxError::Decode {
            event_type: event_type.to_string(),
            source,
        })
    }
}

fn decode_as<E: EventPayload>(payload: serde_json::Value) -> Result<LedgerEvent, serde_json::Error> {
    serde_json::from_value::<E>(payload).map(Into::into)
}
