//! Owned registry of the day's streams, keyed by `(TradingDay, StreamId)`.

use std::collections::BTreeMap;

use crate::domain::{StreamId, StreamKey};
use crate::stream::StreamStateMachine;

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<StreamKey, StreamStateMachine>,
    by_instrument: BTreeMap<String, Vec<StreamKey>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and drops `stream`) if the key is already taken.
    pub fn insert(&mut self, stream: StreamStateMachine) -> bool {
        let key = stream.key().clone();
        if self.streams.contains_key(&key) {
            return false;
        }
        self.by_instrument.entry(stream.instrument().to_string()).or_default().push(key.clone());
        self.streams.insert(key, stream);
        true
    }

    pub fn get(&self, key: &StreamKey) -> Option<&StreamStateMachine> {
        self.streams.get(key)
    }

    pub fn get_mut(&mut self, key: &StreamKey) -> Option<&mut StreamStateMachine> {
        self.streams.get_mut(key)
    }

    pub fn find(&self, stream_id: &StreamId) -> Option<&StreamStateMachine> {
        self.streams.values().find(|s| s.stream_id() == stream_id)
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.streams.contains_key(key)
    }

    /// Streams fed by `instrument`, in insertion order.
    pub fn keys_for_instrument(&self, instrument: &str) -> Vec<StreamKey> {
        self.by_instrument.get(instrument).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.streams.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamStateMachine> {
        self.streams.values()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.streams.values().filter(|s| !s.state().is_done()).count()
    }
}
