use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::FetchError;
use super::token::ValidationToken;

/// The outcome a cache slot remembers for a key.
///
/// This is deliberately a three-way state rather than a nested `Option`:
/// a key that is *absent* from the dictionary has never been looked up,
/// while a key carrying [`Missing`](Self::Missing) was looked up and the
/// remote authoritatively said it does not exist. Conflating the two would
/// make every negative answer get re-fetched on each run.
///
/// [`Failed`](Self::Failed) is an error marker: the lookup was attempted
/// and failed in a way worth remembering, so the next run reports the same
/// error instead of hammering the remote again. Only persistable errors
/// end up here, see [`FetchError::is_persistable`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CachedValue<T> {
    /// The lookup succeeded and produced a value.
    Found(T),
    /// The remote authoritatively reported that no record exists.
    Missing,
    /// The lookup failed; the error is remembered until the slot expires.
    Failed(FetchError),
}

impl<T> CachedValue<T> {
    /// Returns the value if this is [`Found`](Self::Found).
    pub fn found(&self) -> Option<&T> {
        match self {
            CachedValue::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Converts a fetch result into its cached representation.
    ///
    /// `NotFound` becomes a negative marker, persistable errors become
    /// error markers. Non-persistable errors must not reach the cache and
    /// are the caller's responsibility to filter out beforehand.
    pub fn from_result(result: Result<Option<T>, FetchError>) -> Self {
        match result {
            Ok(Some(value)) => CachedValue::Found(value),
            Ok(None) | Err(FetchError::NotFound) => CachedValue::Missing,
            Err(error) => CachedValue::Failed(error),
        }
    }
}

/// One populated cache slot: a value plus the token it was computed under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheSlot<T> {
    /// The validation token captured when the slot was written.
    pub token: ValidationToken,
    /// The remembered outcome.
    #[serde(flatten)]
    pub value: CachedValue<T>,
}

/// A keyed dictionary of self-validating cache slots.
///
/// Validation is lazy and per-slot: nothing is evicted on load, a slot is
/// simply skipped by [`get_valid`](Self::get_valid) when its stored token
/// no longer validates against the fresh token the caller supplies. Stale
/// slots are overwritten on the next [`insert`](Self::insert).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheDict<T> {
    slots: BTreeMap<String, CacheSlot<T>>,
}

impl<T> Default for CacheDict<T> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }
}

impl<T> CacheDict<T> {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot's remembered outcome if it validates against `fresh`.
    ///
    /// An absent key and a stale slot are indistinguishable here, which is
    /// the point: both mean "go compute it".
    pub fn get_valid(&self, key: &str, fresh: &ValidationToken) -> Option<&CachedValue<T>> {
        let slot = self.slots.get(key)?;
        slot.token.is_valid_against(fresh).then_some(&slot.value)
    }

    /// Returns the slot's remembered outcome without token validation.
    ///
    /// For reads that happen after the caller already validated or
    /// repopulated the slot in the same run.
    pub fn get(&self, key: &str) -> Option<&CachedValue<T>> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    /// Whether the key holds a slot that validates against `fresh`.
    pub fn is_valid(&self, key: &str, fresh: &ValidationToken) -> bool {
        self.get_valid(key, fresh).is_some()
    }

    /// Writes a slot, replacing whatever was stored under the key.
    pub fn insert(&mut self, key: impl Into<String>, token: ValidationToken, value: CachedValue<T>) {
        self.slots.insert(key.into(), CacheSlot { token, value });
    }

    /// Removes a slot, returning its remembered outcome if present.
    pub fn remove(&mut self, key: &str) -> Option<CachedValue<T>> {
        self.slots.remove(key).map(|slot| slot.value)
    }

    /// The number of stored slots, valid or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over all stored keys, valid or not.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}
