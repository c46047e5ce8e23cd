//! Per-run memoization of remote lookups.
//!
//! Entries are write-once: the first outcome for a key, success or failure,
//! answers every later lookup of that key in the same run. A fetch that
//! panics is stored as a failure too.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{panic_message, FetchError};
use crate::model::{CandidateRecord, IdentityPayload};

/// A write-once map from lookup key to fetch outcome.
#[derive(Debug)]
pub struct FetchCache<K, V> {
    entries: HashMap<K, Result<V, FetchError>>,
    fetches: usize,
    hits: usize,
}

impl<K, V> Default for FetchCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            fetches: 0,
            hits: 0,
        }
    }
}

impl<K: Eq + Hash, V> FetchCache<K, V> {
    /// Cached outcome for `key`, running `fetch` only on the first lookup.
    pub fn get_or_fetch(
        &mut self,
        key: K,
        fetch: impl FnOnce() -> Result<V, FetchError>,
    ) -> &Result<V, FetchError> {
        use std::collections::hash_map::Entry;

        match self.entries.entry(key) {
            Entry::Occupied(slot) => {
                self.hits += 1;
                slot.into_mut()
            }
            Entry::Vacant(slot) => {
                self.fetches += 1;
                let outcome = catch_unwind(AssertUnwindSafe(fetch))
                    .unwrap_or_else(|payload| Err(FetchError::panicked(panic_message(payload.as_ref()))));
                slot.insert(outcome)
            }
        }
    }

    /// Number of times the fetch closure actually ran.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// Key for the candidate lookup: display name plus date of service.
pub type CandidateKey = (String, NaiveDate);

/// The two lookup caches an audit run needs.
#[derive(Debug, Default)]
pub struct RemoteCache {
    pub identities: FetchCache<String, Option<IdentityPayload>>,
    pub candidates: FetchCache<CandidateKey, Vec<CandidateRecord>>,
}

impl RemoteCache {
    pub fn stats(&self) -> LookupStats {
        LookupStats {
            identity_fetches: self.identities.fetches(),
            identity_cache_hits: self.identities.hits(),
            candidate_fetches: self.candidates.fetches(),
            candidate_cache_hits: self.candidates.hits(),
        }
    }
}

/// Remote traffic for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LookupStats {
    pub identity_fetches: usize,
    pub identity_cache_hits: usize,
    pub candidate_fetches: usize,
    pub candidate_cache_hits: usize,
}
