//! Snapshot cell for fitted model state shared between concurrent callers.
//!
//! Readers take a cheap clone of the current `Arc` and score against it without holding the
//! lock. Writers build a complete replacement off to the side and swap it in, so a prediction
//! never sees a half-updated model and an abandoned fit leaves the previous state in place.
//! Writers are serialised against each other; readers never wait on a fit.

use crate::constants::STATE_FORMAT_VERSION;
use crate::{AnalyticsError, AnalyticsResult};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug)]
pub struct ModelCell<T> {
    current: RwLock<Arc<T>>,
    writer: Mutex<()>,
}

impl<T> ModelCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replaces the current snapshot, returning the previous one.
    pub fn replace(&self, next: T) -> Arc<T> {
        let _writer = self.writer.lock();
        self.swap(next)
    }

    /// Builds the next state from the current one and swaps it in.
    ///
    /// Concurrent updates run one after another, each starting from the state the previous one
    /// left behind. `build` runs outside the read lock, so predictions keep using the old
    /// snapshot meanwhile. An error from `build` leaves the state untouched.
    pub fn update<R, E>(&self, build: impl FnOnce(&T) -> Result<(T, R), E>) -> Result<R, E> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let (next, out) = build(&*current)?;
        self.swap(next);
        Ok(out)
    }

    fn swap(&self, next: T) -> Arc<T> {
        let next = Arc::new(next);
        std::mem::replace(&mut *self.current.write(), next)
    }
}

impl<T: Default> Default for ModelCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[derive(Serialize)]
struct StateDocumentRef<'a, T> {
    format_version: u32,
    model: &'a T,
}

#[derive(Deserialize)]
struct StateHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct StateDocument<T> {
    model: T,
}

/// Serialises fitted state into the opaque blob handed to the persistence boundary.
pub fn encode_state<T: Serialize>(model: &T) -> AnalyticsResult<Vec<u8>> {
    serde_json::to_vec(&StateDocumentRef {
        format_version: STATE_FORMAT_VERSION,
        model,
    })
    .map_err(AnalyticsError::StateSerialization)
}

/// Parses a blob produced by [`encode_state`], checking the format version first.
pub fn decode_state<T: DeserializeOwned>(bytes: &[u8]) -> AnalyticsResult<T> {
    let header: StateHeader =
        serde_json::from_slice(bytes).map_err(AnalyticsError::StateDeserialization)?;
    if header.format_version != STATE_FORMAT_VERSION {
        return Err(AnalyticsError::UnsupportedStateFormat {
            expected: STATE_FORMAT_VERSION,
            found: header.format_version,
        });
    }
    let document: StateDocument<T> =
        serde_json::from_slice(bytes).map_err(AnalyticsError::StateDeserialization)?;
    Ok(document.model)
}
