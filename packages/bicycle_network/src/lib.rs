#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bicycle network ingestion.
//!
//! Takes an uploaded `GeoJSON` document through four stages: resolve the
//! source SRID, screen and reproject its line features ([`filter`]),
//! fuse fragments sharing endpoints into maximal polylines ([`merge`]),
//! and atomically replace the network's stored parts ([`persist`]).
//! [`process`] orchestrates the stages for one staged upload and reports
//! operator-facing outcomes through a [`MessageSink`].

pub mod filter;
pub mod merge;
pub mod persist;
pub mod process;

use std::sync::Mutex;

use civic_map_database::DbError;
use civic_map_spatial::SpatialError;
use thiserror::Error;

/// Errors that can occur while ingesting a bicycle network.
#[derive(Debug, Error)]
pub enum BicycleNetworkError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// A geometry could not be reprojected.
    #[error("Spatial error: {0}")]
    Spatial(#[from] SpatialError),

    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or removing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not a usable `GeoJSON` feature collection.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of what is wrong with the document.
        message: String,
    },

    /// The target network does not exist.
    #[error("Bicycle network {id} not found")]
    NotFound {
        /// The requested network id.
        id: i64,
    },
}

/// Operator-facing message shown when an upload cannot be parsed.
pub const INVALID_INPUT_MESSAGE: &str = "Invalid Input GEOJSON or format not supported";

/// Operator-facing message shown when merging fell back to the raw lines.
pub const MERGE_FAILED_MESSAGE: &str = "Merging of linestrings failed, saved without merging";

/// Receives operator-facing outcome messages from the pipeline.
pub trait MessageSink {
    /// Reports a non-fatal problem; processing continued.
    fn warning(&self, message: &str);

    /// Reports why nothing was persisted.
    fn error(&self, message: &str);
}

/// A [`MessageSink`] that writes messages to the log.
pub struct LogMessages;

impl MessageSink for LogMessages {
    fn warning(&self, message: &str) {
        log::warn!("{message}");
    }

    fn error(&self, message: &str) {
        log::error!("{message}");
    }
}

/// Severity of a collected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Non-fatal.
    Warning,
    /// Nothing was persisted.
    Error,
}

/// A [`MessageSink`] that keeps every message in memory, in order.
#[derive(Debug, Default)]
pub struct CollectedMessages {
    messages: Mutex<Vec<(MessageLevel, String)>>,
}

impl CollectedMessages {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the messages received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    fn push(&self, level: MessageLevel, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }
}

impl MessageSink for CollectedMessages {
    fn warning(&self, message: &str) {
        self.push(MessageLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(MessageLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_messages_in_order() {
        let sink = CollectedMessages::new();
        sink.warning(MERGE_FAILED_MESSAGE);
        sink.error(INVALID_INPUT_MESSAGE);
        assert_eq!(
            sink.messages(),
            vec![
                (MessageLevel::Warning, MERGE_FAILED_MESSAGE.to_string()),
                (MessageLevel::Error, INVALID_INPUT_MESSAGE.to_string()),
            ]
        );
    }
}
