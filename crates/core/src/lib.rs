//! # Dopel Core
//!
//! Ledger types shared by the Dopel indexer and its query surface.
//!
//! ## Features
//!
//! - **Events**: closed [`Event`] sum type decoded tag-first from program log JSON
//! - **Virtual blocks**: [`VirtualBlock`] and the per-event records derived from it
//! - **Read shapes**: [`NormalizedEvent`] and [`StoredBlock`] for serving stored data
//! - **Constants**: log marker, fallback tags and default query limits

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod event;
pub mod normalize;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use event::Event;
pub use normalize::{normalize_events, NormalizedEvent, StoredBlock};
pub use types::*;
