//! # yggdrasil-core
//!
//! Show coordination core: the Conductor state machine, the state store and
//! role projections, SQLite persistence with file backups, and the hybrid
//! timing engine, independent of any transport or audio backend.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use yggdrasil_core::conductor::Conductor;
//! use yggdrasil_core::store::ShowStore;
//! use yggdrasil_types::{ShowCommand, ShowState};
//!
//! // 1. Build initial state from a validated ShowConfig
//! let mut store = ShowStore::new(ShowState::new(config, now_ms()));
//! let mut conductor = Conductor::new();
//!
//! // 2. Dispatch commands; the store owns the single authoritative state
//! let events = store.apply(&mut conductor, &ShowCommand::AssignFactions, now_ms());
//!
//! // 3. Persist the snapshot, route audio cues, broadcast projections
//! ```

pub mod conductor;
pub mod persistence;
pub mod store;
pub mod timing;
