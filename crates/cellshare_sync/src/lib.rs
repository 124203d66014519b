//! # `cellshare_sync`
//!
//! Transport-free synchronization engine for Cellshare.
//!
//! A Cellshare room holds one shared document: an ordered sequence of cells,
//! each with text and output. One sharer is authoritative for the document;
//! viewers replay its edits. This crate owns the document model and the
//! algorithms that keep it consistent:
//!
//! - [`document`] — the canonical cell store and its mutation primitives
//! - [`edit`] — structural edits (insert/delete/move) with index renumbering
//! - [`patch`] — incremental text patches with no-op suppression
//! - [`protocol`] — the wire events exchanged between sharer, server, and viewers
//!
//! The relay server (`cellshare_sync_server`) layers rooms, fanout, and the
//! WebSocket transport on top of this crate.

pub mod document;
pub mod edit;
pub mod error;
pub mod patch;
pub mod protocol;

pub use document::{Cell, Document, OutputItem};
pub use edit::CellEdit;
pub use error::SyncError;
pub use patch::{PatchOutcome, PatchSet};
