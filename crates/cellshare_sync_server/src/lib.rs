//! Cellshare relay server.
//!
//! Accepts WebSocket connections from one sharer and any number of viewers,
//! keeps the authoritative copy of each room's shared document, and fans
//! confirmed changes out to the other members of the room. Documents are
//! process-lifetime only; nothing is persisted.

pub mod config;
pub mod handlers;
pub mod sync;
