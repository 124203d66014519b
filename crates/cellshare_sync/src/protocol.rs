//! Wire events exchanged between sharer, relay server, and viewers.
//!
//! Events are JSON text frames tagged by an `event` field. The names mirror
//! the notebook-sharing editor extension's event vocabulary, so the server
//! stays drop-in compatible with clients speaking it.

use serde::{Deserialize, Serialize};

use crate::document::{Cell, OutputItem};
use crate::edit::CellEdit;
use crate::patch::PatchSet;

/// A viewport range of cells, relayed as the sharer scrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    /// First visible cell index.
    pub start: usize,
    /// One past the last visible cell index.
    pub end: usize,
}

/// Events received from a connected client, scoped to a room name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// A would-be viewer asks whether the room can be joined.
    #[serde(rename = "join-room")]
    JoinRoom {
        /// Room name to check.
        room: String,
    },
    /// A would-be sharer asks whether the room name is free.
    #[serde(rename = "create-room")]
    CreateRoom {
        /// Room name to check.
        room: String,
    },
    /// The sharer ends the session and deletes the room's document.
    #[serde(rename = "delete-room")]
    DeleteRoom {
        /// Room name to delete.
        room: String,
    },
    /// A viewer joins the room; the server replies with the full document.
    #[serde(rename = "join")]
    Join {
        /// Room name to join.
        room: String,
    },
    /// The sharer joins its own room's membership.
    #[serde(rename = "create")]
    Create {
        /// Room name to join as sharer.
        room: String,
    },
    /// The sharer registers the complete file, replacing any prior document.
    #[serde(rename = "send_full_file")]
    SendFullFile {
        /// Target room.
        room: String,
        /// Full cell list, indices trusted as sent.
        cells: Vec<Cell>,
    },
    /// An incremental text patch against one cell.
    #[serde(rename = "patch")]
    Patch {
        /// Target room.
        room: String,
        /// Ordinal index of the patched cell.
        index: usize,
        /// Patch set derived against that cell's current text.
        patch: PatchSet,
    },
    /// The sharer replaces one cell's execution output.
    #[serde(rename = "Add-output")]
    AddOutput {
        /// Target room.
        room: String,
        /// Ordinal index of the cell.
        index: usize,
        /// Replacement output items.
        output: Vec<OutputItem>,
    },
    /// The sharer moved cell(s); delete-then-insert descriptor.
    #[serde(rename = "move-cell")]
    MoveCell {
        /// Target room.
        room: String,
        /// The move descriptor.
        edit: CellEdit,
    },
    /// The sharer added or deleted cell(s).
    #[serde(rename = "Add-cell")]
    AddCell {
        /// Target room.
        room: String,
        /// The insert/delete descriptor.
        edit: CellEdit,
    },
    /// Viewport scroll metadata, relayed without state mutation.
    #[serde(rename = "range")]
    Range {
        /// Target room.
        room: String,
        /// Visible ranges in the sharer's editor.
        ranges: Vec<CellRange>,
    },
    /// Text selection metadata, relayed without state mutation.
    #[serde(rename = "selectionText")]
    SelectionText {
        /// Target room.
        room: String,
        /// Selected offset pairs within the cell.
        selections: Vec<Vec<usize>>,
        /// Ordinal index of the cell the selection is in.
        index: usize,
    },
}

impl ClientEvent {
    /// The room name this event is scoped to.
    pub fn room(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { room }
            | ClientEvent::CreateRoom { room }
            | ClientEvent::DeleteRoom { room }
            | ClientEvent::Join { room }
            | ClientEvent::Create { room }
            | ClientEvent::SendFullFile { room, .. }
            | ClientEvent::Patch { room, .. }
            | ClientEvent::AddOutput { room, .. }
            | ClientEvent::MoveCell { room, .. }
            | ClientEvent::AddCell { room, .. }
            | ClientEvent::Range { room, .. }
            | ClientEvent::SelectionText { room, .. } => room,
        }
    }
}

/// Events sent from the server: direct replies plus room broadcasts.
///
/// Broadcast names mirror the inbound vocabulary one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Reply to `join-room`: whether the room exists and can be joined.
    #[serde(rename = "get-room-list-join")]
    JoinCheck {
        /// True iff the room currently exists.
        ok: bool,
    },
    /// Reply to `create-room`: whether the name is free for sharing.
    #[serde(rename = "get-room-list-create")]
    CreateCheck {
        /// True iff no room currently exists under that name.
        ok: bool,
    },
    /// Terminal event: sharing has ended and the document is gone.
    #[serde(rename = "end")]
    End,
    /// Reply to `join`: the full current document, if any.
    #[serde(rename = "get-file")]
    GetFile {
        /// The cells, or `None` when the room has no shared document.
        cells: Option<Vec<Cell>>,
    },
    /// A confirmed text change to one cell.
    #[serde(rename = "patch-client")]
    PatchClient {
        /// Ordinal index of the patched cell.
        index: usize,
        /// The patch set as originally received.
        patch: PatchSet,
    },
    /// One cell's output was replaced.
    #[serde(rename = "Output-add")]
    OutputAdd {
        /// Ordinal index of the cell.
        index: usize,
        /// The new output items.
        output: Vec<OutputItem>,
    },
    /// A confirmed cell move.
    #[serde(rename = "Move-cell")]
    MoveCell {
        /// The original descriptor, not a recomputed one.
        edit: CellEdit,
    },
    /// A confirmed cell insertion or deletion.
    #[serde(rename = "Update-cell")]
    UpdateCell {
        /// The original descriptor, not a recomputed one.
        edit: CellEdit,
    },
    /// Relayed viewport scroll metadata.
    #[serde(rename = "rangeChange")]
    RangeChange {
        /// Visible ranges in the sharer's editor.
        ranges: Vec<CellRange>,
    },
    /// Relayed text selection metadata.
    #[serde(rename = "selection")]
    Selection {
        /// Selected offset pairs within the cell.
        selections: Vec<Vec<usize>>,
        /// Ordinal index of the cell the selection is in.
        index: usize,
    },
}
