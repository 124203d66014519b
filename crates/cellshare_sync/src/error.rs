use thiserror::Error;

/// Errors surfaced by the synchronization engine.
///
/// A failing operation drops the single triggering event only; it never
/// affects other rooms or other cells.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No shared document exists for the named room.
    #[error("no shared document for room {0:?}")]
    RoomNotFound(String),

    /// A cell index does not address an existing cell.
    #[error("no cell at index {index} (document has {len} cells)")]
    CellNotFound {
        /// The requested ordinal index.
        index: usize,
        /// Cell count at the time of the lookup.
        len: usize,
    },

    /// A structural edit descriptor references positions outside the document.
    #[error("invalid structural edit: {0}")]
    InvalidEdit(String),

    /// A patch set could not be decoded or applied.
    #[error("patch application failed: {0}")]
    Patch(String),
}
