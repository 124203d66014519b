//! The canonical cell store for one room's shared document.
//!
//! The store is a dumb ordered container: it bounds-checks every operation but
//! never recomputes the `index` field of a cell. Keeping `cells[i].index == i`
//! after structural changes is the job of [`crate::edit`], which renumbers
//! after every splice.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One output payload attached to a cell.
///
/// Outputs are replaced wholesale by the sharer, never patched incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    /// MIME type of the payload (e.g. `text/plain`, `image/png`).
    pub mime: String,
    /// Opaque payload, forwarded as-is.
    pub data: serde_json::Value,
}

/// An addressable unit of the shared document, analogous to a notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Cell type discriminator (markup vs. code, editor-defined).
    pub kind: u32,
    /// Ordinal position, 0-based. Redundant with physical position but kept
    /// externally visible; consumers address cells by this field.
    pub index: usize,
    /// Cell source text.
    pub text: String,
    /// Execution output. Absent on the wire means empty.
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl Cell {
    /// Convenience constructor for a text-only cell.
    pub fn new(kind: u32, index: usize, text: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            text: text.into(),
            output: Vec::new(),
        }
    }
}

/// The authoritative ordered cell sequence for one room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    cells: Vec<Cell>,
}

impl Document {
    /// Create a document from a cell list, trusting the sender's indices.
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Unconditionally replace the whole cell list.
    ///
    /// This is the only operation that creates a document from nothing. Input
    /// indices are trusted; `output` fields have already been normalized to
    /// empty by deserialization when absent.
    pub fn replace_all(&mut self, cells: Vec<Cell>) {
        self.cells = cells;
    }

    /// All cells in canonical order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True when the document has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Look up a cell by ordinal index.
    pub fn cell(&self, index: usize) -> Result<&Cell, SyncError> {
        self.cells.get(index).ok_or(SyncError::CellNotFound {
            index,
            len: self.cells.len(),
        })
    }

    fn cell_mut(&mut self, index: usize) -> Result<&mut Cell, SyncError> {
        let len = self.cells.len();
        self.cells
            .get_mut(index)
            .ok_or(SyncError::CellNotFound { index, len })
    }

    /// In-place text replacement.
    pub fn set_cell_text(&mut self, index: usize, text: String) -> Result<(), SyncError> {
        self.cell_mut(index)?.text = text;
        Ok(())
    }

    /// In-place output replacement.
    pub fn set_cell_output(
        &mut self,
        index: usize,
        output: Vec<OutputItem>,
    ) -> Result<(), SyncError> {
        self.cell_mut(index)?.output = output;
        Ok(())
    }

    /// Remove `delete_count` cells starting at `start` and insert `inserted`
    /// at that position. The single primitive under insert, delete, and move.
    pub fn splice(
        &mut self,
        start: usize,
        delete_count: usize,
        inserted: Vec<Cell>,
    ) -> Result<(), SyncError> {
        let len = self.cells.len();
        if start > len {
            return Err(SyncError::InvalidEdit(format!(
                "splice start {start} out of bounds (len {len})"
            )));
        }
        if start + delete_count > len {
            return Err(SyncError::InvalidEdit(format!(
                "splice removes {delete_count} cells at {start} but only {} remain",
                len - start
            )));
        }
        self.cells.splice(start..start + delete_count, inserted);
        Ok(())
    }

    /// Rewrite every cell's `index` to its physical position.
    pub(crate) fn renumber(&mut self) {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            cell.index = i;
        }
    }
}
