//! Structural edit resolution.
//!
//! The sharer's editor describes cell insertions, deletions, and moves with a
//! single [`CellEdit`] descriptor per event. Resolution translates the
//! descriptor into [`Document::splice`] calls and then renumbers every cell
//! from the post-splice physical order, so the `cells[i].index == i` invariant
//! holds after every call regardless of what the descriptor claimed.

use serde::{Deserialize, Serialize};

use crate::document::{Cell, Document};
use crate::error::SyncError;

/// A structural edit descriptor as produced by the sharer's editor.
///
/// Exactly one descriptor per edit event. The three cases:
///
/// - `deleted_count == 0`: pure insertion; each item carries its intended
///   final (post-shift) index.
/// - `deleted_count >= 1`, no items: deletion of `deleted_count` cells
///   starting at `position`.
/// - `deleted_count >= 1`, with items: a move, modeled as delete-then-insert
///   with the target index carried in `items[0].index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEdit {
    /// Start of the affected range in the pre-edit document.
    pub position: usize,
    /// Number of cells removed at `position`.
    pub deleted_count: usize,
    /// Cells inserted by this edit, in order.
    pub items: Vec<Cell>,
}

/// Apply a structural edit to the document.
///
/// On success the document's `index` fields form a contiguous `0..n-1`
/// sequence matching physical order. On error the document is unchanged
/// (bounds are validated before any splice mutates it).
pub fn apply_structural_edit(doc: &mut Document, edit: &CellEdit) -> Result<(), SyncError> {
    if edit.deleted_count == 0 {
        insert_cells(doc, edit)?;
    } else if edit.items.is_empty() {
        delete_cells(doc, edit)?;
    } else {
        move_cells(doc, edit)?;
    }
    doc.renumber();
    Ok(())
}

/// Pure insertion: splice each item in at its own target index, in order.
fn insert_cells(doc: &mut Document, edit: &CellEdit) -> Result<(), SyncError> {
    // Each earlier insertion grows the document by one, so item k may target
    // up to len + k. Validate everything before the first splice mutates.
    for (offset, item) in edit.items.iter().enumerate() {
        if item.index > doc.len() + offset {
            return Err(SyncError::InvalidEdit(format!(
                "insert target {} beyond document end {}",
                item.index,
                doc.len() + offset
            )));
        }
    }
    for item in &edit.items {
        doc.splice(item.index, 0, vec![item.clone()])?;
    }
    Ok(())
}

/// Deletion: splice out `deleted_count` cells starting at `position`.
fn delete_cells(doc: &mut Document, edit: &CellEdit) -> Result<(), SyncError> {
    doc.splice(edit.position, edit.deleted_count, Vec::new())
}

/// Move: remove the source range, then insert the carried cell(s) at the
/// target index from `items[0]`.
fn move_cells(doc: &mut Document, edit: &CellEdit) -> Result<(), SyncError> {
    let target = edit.items[0].index;
    if edit.position + edit.deleted_count > doc.len() {
        return Err(SyncError::InvalidEdit(format!(
            "move removes {} cells at {} but document has {}",
            edit.deleted_count,
            edit.position,
            doc.len()
        )));
    }
    if target > doc.len() - edit.deleted_count {
        return Err(SyncError::InvalidEdit(format!(
            "move target {} beyond document end {}",
            target,
            doc.len() - edit.deleted_count
        )));
    }
    doc.splice(edit.position, edit.deleted_count, Vec::new())?;
    doc.splice(target, 0, edit.items.clone())
}
