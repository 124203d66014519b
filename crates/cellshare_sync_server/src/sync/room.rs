//! Room registry and per-room fanout.
//!
//! [`ShareState`] owns the map of room name to [`ShareRoom`]; it is
//! constructed once in `main` and held in the WebSocket handler state. A room
//! is live from the first membership or full file until `delete-room` retires
//! it; the existence queries the join/create flows rely on ask for liveness,
//! so a sharer's `create` reserves the name before any document arrives and
//! a deleted room frees it even while members linger.
//!
//! Precondition, not enforced here: at most one connection (the sharer)
//! issues mutating events per room. The server relays, it does not reconcile
//! concurrent writers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cellshare_sync::SyncError;
use cellshare_sync::document::{Cell, Document, OutputItem};
use cellshare_sync::edit::{self, CellEdit};
use cellshare_sync::patch::{self, PatchSet};
use cellshare_sync::protocol::ServerEvent;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifies the connection that originated a broadcast, so its own socket
/// task can skip the echo.
pub type ConnectionId = Uuid;

/// One event fanned out to a room's members.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// The connection whose inbound event caused this broadcast.
    pub origin: ConnectionId,
    /// The outbound event every other member should receive.
    pub event: ServerEvent,
}

/// Counters about the registry, reported by the idle sweep.
#[derive(Debug, Clone, Default)]
pub struct ShareStats {
    pub active_rooms: usize,
    pub active_connections: usize,
    pub shared_documents: usize,
}

/// Global registry of all rooms.
pub struct ShareState {
    rooms: RwLock<HashMap<String, Arc<ShareRoom>>>,
}

impl Default for ShareState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareState {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the named room currently exists. A room exists from its first
    /// membership or full file until it is explicitly deleted.
    pub async fn room_exists(&self, name: &str) -> bool {
        let rooms = self.rooms.read().await;
        match rooms.get(name) {
            Some(room) => room.is_live(),
            None => false,
        }
    }

    /// True iff the room exists, i.e. a viewer may join it.
    pub async fn join_check(&self, name: &str) -> bool {
        self.room_exists(name).await
    }

    /// True iff the room does NOT exist, i.e. a sharer may claim the name
    /// without clobbering an active room.
    pub async fn create_check(&self, name: &str) -> bool {
        !self.room_exists(name).await
    }

    /// Get an existing room shell without creating one.
    pub async fn get_room(&self, name: &str) -> Option<Arc<ShareRoom>> {
        let rooms = self.rooms.read().await;
        rooms.get(name).cloned()
    }

    /// Get or create the shell for a room.
    pub async fn get_or_create_room(&self, name: &str) -> Arc<ShareRoom> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;

        // Double-check after acquiring the write lock
        if let Some(room) = rooms.get(name) {
            return room.clone();
        }

        let room = Arc::new(ShareRoom::new(name));
        rooms.insert(name.to_string(), room.clone());
        info!("Created room: {}", name);
        room
    }

    /// Delete the room's document and notify members that sharing ended.
    ///
    /// The terminal `end` event is dispatched before the document drops, so
    /// members never read stale state afterwards. Deleting a room that does
    /// not exist is a no-op.
    pub async fn delete_room(&self, name: &str, origin: ConnectionId) {
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(name).cloned()
        };
        let Some(room) = room else { return };

        room.broadcast(origin, ServerEvent::End);
        if room.clear_document().await {
            info!("Deleted room: {}", name);
        }
        room.retire();
        self.maybe_remove_room(name).await;
    }

    /// Drop a room shell once it has neither members nor a document.
    pub async fn maybe_remove_room(&self, name: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name)
            && room.connection_count() == 0
            && !room.has_document().await
        {
            rooms.remove(name);
            debug!("Removed idle room shell: {}", name);
        }
    }

    /// Remove every idle room shell; returns how many were dropped.
    pub async fn sweep_idle(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut idle = Vec::new();
        for (name, room) in rooms.iter() {
            if room.connection_count() == 0 && !room.has_document().await {
                idle.push(name.clone());
            }
        }
        for name in &idle {
            rooms.remove(name);
            debug!("Removed idle room shell: {}", name);
        }
        idle.len()
    }

    /// Current registry counters.
    pub async fn stats(&self) -> ShareStats {
        let rooms = self.rooms.read().await;
        let mut stats = ShareStats {
            active_rooms: rooms.len(),
            ..Default::default()
        };
        for room in rooms.values() {
            stats.active_connections += room.connection_count();
            if room.has_document().await {
                stats.shared_documents += 1;
            }
        }
        stats
    }
}

/// One room: its document (if shared) and the fanout channel its members
/// subscribe to.
pub struct ShareRoom {
    name: String,
    /// The authoritative document. `None` until the sharer sends the full
    /// file, and again after `delete-room`.
    document: RwLock<Option<Document>>,
    /// Fanout channel; every member's socket task holds a subscription.
    events_tx: broadcast::Sender<RoomEvent>,
    /// Number of active member connections.
    connection_count: AtomicUsize,
    /// Set by the first membership or full file, cleared by `delete-room`.
    /// Lingering members keep the shell alive but not the room.
    live: AtomicBool,
}

impl ShareRoom {
    fn new(name: &str) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            name: name.to_string(),
            document: RwLock::new(None),
            events_tx,
            connection_count: AtomicUsize::new(0),
            live: AtomicBool::new(false),
        }
    }

    /// The room's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the room's fanout; the receiver must be dropped via
    /// [`Self::unsubscribe`] accounting when the connection closes.
    /// Membership brings the room to life.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        self.live.store(true, Ordering::SeqCst);
        self.events_tx.subscribe()
    }

    /// Leave the room's fanout.
    pub fn unsubscribe(&self) {
        self.connection_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of active member connections.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Whether the room is live: taken for `create-room`, joinable for
    /// `join-room`.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// End the room's existence; the shell survives while members linger.
    fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Whether a shared document currently exists.
    pub async fn has_document(&self) -> bool {
        self.document.read().await.is_some()
    }

    /// The full current cell list, or `None` when nothing is shared.
    pub async fn snapshot(&self) -> Option<Vec<Cell>> {
        let doc = self.document.read().await;
        doc.as_ref().map(|d| d.cells().to_vec())
    }

    /// Unconditionally set the room's document to the given cell list.
    /// The only operation that creates a document from nothing.
    pub async fn replace_all(&self, cells: Vec<Cell>) {
        let mut doc = self.document.write().await;
        let cell_count = cells.len();
        match doc.as_mut() {
            Some(d) => d.replace_all(cells),
            None => *doc = Some(Document::new(cells)),
        }
        self.live.store(true, Ordering::SeqCst);
        debug!("Room {} now shares {} cells", self.name, cell_count);
    }

    /// Drop the document. Returns whether one existed.
    pub async fn clear_document(&self) -> bool {
        self.document.write().await.take().is_some()
    }

    /// Emit an event to every member; each member's socket task filters out
    /// events whose origin is itself.
    pub fn broadcast(&self, origin: ConnectionId, event: ServerEvent) {
        let _ = self.events_tx.send(RoomEvent { origin, event });
    }

    /// Run one mutation against the document under a single write-lock
    /// acquisition, so no two mutations of this room ever interleave.
    async fn with_document<T>(
        &self,
        f: impl FnOnce(&mut Document) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut doc = self.document.write().await;
        match doc.as_mut() {
            Some(d) => f(d),
            None => Err(SyncError::RoomNotFound(self.name.clone())),
        }
    }

    /// Apply a text patch to one cell; broadcast only when the stored text
    /// actually changed. Returns whether it did.
    pub async fn apply_patch(
        &self,
        origin: ConnectionId,
        index: usize,
        patch_set: PatchSet,
    ) -> Result<bool, SyncError> {
        let outcome = self
            .with_document(|doc| patch::apply_text_patch(doc, index, &patch_set))
            .await?;
        if outcome.changed {
            self.broadcast(
                origin,
                ServerEvent::PatchClient {
                    index,
                    patch: patch_set,
                },
            );
        }
        Ok(outcome.changed)
    }

    /// Replace one cell's output; broadcast unconditionally on success.
    pub async fn set_output(
        &self,
        origin: ConnectionId,
        index: usize,
        output: Vec<OutputItem>,
    ) -> Result<(), SyncError> {
        self.with_document(|doc| doc.set_cell_output(index, output.clone()))
            .await?;
        self.broadcast(origin, ServerEvent::OutputAdd { index, output });
        Ok(())
    }

    /// Resolve a move descriptor; broadcast the original descriptor.
    pub async fn apply_move(
        &self,
        origin: ConnectionId,
        cell_edit: CellEdit,
    ) -> Result<(), SyncError> {
        self.with_document(|doc| edit::apply_structural_edit(doc, &cell_edit))
            .await?;
        self.broadcast(origin, ServerEvent::MoveCell { edit: cell_edit });
        Ok(())
    }

    /// Resolve an insert/delete descriptor; broadcast the original descriptor.
    pub async fn apply_cells_edit(
        &self,
        origin: ConnectionId,
        cell_edit: CellEdit,
    ) -> Result<(), SyncError> {
        self.with_document(|doc| edit::apply_structural_edit(doc, &cell_edit))
            .await?;
        self.broadcast(origin, ServerEvent::UpdateCell { edit: cell_edit });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn origin() -> ConnectionId {
        Uuid::new_v4()
    }

    fn cells(texts: &[&str]) -> Vec<Cell> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Cell::new(2, i, *t))
            .collect()
    }

    #[tokio::test]
    async fn test_room_lifecycle_checks() {
        let state = ShareState::new();

        assert!(state.create_check("r1").await);
        assert!(!state.join_check("r1").await);

        let room = state.get_or_create_room("r1").await;
        // A shell with no membership and no document is not a room yet.
        assert!(state.create_check("r1").await);

        room.replace_all(cells(&["a"])).await;
        assert!(!state.create_check("r1").await);
        assert!(state.join_check("r1").await);

        state.delete_room("r1", origin()).await;
        assert!(state.create_check("r1").await);
        assert!(!state.join_check("r1").await);
        // No members and no document: the shell is gone too.
        assert!(state.get_room("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_create_reserves_name_before_full_file() {
        let state = ShareState::new();

        // A sharer's create joins membership without sending a document yet
        let room = state.get_or_create_room("r1").await;
        let rx = room.subscribe();

        assert!(!state.create_check("r1").await);
        assert!(state.join_check("r1").await);

        // The sharer leaves without ever sharing; the name frees up again
        room.unsubscribe();
        drop(rx);
        state.maybe_remove_room("r1").await;
        assert!(state.create_check("r1").await);
        assert!(!state.join_check("r1").await);
    }

    #[tokio::test]
    async fn test_delete_room_reverts_checks_while_members_linger() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        let _rx = room.subscribe();
        room.replace_all(cells(&["a"])).await;

        state.delete_room("r1", origin()).await;

        // The member is still connected, so the shell survives, but the
        // room itself is gone: the name is free and not joinable.
        assert!(state.get_room("r1").await.is_some());
        assert!(state.create_check("r1").await);
        assert!(!state.join_check("r1").await);
    }

    #[tokio::test]
    async fn test_delete_room_broadcasts_end_before_dropping() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        room.replace_all(cells(&["a"])).await;

        let mut rx = room.subscribe();
        state.delete_room("r1", origin()).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, ServerEvent::End);
        assert!(room.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_room_is_a_no_op() {
        let state = ShareState::new();
        state.delete_room("ghost", origin()).await;
        assert!(state.get_room("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trips_replace_all() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        let list = cells(&["a", "b", "c"]);
        room.replace_all(list.clone()).await;
        assert_eq!(room.snapshot().await.unwrap(), list);
    }

    #[tokio::test]
    async fn test_patch_broadcasts_only_real_changes() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        room.replace_all(cells(&["hello world"])).await;

        let mut rx = room.subscribe();
        let sharer = origin();

        // Empty patch set: no mutation, no broadcast.
        let changed = room
            .apply_patch(sharer, 0, PatchSet::default())
            .await
            .unwrap();
        assert!(!changed);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // Real patch: mutation and broadcast.
        let patch = PatchSet::between("hello world", "hello there world").unwrap();
        let changed = room.apply_patch(sharer, 0, patch.clone()).await.unwrap();
        assert!(changed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, sharer);
        assert_eq!(event.event, ServerEvent::PatchClient { index: 0, patch });

        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot[0].text, "hello there world");
    }

    #[tokio::test]
    async fn test_patch_against_missing_room_fails() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        let err = room
            .apply_patch(origin(), 0, PatchSet::between("a", "b").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_output_broadcasts_unconditionally() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        room.replace_all(cells(&["1 + 1"])).await;

        let mut rx = room.subscribe();
        let output = vec![OutputItem {
            mime: "text/plain".to_string(),
            data: serde_json::json!("2"),
        }];
        room.set_output(origin(), 0, output.clone()).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, ServerEvent::OutputAdd { index: 0, output });

        // Setting the same output again still broadcasts.
        let same = room.snapshot().await.unwrap()[0].output.clone();
        room.set_output(origin(), 0, same).await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_structural_edit_broadcasts_original_descriptor() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        room.replace_all(cells(&["a", "b"])).await;

        let mut rx = room.subscribe();
        let cell_edit = CellEdit {
            position: 1,
            deleted_count: 0,
            items: vec![Cell::new(2, 1, "x")],
        };
        room.apply_cells_edit(origin(), cell_edit.clone())
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, ServerEvent::UpdateCell { edit: cell_edit });

        let snapshot = room.snapshot().await.unwrap();
        let texts: Vec<_> = snapshot.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["a", "x", "b"]);
        for (i, cell) in snapshot.iter().enumerate() {
            assert_eq!(cell.index, i);
        }
    }

    #[tokio::test]
    async fn test_invalid_edit_drops_event_and_keeps_document() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        room.replace_all(cells(&["a"])).await;

        let mut rx = room.subscribe();
        let bad = CellEdit {
            position: 9,
            deleted_count: 2,
            items: Vec::new(),
        };
        let err = room.apply_cells_edit(origin(), bad).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidEdit(_)));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(room.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_shells() {
        let state = ShareState::new();
        let idle = state.get_or_create_room("idle").await;
        let shared = state.get_or_create_room("shared").await;
        shared.replace_all(cells(&["a"])).await;
        let occupied = state.get_or_create_room("occupied").await;
        let _rx = occupied.subscribe();
        drop(idle);

        assert_eq!(state.sweep_idle().await, 1);
        assert!(state.get_room("idle").await.is_none());
        assert!(state.get_room("shared").await.is_some());
        assert!(state.get_room("occupied").await.is_some());

        let stats = state.stats().await;
        assert_eq!(stats.active_rooms, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.shared_documents, 1);
    }

    #[tokio::test]
    async fn test_connection_count_tracks_subscriptions() {
        let state = ShareState::new();
        let room = state.get_or_create_room("r1").await;
        assert_eq!(room.connection_count(), 0);

        let _rx1 = room.subscribe();
        let _rx2 = room.subscribe();
        assert_eq!(room.connection_count(), 2);

        room.unsubscribe();
        assert_eq!(room.connection_count(), 1);
    }
}
