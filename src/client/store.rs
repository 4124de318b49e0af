//! Client-side board state with optimistic moves.
//!
//! The store keeps two snapshots: `confirmed`, the last state the server
//! acknowledged, and `current`, which is `confirmed` with every move still
//! in flight laid over it. A move is applied to `current` immediately,
//! tagged with a fresh revision, and queued. Requests leave the queue one at
//! a time in the order they were issued, so a follow-up move of the same
//! entity is sent only after the earlier one settled and carries the version
//! that one committed. An answer for a revision that a newer move of the same
//! entity has replaced only reaches `confirmed`. Rejections drop the move
//! from `current` and keep the others; conflicts, timeouts and transport
//! failures also refetch the board.

use crate::{
    client::transport::BoardTransport,
    config::SyncConfig,
    domain::{
        position::renumber, BoardId, BoardSnapshot, Card, CardId, ChangeEvent, ChangeRecord,
        List, ListId, PositionAllocator, Positioned,
    },
    error::{EntityKind, Result, SyncError},
    protocol::MoveCardRequest,
};
use std::{collections::HashMap, fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex, OwnedMutexGuard},
    task::JoinHandle,
};

/// What [`BoardStore::apply_remote`] did with a broadcast record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    /// Already folded in; sequence at or below the confirmed watermark
    Duplicate,
    /// A sequence gap or an unknown entity forced a full refetch
    Resynced,
    /// Record belongs to another board
    Ignored,
}

/// What a pending move is tracked under. A list move resends the whole
/// order, so all list moves share one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PendingKey {
    Card(CardId),
    ListOrder,
}

/// Where a move put its entity in the current view
#[derive(Debug, Clone)]
enum Placed {
    Card {
        card_id: CardId,
        list_id: ListId,
        position: f64,
        /// Siblings the local allocator renumbered to make room
        renumbered: Vec<(CardId, f64)>,
    },
    Lists(Vec<ListId>),
}

impl Placed {
    fn apply_to(&self, snapshot: &mut BoardSnapshot) {
        match self {
            Self::Card {
                card_id,
                list_id,
                position,
                renumbered,
            } => {
                for (sibling, sibling_position) in renumbered {
                    if snapshot.card(*sibling).map_or(false, |c| c.list_id == *list_id) {
                        snapshot.reposition_card(*sibling, *list_id, *sibling_position);
                    }
                }
                snapshot.reposition_card(*card_id, *list_id, *position);
            }
            Self::Lists(order) => arrange_lists(snapshot, order),
        }
    }
}

/// Moves of one entity still waiting for an answer
#[derive(Debug, Clone)]
struct Pending {
    latest: u64,
    in_flight: usize,
    placed: Placed,
    /// Version an earlier move of ours committed while later ones waited
    committed_version: Option<u64>,
}

/// A move's place in the send queue. Dropping it lets the next move go.
struct Turn {
    previous: Arc<Mutex<()>>,
    _held: OwnedMutexGuard<()>,
}

impl Turn {
    /// Resolves once every move issued before this one has settled
    async fn wait(&self) {
        drop(self.previous.lock().await);
    }
}

struct StoreState {
    confirmed: BoardSnapshot,
    current: BoardSnapshot,
    revision: u64,
    pending: HashMap<PendingKey, Pending>,
    queue_tail: Arc<Mutex<()>>,
}

impl StoreState {
    fn next_revision(&mut self, key: PendingKey, placed: Placed) -> u64 {
        self.revision += 1;
        let revision = self.revision;
        self.pending
            .entry(key)
            .and_modify(|pending| {
                pending.latest = revision;
                pending.in_flight += 1;
                pending.placed = placed.clone();
            })
            .or_insert(Pending {
                latest: revision,
                in_flight: 1,
                placed,
                committed_version: None,
            });
        revision
    }

    /// Settles `revision` of `key`, remembering the version it committed.
    /// Returns false when a newer move of the same entity has been issued.
    fn settle(&mut self, key: PendingKey, revision: u64, committed: Option<u64>) -> bool {
        let Some(pending) = self.pending.get_mut(&key) else {
            return true;
        };
        if let Some(version) = committed {
            pending.committed_version = Some(pending.committed_version.map_or(version, |v| v.max(version)));
        }
        pending.in_flight = pending.in_flight.saturating_sub(1);
        let latest = pending.latest == revision;
        if pending.in_flight == 0 {
            self.pending.remove(&key);
        }
        latest
    }

    /// Version the next request for `key` must expect
    fn expected_version(&self, key: PendingKey, issued: u64) -> u64 {
        self.pending
            .get(&key)
            .and_then(|pending| pending.committed_version)
            .map_or(issued, |committed| committed.max(issued))
    }

    /// Lines up behind the move issued before this one
    async fn enqueue(&mut self) -> Turn {
        let slot = Arc::new(Mutex::new(()));
        let held = Arc::clone(&slot).lock_owned().await;
        let previous = std::mem::replace(&mut self.queue_tail, slot);
        Turn {
            previous,
            _held: held,
        }
    }

    /// `current` becomes `confirmed` with every pending move laid over it
    fn rebuild_current(&mut self) {
        let mut current = self.confirmed.clone();
        for pending in self.pending.values() {
            pending.placed.apply_to(&mut current);
        }
        self.current = current;
    }
}

/// Lightweight stand-in used to run the allocator over a sibling set
#[derive(Debug, Clone, Copy)]
struct Slot<Id> {
    id: Id,
    position: f64,
}

impl<Id: Copy + Eq + Ord + Debug> Positioned for Slot<Id> {
    type Id = Id;

    fn id(&self) -> Id {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn set_position(&mut self, position: f64) {
        self.position = position;
    }
}

fn slots<T: Positioned>(siblings: &[T]) -> Vec<Slot<T::Id>> {
    siblings
        .iter()
        .map(|s| Slot {
            id: s.id(),
            position: s.position(),
        })
        .collect()
}

pub struct BoardStore<T> {
    transport: Arc<T>,
    board_id: BoardId,
    allocator: PositionAllocator,
    request_timeout: Duration,
    state: Mutex<StoreState>,
    updates: watch::Sender<BoardSnapshot>,
}

impl<T: BoardTransport> BoardStore<T> {
    /// Fetches the board and builds a store around it
    pub async fn open(transport: Arc<T>, board_id: BoardId, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let request_timeout = config.request_timeout();
        let snapshot = with_timeout(request_timeout, transport.fetch_board(board_id)).await?;
        let (updates, _) = watch::channel(snapshot.clone());

        tracing::debug!(
            board = %board_id,
            lists = snapshot.lists.len(),
            cards = snapshot.card_count(),
            sequence = snapshot.sequence,
            "opened board store"
        );

        Ok(Self {
            transport,
            board_id,
            allocator: PositionAllocator::from_config(config),
            request_timeout,
            state: Mutex::new(StoreState {
                confirmed: snapshot.clone(),
                current: snapshot,
                revision: 0,
                pending: HashMap::new(),
                queue_tail: Arc::new(Mutex::new(())),
            }),
            updates,
        })
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current view, including moves still in flight
    pub async fn snapshot(&self) -> BoardSnapshot {
        self.state.lock().await.current.clone()
    }

    /// Last state acknowledged by the server
    pub async fn confirmed(&self) -> BoardSnapshot {
        self.state.lock().await.confirmed.clone()
    }

    /// Number of optimistic updates issued so far
    pub async fn revision(&self) -> u64 {
        self.state.lock().await.revision
    }

    /// Receiver that sees every change to the current view
    pub fn observe(&self) -> watch::Receiver<BoardSnapshot> {
        self.updates.subscribe()
    }

    fn publish(&self, state: &StoreState) {
        self.updates.send_replace(state.current.clone());
    }

    /// Moves a card to slot `target_index` of `target_list_id`, counted among
    /// the target list's cards excluding the moved card. Returns the card as
    /// committed by the server.
    pub async fn move_card(
        &self,
        card_id: CardId,
        target_list_id: ListId,
        target_index: usize,
    ) -> Result<Card> {
        let key = PendingKey::Card(card_id);
        let (revision, issued_version, request, turn) = {
            let mut state = self.state.lock().await;
            let current = &mut state.current;

            let card = current
                .card(card_id)
                .cloned()
                .ok_or_else(|| SyncError::not_found(EntityKind::Card, card_id))?;
            let target = current
                .list(target_list_id)
                .ok_or_else(|| SyncError::not_found(EntityKind::List, target_list_id))?;

            let mut siblings: Vec<Slot<CardId>> = slots(&target.cards)
                .into_iter()
                .filter(|s| s.id != card_id)
                .collect();
            let index = target_index.min(siblings.len());
            let after_id = index.checked_sub(1).map(|i| siblings[i].id);
            let before_id = siblings.get(index).map(|s| s.id);

            let placement = self.allocator.place(&mut siblings, index);
            let placed = Placed::Card {
                card_id,
                list_id: target_list_id,
                position: placement.position,
                renumbered: siblings
                    .iter()
                    .filter(|s| placement.renumbered.contains(&s.id))
                    .map(|s| (s.id, s.position))
                    .collect(),
            };
            placed.apply_to(current);

            let request = MoveCardRequest::new(target_list_id, placement.position)
                .between(after_id, before_id);
            let revision = state.next_revision(key, placed);
            let turn = state.enqueue().await;
            self.publish(&state);

            tracing::debug!(
                card = %card_id,
                list = %target_list_id,
                index,
                position = placement.position,
                revision,
                "optimistic card move"
            );
            (revision, card.version, request, turn)
        };

        turn.wait().await;
        let request = {
            let state = self.state.lock().await;
            request.expecting(state.expected_version(key, issued_version))
        };

        let outcome = with_timeout(
            self.request_timeout,
            self.transport.move_card(card_id, request),
        )
        .await;

        match outcome {
            Ok(card) => {
                let mut state = self.state.lock().await;
                fold_card(&mut state.confirmed, &card);
                if state.settle(key, revision, Some(card.version)) {
                    fold_card(&mut state.current, &card);
                } else {
                    tracing::debug!(card = %card_id, revision, "superseded card move confirmed");
                }
                self.publish(&state);
                Ok(card)
            }
            Err(err) => Err(self.reject(key, revision, err).await),
        }
    }

    /// Moves the list at `old_index` to `new_index`, counted among the
    /// board's lists excluding the moved one. The whole resulting order is
    /// sent, so the server renumbers the lists `1..=N`; returns them in their
    /// committed order.
    pub async fn move_list(
        &self,
        board_id: BoardId,
        old_index: usize,
        new_index: usize,
    ) -> Result<Vec<List>> {
        if board_id != self.board_id {
            return Err(SyncError::Validation(format!(
                "store holds board {}, not {}",
                self.board_id, board_id
            )));
        }

        let key = PendingKey::ListOrder;
        let (revision, order, turn) = {
            let mut state = self.state.lock().await;
            let current = &mut state.current;

            let mut order = current.list_ids();
            if old_index >= order.len() {
                return Err(SyncError::Validation(format!(
                    "list index {} out of range for {} lists",
                    old_index,
                    order.len()
                )));
            }
            let list_id = order.remove(old_index);
            let index = new_index.min(order.len());
            order.insert(index, list_id);

            let placed = Placed::Lists(order.clone());
            placed.apply_to(current);
            let revision = state.next_revision(key, placed);
            let turn = state.enqueue().await;
            self.publish(&state);

            tracing::debug!(
                list = %list_id,
                from = old_index,
                to = index,
                revision,
                "optimistic list move"
            );
            (revision, order, turn)
        };

        turn.wait().await;
        let outcome = with_timeout(
            self.request_timeout,
            self.transport.reorder_lists(board_id, order),
        )
        .await;

        match outcome {
            Ok(lists) => {
                let mut state = self.state.lock().await;
                for list in &lists {
                    fold_list(&mut state.confirmed, list);
                }
                if state.settle(key, revision, None) {
                    for list in &lists {
                        fold_list(&mut state.current, list);
                    }
                } else {
                    tracing::debug!(revision, "superseded list order confirmed");
                }
                self.publish(&state);
                Ok(lists)
            }
            Err(err) => Err(self.reject(key, revision, err).await),
        }
    }

    /// Takes a rejected move out of the current view and refetches when the
    /// rejection means the local view is stale. Hands the error back.
    async fn reject(&self, key: PendingKey, revision: u64, err: SyncError) -> SyncError {
        {
            let mut state = self.state.lock().await;
            if !state.settle(key, revision, None) {
                tracing::debug!(?key, revision, error = %err, "superseded move rejected");
                return err;
            }
            state.rebuild_current();
            self.publish(&state);
        }

        tracing::warn!(?key, revision, error = %err, "move rejected, rolled back");

        if err.requires_resync() {
            if let Err(refresh_err) = self.refresh().await {
                tracing::warn!(error = %refresh_err, "resync after rejected move failed");
            }
        }
        err
    }

    /// Replaces `confirmed` with a fresh copy from the server. Moves still
    /// in flight stay in the current view.
    pub async fn refresh(&self) -> Result<BoardSnapshot> {
        let snapshot = with_timeout(
            self.request_timeout,
            self.transport.fetch_board(self.board_id),
        )
        .await?;

        let mut state = self.state.lock().await;
        if snapshot.sequence < state.confirmed.sequence {
            // Remote changes already folded in are newer than this read
            tracing::debug!(
                fetched = snapshot.sequence,
                confirmed = state.confirmed.sequence,
                "discarding stale refetch"
            );
        } else {
            state.confirmed = snapshot;
        }
        state.rebuild_current();
        self.publish(&state);

        tracing::info!(
            board = %self.board_id,
            sequence = state.confirmed.sequence,
            pending = state.pending.len(),
            "board refreshed"
        );
        Ok(state.current.clone())
    }

    /// Folds a broadcast change into the store. Entities with a move of
    /// ours in flight keep their optimistic place in the current view.
    pub async fn apply_remote(&self, record: &ChangeRecord) -> Result<RemoteOutcome> {
        if record.board_id != self.board_id {
            return Ok(RemoteOutcome::Ignored);
        }

        {
            let mut state = self.state.lock().await;
            let watermark = state.confirmed.sequence;

            if record.sequence <= watermark {
                tracing::trace!(sequence = record.sequence, watermark, "duplicate change");
                return Ok(RemoteOutcome::Duplicate);
            }

            if record.sequence == watermark + 1 {
                if apply_event(&mut state.confirmed, &record.event) {
                    state.confirmed.sequence = record.sequence;
                    let pending = event_key(&record.event)
                        .map_or(false, |key| state.pending.contains_key(&key));
                    if !pending {
                        apply_event(&mut state.current, &record.event);
                    }
                    state.current.sequence = record.sequence;
                    self.publish(&state);

                    tracing::debug!(
                        sequence = record.sequence,
                        event = record.event.type_name(),
                        "applied remote change"
                    );
                    return Ok(RemoteOutcome::Applied);
                }
                tracing::warn!(
                    sequence = record.sequence,
                    event = record.event.type_name(),
                    "remote change refers to unknown entity"
                );
            } else {
                tracing::warn!(
                    sequence = record.sequence,
                    watermark,
                    "gap in change sequence"
                );
            }
        }

        self.refresh().await?;
        Ok(RemoteOutcome::Resynced)
    }
}

impl<T: BoardTransport + 'static> BoardStore<T> {
    /// Fire-and-forget variant of [`BoardStore::move_card`]
    pub fn spawn_move_card(
        self: &Arc<Self>,
        card_id: CardId,
        target_list_id: ListId,
        target_index: usize,
    ) -> JoinHandle<Result<Card>> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.move_card(card_id, target_list_id, target_index).await })
    }

    /// Fire-and-forget variant of [`BoardStore::move_list`]
    pub fn spawn_move_list(
        self: &Arc<Self>,
        board_id: BoardId,
        old_index: usize,
        new_index: usize,
    ) -> JoinHandle<Result<Vec<List>>> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.move_list(board_id, old_index, new_index).await })
    }
}

async fn with_timeout<R>(limit: Duration, request: impl Future<Output = Result<R>>) -> Result<R> {
    match tokio::time::timeout(limit, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

/// Puts the lists in `order` and numbers them `1..=N`. Lists the order does
/// not name keep their relative order at the end.
fn arrange_lists(snapshot: &mut BoardSnapshot, order: &[ListId]) {
    snapshot.lists.sort_by_key(|entry| {
        order
            .iter()
            .position(|id| *id == entry.list.id)
            .unwrap_or(order.len())
    });
    renumber(&mut snapshot.lists);
}

/// Takes the server's card unless the snapshot already holds a newer version
fn fold_card(snapshot: &mut BoardSnapshot, card: &Card) -> bool {
    if snapshot.card(card.id).map_or(false, |c| c.version > card.version) {
        return false;
    }
    snapshot.upsert_card(card.clone())
}

fn fold_list(snapshot: &mut BoardSnapshot, list: &List) -> bool {
    match snapshot.list(list.id) {
        Some(entry) if entry.list.version > list.version => false,
        Some(_) => {
            snapshot.upsert_list(list.clone());
            true
        }
        None => false,
    }
}

fn event_key(event: &ChangeEvent) -> Option<PendingKey> {
    match event {
        ChangeEvent::CardMoved { card_id, .. } => Some(PendingKey::Card(*card_id)),
        ChangeEvent::ListMoved { .. } => Some(PendingKey::ListOrder),
        _ => None,
    }
}

/// Applies one event; false when it refers to something the snapshot lacks
fn apply_event(snapshot: &mut BoardSnapshot, event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::CardMoved {
            card_id,
            list_id,
            position,
            version,
        } => match snapshot.card(*card_id).cloned() {
            Some(card) if card.version > *version => true,
            Some(mut card) => {
                card.list_id = *list_id;
                card.position = *position;
                card.version = *version;
                snapshot.upsert_card(card)
            }
            None => false,
        },
        ChangeEvent::ListMoved {
            list_id,
            position,
            version,
        } => match snapshot.list(*list_id).map(|entry| entry.list.clone()) {
            Some(list) if list.version > *version => true,
            Some(mut list) => {
                list.position = *position;
                list.version = *version;
                snapshot.upsert_list(list);
                true
            }
            None => false,
        },
        ChangeEvent::CardCreated { card } => fold_card(snapshot, card),
        ChangeEvent::CardDeleted { card_id, .. } => {
            snapshot.remove_card(*card_id);
            true
        }
        ChangeEvent::ListCreated { list } => {
            if list.board_id != snapshot.board.id {
                return false;
            }
            if snapshot.list(list.id).is_none() {
                snapshot.upsert_list(list.clone());
            }
            true
        }
        ChangeEvent::ListDeleted { list_id } => {
            snapshot.remove_list(*list_id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::transport::LocalTransport,
        domain::{position::is_strictly_ordered, ProjectId},
        server::{ChangeBroadcaster, Reconciler},
        storage::{MemoryStorage, Storage},
    };
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex as StdMutex,
    };
    use tokio::sync::{broadcast, Notify};

    /// Local transport whose next move can be failed, held back or hung
    struct ScriptedTransport {
        inner: LocalTransport,
        fail_next: StdMutex<Option<SyncError>>,
        /// Park the next request before it reaches the server
        hold_next: AtomicBool,
        /// Park the next answer after the server committed it
        hold_reply: AtomicBool,
        release: Notify,
        hang: AtomicBool,
        fetches: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(reconciler: Arc<Reconciler>) -> Self {
            Self {
                inner: LocalTransport::new(reconciler),
                fail_next: StdMutex::new(None),
                hold_next: AtomicBool::new(false),
                hold_reply: AtomicBool::new(false),
                release: Notify::new(),
                hang: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fail_next(&self, err: SyncError) {
            *self.fail_next.lock().unwrap() = Some(err);
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        async fn before_move(&self) -> Result<()> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.hold_next.swap(false, Ordering::SeqCst) {
                self.release.notified().await;
            }
            match self.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl BoardTransport for ScriptedTransport {
        async fn fetch_board(&self, board_id: BoardId) -> Result<BoardSnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_board(board_id).await
        }

        async fn move_card(&self, card_id: CardId, request: MoveCardRequest) -> Result<Card> {
            self.before_move().await?;
            let card = self.inner.move_card(card_id, request).await?;
            if self.hold_reply.swap(false, Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(card)
        }

        async fn reorder_lists(
            &self,
            board_id: BoardId,
            list_ids: Vec<ListId>,
        ) -> Result<Vec<List>> {
            self.before_move().await?;
            self.inner.reorder_lists(board_id, list_ids).await
        }

        async fn subscribe(
            &self,
            board_id: BoardId,
        ) -> Result<broadcast::Receiver<ChangeRecord>> {
            self.inner.subscribe(board_id).await
        }
    }

    struct Fixture {
        reconciler: Arc<Reconciler>,
        transport: Arc<ScriptedTransport>,
        store: Arc<BoardStore<ScriptedTransport>>,
        board_id: BoardId,
        todo: ListId,
        done: ListId,
        cards: Vec<Card>,
    }

    async fn fixture(config: SyncConfig) -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let reconciler = Arc::new(Reconciler::new(
            storage,
            Arc::new(ChangeBroadcaster::new(64)),
        ));
        let board = reconciler
            .create_board(ProjectId::new(), "Board")
            .await
            .unwrap();
        let todo = reconciler.create_list(board.id, "Todo").await.unwrap();
        let done = reconciler.create_list(board.id, "Done").await.unwrap();

        let mut cards = Vec::new();
        for title in ["a", "b", "c"] {
            cards.push(reconciler.create_card(todo.id, title, None).await.unwrap());
        }

        let transport = Arc::new(ScriptedTransport::new(reconciler.clone()));
        let store = BoardStore::open(transport.clone(), board.id, &config)
            .await
            .unwrap();

        Fixture {
            reconciler,
            transport,
            store: Arc::new(store),
            board_id: board.id,
            todo: todo.id,
            done: done.id,
            cards,
        }
    }

    fn positions(snapshot: &BoardSnapshot, list_id: ListId) -> Vec<f64> {
        snapshot
            .list(list_id)
            .unwrap()
            .cards
            .iter()
            .map(|c| c.position)
            .collect()
    }

    #[tokio::test]
    async fn test_move_card_confirms() {
        let fx = fixture(SyncConfig::default()).await;
        let c = fx.cards[2].id;

        let card = fx.store.move_card(c, fx.todo, 0).await.unwrap();

        assert_eq!(card.position, 0.5);
        assert_eq!(card.version, 1);
        let snapshot = fx.store.snapshot().await;
        assert_eq!(
            snapshot.card_ids(fx.todo),
            vec![c, fx.cards[0].id, fx.cards[1].id]
        );
        assert_eq!(snapshot, fx.store.confirmed().await);
        assert_eq!(fx.store.revision().await, 1);
    }

    #[tokio::test]
    async fn test_move_card_to_another_list() {
        let fx = fixture(SyncConfig::default()).await;
        let a = fx.cards[0].id;

        let card = fx.store.move_card(a, fx.done, 5).await.unwrap();

        assert_eq!(card.list_id, fx.done);
        assert_eq!(card.position, 1.0);
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card_ids(fx.done), vec![a]);
        assert_eq!(snapshot.card_ids(fx.todo).len(), 2);
    }

    #[tokio::test]
    async fn test_optimistic_view_before_confirmation() {
        let fx = fixture(SyncConfig::default()).await;
        let a = fx.cards[0].id;
        fx.transport.hold_next.store(true, Ordering::SeqCst);

        let handle = fx.store.spawn_move_card(a, fx.done, 0);
        // Wait until the move is parked inside the transport
        while fx.transport.hold_next.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        assert_eq!(fx.store.snapshot().await.card_ids(fx.done), vec![a]);
        assert!(fx.store.confirmed().await.card_ids(fx.done).is_empty());

        fx.transport.release.notify_one();
        handle.await.unwrap().unwrap();
        assert_eq!(fx.store.confirmed().await.card_ids(fx.done), vec![a]);
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_and_refetches() {
        let fx = fixture(SyncConfig::default()).await;
        let a = fx.cards[0].id;
        fx.transport
            .fail_next(SyncError::Conflict("stale".to_string()));

        let result = fx.store.move_card(a, fx.done, 0).await;

        assert!(matches!(result, Err(SyncError::Conflict(_))));
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot, fx.store.confirmed().await);
        assert_eq!(snapshot.card(a).unwrap().list_id, fx.todo);
        assert_eq!(fx.transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_not_found_rolls_back_without_refetch() {
        let fx = fixture(SyncConfig::default()).await;
        let a = fx.cards[0].id;
        fx.transport
            .fail_next(SyncError::not_found(EntityKind::Card, a));

        let result = fx.store.move_card(a, fx.done, 0).await;

        assert!(matches!(result, Err(SyncError::NotFound { .. })));
        assert_eq!(fx.store.snapshot().await, fx.store.confirmed().await);
        assert_eq!(fx.transport.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_treated_as_rejection() {
        let config = SyncConfig {
            request_timeout_ms: 50,
            ..SyncConfig::default()
        };
        let fx = fixture(config).await;
        fx.transport.hang.store(true, Ordering::SeqCst);

        let result = fx.store.move_card(fx.cards[0].id, fx.done, 0).await;

        assert!(matches!(result, Err(SyncError::Timeout(_))));
        assert_eq!(fx.store.snapshot().await, fx.store.confirmed().await);
        assert_eq!(fx.transport.fetches(), 2);
    }

    async fn wait_for_revision(store: &BoardStore<ScriptedTransport>, revision: u64) {
        while store.revision().await < revision {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until_parked(flag: &AtomicBool) {
        while flag.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_newer_move_of_same_card_wins() {
        let fx = fixture(SyncConfig::default()).await;
        let (a, b, c) = (fx.cards[0].id, fx.cards[1].id, fx.cards[2].id);
        fx.transport.hold_reply.store(true, Ordering::SeqCst);

        // The first move is committed, its answer is still on the way
        let first = fx.store.spawn_move_card(a, fx.done, 0);
        wait_until_parked(&fx.transport.hold_reply).await;
        let stored = fx.reconciler.storage().load_card(&a).await.unwrap();
        assert_eq!((stored.list_id, stored.version), (fx.done, 1));

        let second = fx.store.spawn_move_card(a, fx.todo, 1);
        wait_for_revision(&fx.store, 2).await;
        assert_eq!(fx.store.snapshot().await.card_ids(fx.todo), vec![b, a, c]);

        fx.transport.release.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.position, 2.5);

        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card_ids(fx.todo), vec![b, a, c]);
        assert_eq!(snapshot, fx.store.confirmed().await);
        let stored = fx.reconciler.storage().load_card(&a).await.unwrap();
        assert_eq!((stored.list_id, stored.version), (fx.todo, 2));
        assert_eq!(fx.transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_queued_move_is_sent_after_the_earlier_one() {
        let fx = fixture(SyncConfig::default()).await;
        let (a, b, c) = (fx.cards[0].id, fx.cards[1].id, fx.cards[2].id);
        fx.transport.hold_next.store(true, Ordering::SeqCst);

        let first = fx.store.spawn_move_card(c, fx.done, 0);
        wait_until_parked(&fx.transport.hold_next).await;

        // Issued while the first request has not reached the server yet
        let second = fx.store.spawn_move_card(c, fx.todo, 0);
        wait_for_revision(&fx.store, 2).await;
        assert_eq!(fx.store.snapshot().await.card_ids(fx.todo), vec![c, a, b]);
        assert_eq!(fx.reconciler.storage().load_card(&c).await.unwrap().version, 0);

        fx.transport.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().list_id, fx.done);
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.position, 0.5);
        assert_eq!(second.version, 2);

        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card_ids(fx.todo), vec![c, a, b]);
        assert_eq!(snapshot, fx.store.confirmed().await);
        assert_eq!(fx.transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_rejection_keeps_other_moves_in_flight() {
        let fx = fixture(SyncConfig::default()).await;
        let (a, b, c) = (fx.cards[0].id, fx.cards[1].id, fx.cards[2].id);
        fx.transport.hold_next.store(true, Ordering::SeqCst);

        let first = fx.store.spawn_move_card(b, fx.todo, 0);
        wait_until_parked(&fx.transport.hold_next).await;
        let second = fx.store.spawn_move_card(a, fx.done, 0);
        wait_for_revision(&fx.store, 2).await;

        // b is rejected; a's request then parks in turn
        fx.transport
            .fail_next(SyncError::Conflict("stale".to_string()));
        fx.transport.hold_next.store(true, Ordering::SeqCst);
        fx.transport.release.notify_one();

        assert!(matches!(first.await.unwrap(), Err(SyncError::Conflict(_))));
        wait_until_parked(&fx.transport.hold_next).await;

        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card_ids(fx.todo), vec![b, c]);
        assert_eq!(snapshot.card_ids(fx.done), vec![a]);
        assert_eq!(fx.store.confirmed().await.card_ids(fx.todo), vec![a, b, c]);
        assert_eq!(fx.transport.fetches(), 2);

        fx.transport.release.notify_one();
        second.await.unwrap().unwrap();
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card_ids(fx.done), vec![a]);
        assert_eq!(snapshot, fx.store.confirmed().await);
    }

    #[tokio::test]
    async fn test_move_unknown_card_is_not_sent() {
        let fx = fixture(SyncConfig::default()).await;

        let result = fx.store.move_card(CardId::new(), fx.todo, 0).await;
        assert!(matches!(
            result,
            Err(SyncError::NotFound {
                kind: EntityKind::Card,
                ..
            })
        ));

        let result = fx.store.move_card(fx.cards[0].id, ListId::new(), 0).await;
        assert!(matches!(
            result,
            Err(SyncError::NotFound {
                kind: EntityKind::List,
                ..
            })
        ));
        assert_eq!(fx.store.revision().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_gap_renumbers_locally() {
        let fx = fixture(SyncConfig::default()).await;
        let storage = fx.reconciler.storage().clone();
        let mut b = storage.load_card(&fx.cards[1].id).await.unwrap();
        b.position = 1.0 + 1e-10;
        storage.save_card(&b).await.unwrap();
        fx.store.refresh().await.unwrap();

        let c = fx.cards[2].id;
        let card = fx.store.move_card(c, fx.todo, 1).await.unwrap();

        assert_eq!(card.position, 1.5);
        let snapshot = fx.store.snapshot().await;
        assert_eq!(positions(&snapshot, fx.todo), vec![1.0, 1.5, 2.0]);
        assert!(is_strictly_ordered(&snapshot.list(fx.todo).unwrap().cards));
    }

    #[tokio::test]
    async fn test_move_list() {
        let fx = fixture(SyncConfig::default()).await;

        let lists = fx.store.move_list(fx.board_id, 1, 0).await.unwrap();

        let committed: Vec<(ListId, f64)> = lists.iter().map(|l| (l.id, l.position)).collect();
        assert_eq!(committed, vec![(fx.done, 1.0), (fx.todo, 2.0)]);
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.list_ids(), vec![fx.done, fx.todo]);
        assert_eq!(snapshot, fx.store.confirmed().await);
        // Cards travel with their list
        assert_eq!(snapshot.card_ids(fx.todo).len(), fx.cards.len());

        let stored = fx.reconciler.snapshot(fx.board_id).await.unwrap();
        assert_eq!(stored.list_ids(), vec![fx.done, fx.todo]);
    }

    #[tokio::test]
    async fn test_rejected_list_move_rolls_back() {
        let fx = fixture(SyncConfig::default()).await;
        fx.transport
            .fail_next(SyncError::Conflict("lists changed".to_string()));

        let result = fx.store.move_list(fx.board_id, 0, 1).await;

        assert!(matches!(result, Err(SyncError::Conflict(_))));
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.list_ids(), vec![fx.todo, fx.done]);
        assert_eq!(snapshot, fx.store.confirmed().await);
        assert_eq!(fx.transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let fx = fixture(SyncConfig::default()).await;
        let config = SyncConfig {
            renumber_epsilon: 0.0,
            ..SyncConfig::default()
        };

        let result = BoardStore::open(fx.transport.clone(), fx.board_id, &config).await;

        assert!(matches!(result, Err(SyncError::ConfigError(_))));
        assert_eq!(fx.transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_move_list_validation() {
        let fx = fixture(SyncConfig::default()).await;

        let wrong_board = fx.store.move_list(BoardId::new(), 0, 1).await;
        assert!(matches!(wrong_board, Err(SyncError::Validation(_))));

        let out_of_range = fx.store.move_list(fx.board_id, 7, 0).await;
        assert!(matches!(out_of_range, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_observe_sees_optimistic_updates() {
        let fx = fixture(SyncConfig::default()).await;
        let mut updates = fx.store.observe();
        assert!(!updates.has_changed().unwrap());

        fx.store
            .move_card(fx.cards[0].id, fx.done, 0)
            .await
            .unwrap();

        assert!(updates.has_changed().unwrap());
        assert_eq!(
            updates.borrow_and_update().card_ids(fx.done),
            vec![fx.cards[0].id]
        );
    }

    #[tokio::test]
    async fn test_apply_remote_dedups_and_detects_gaps() {
        let fx = fixture(SyncConfig::default()).await;
        let mut receiver = fx.reconciler.broadcaster().subscribe(fx.board_id).await;

        let moved = fx
            .reconciler
            .move_card(fx.cards[0].id, &MoveCardRequest::new(fx.done, 1.0))
            .await
            .unwrap();
        let record = receiver.recv().await.unwrap();

        assert_eq!(fx.store.apply_remote(&record).await.unwrap(), RemoteOutcome::Applied);
        assert_eq!(fx.store.apply_remote(&record).await.unwrap(), RemoteOutcome::Duplicate);
        let snapshot = fx.store.snapshot().await;
        assert_eq!(snapshot.card(moved.id).unwrap().list_id, fx.done);
        assert_eq!(snapshot.sequence, record.sequence);

        fx.reconciler.create_card(fx.done, "d", None).await.unwrap();
        fx.reconciler.create_card(fx.done, "e", None).await.unwrap();
        receiver.recv().await.unwrap();
        let latest = receiver.recv().await.unwrap();

        assert_eq!(fx.store.apply_remote(&latest).await.unwrap(), RemoteOutcome::Resynced);
        assert_eq!(fx.store.snapshot().await.card_ids(fx.done).len(), 3);

        let mut foreign = latest.clone();
        foreign.board_id = BoardId::new();
        assert_eq!(fx.store.apply_remote(&foreign).await.unwrap(), RemoteOutcome::Ignored);
    }
}
