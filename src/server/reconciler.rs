//! Server-side validation and commit of client-proposed moves.
//!
//! Client positions are untrusted. Every move re-reads the persisted
//! siblings of its target parent under that parent's lock, keeps the
//! requested position only if it still fits the resolved slot, and otherwise
//! recomputes it from the stored neighbours (renumbering when the gap is
//! exhausted). Committed changes are published while the lock is held so
//! the broadcast order matches the commit order.

use crate::{
    config::SyncConfig,
    domain::{
        position::{index_of, neighbors_at, sort_siblings},
        Board, BoardId, BoardSnapshot, Card, CardId, ChangeEvent, List, ListId, Placement,
        PositionAllocator, Positioned, ProjectId,
    },
    error::{EntityKind, Result, SyncError},
    protocol::{
        validate_position, CommittedPosition, EntityRef, MoveCardRequest, MoveListRequest,
        MoveRequest, ParentRef,
    },
    server::{broadcaster::ChangeBroadcaster, locks::ParentLocks},
    storage::Storage,
};
use std::{collections::HashSet, sync::Arc};

pub struct Reconciler {
    storage: Arc<dyn Storage>,
    broadcaster: Arc<ChangeBroadcaster>,
    allocator: PositionAllocator,
    locks: ParentLocks,
    max_lock_attempts: usize,
}

impl Reconciler {
    pub fn new(storage: Arc<dyn Storage>, broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self::build(storage, broadcaster, &SyncConfig::default())
    }

    /// Builds a reconciler from a configuration, rejecting invalid settings
    pub fn with_config(
        storage: Arc<dyn Storage>,
        broadcaster: Arc<ChangeBroadcaster>,
        config: &SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(storage, broadcaster, config))
    }

    fn build(
        storage: Arc<dyn Storage>,
        broadcaster: Arc<ChangeBroadcaster>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            storage,
            broadcaster,
            allocator: PositionAllocator::from_config(config),
            locks: ParentLocks::new(),
            max_lock_attempts: config.max_lock_attempts.max(1),
        }
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Reads the whole board. The sequence watermark is taken before the
    /// read, so replaying any later broadcast record onto it is safe.
    pub async fn snapshot(&self, board_id: BoardId) -> Result<BoardSnapshot> {
        let sequence = self.broadcaster.current_sequence(board_id).await;
        self.storage.load_snapshot(&board_id, sequence).await
    }

    /// Validates and commits a move of either entity kind
    pub async fn apply_move(&self, request: MoveRequest) -> Result<CommittedPosition> {
        match request {
            MoveRequest::Card { card_id, request } => {
                let (card, changed) = self.commit_card_move(card_id, &request).await?;
                Ok(CommittedPosition {
                    entity: EntityRef::Card(card.id),
                    parent: ParentRef::List(card.list_id),
                    position: card.position,
                    version: card.version,
                    changed,
                })
            }
            MoveRequest::List { list_id, request } => {
                let (list, changed) = self.commit_list_move(list_id, &request).await?;
                Ok(CommittedPosition {
                    entity: EntityRef::List(list.id),
                    parent: ParentRef::Board(list.board_id),
                    position: list.position,
                    version: list.version,
                    changed,
                })
            }
        }
    }

    /// Moves a card and returns the committed card
    pub async fn move_card(&self, card_id: CardId, request: &MoveCardRequest) -> Result<Card> {
        self.commit_card_move(card_id, request)
            .await
            .map(|(card, _)| card)
    }

    /// Moves a list within its board and returns the committed list
    pub async fn move_list(&self, list_id: ListId, request: &MoveListRequest) -> Result<List> {
        self.commit_list_move(list_id, request)
            .await
            .map(|(list, _)| list)
    }

    async fn commit_card_move(
        &self,
        card_id: CardId,
        request: &MoveCardRequest,
    ) -> Result<(Card, bool)> {
        validate_position(request.new_position)?;
        let target_id = request.target_list_id;

        for attempt in 1..=self.max_lock_attempts {
            let source_id = self.storage.load_card(&card_id).await?.list_id;
            let _guards = self
                .locks
                .lock([ParentRef::List(source_id), ParentRef::List(target_id)])
                .await;

            // Re-read under the lock: the card may have been deleted or moved
            let mut card = self.storage.load_card(&card_id).await?;
            if card.list_id != source_id {
                tracing::debug!(card = %card_id, attempt, "card changed lists while waiting for lock");
                continue;
            }

            let target = self.storage.load_list(&target_id).await?;
            if source_id != target_id {
                let source = self.storage.load_list(&source_id).await?;
                if source.board_id != target.board_id {
                    return Err(SyncError::Validation(format!(
                        "card {} cannot move to list {} on another board",
                        card_id, target_id
                    )));
                }
            }

            if card.is_at(target_id, request.new_position) {
                tracing::debug!(card = %card_id, "move already applied");
                return Ok((card, false));
            }
            check_version(EntityKind::Card, card_id, card.version, request.expected_version)?;

            let mut siblings: Vec<Card> = self
                .storage
                .cards_for_list(&target_id)
                .await?
                .into_iter()
                .filter(|c| c.id != card_id)
                .collect();
            sort_siblings(&mut siblings);

            let placement = self.resolve_slot(
                &mut siblings,
                request.new_position,
                request.after_id,
                request.before_id,
                EntityKind::Card,
            )?;

            let mut writes = self.collect_renumbered(&siblings, &placement, ChangeEvent::card_moved);
            let renumbered = writes.len();
            card.move_to(target_id, placement.position);
            writes.push((card.clone(), ChangeEvent::card_moved(&card)));
            self.commit_cards(target.board_id, writes).await?;

            tracing::info!(
                card = %card_id,
                from = %source_id,
                to = %target_id,
                requested = request.new_position,
                position = card.position,
                version = card.version,
                renumbered,
                "committed card move"
            );

            return Ok((card, true));
        }

        tracing::warn!(card = %card_id, "card kept moving while waiting for its list lock");
        Err(SyncError::Conflict(format!(
            "card {} was moved concurrently",
            card_id
        )))
    }

    async fn commit_list_move(
        &self,
        list_id: ListId,
        request: &MoveListRequest,
    ) -> Result<(List, bool)> {
        validate_position(request.new_position)?;
        let board_id = request.board_id;

        self.storage.load_board(&board_id).await?;
        let _guards = self.locks.lock([ParentRef::Board(board_id)]).await;

        let mut list = self.storage.load_list(&list_id).await?;
        if list.board_id != board_id {
            return Err(SyncError::Validation(format!(
                "list {} does not belong to board {}",
                list_id, board_id
            )));
        }

        if list.position == request.new_position {
            tracing::debug!(list = %list_id, "move already applied");
            return Ok((list, false));
        }
        check_version(EntityKind::List, list_id, list.version, request.expected_version)?;

        let mut siblings: Vec<List> = self
            .storage
            .lists_for_board(&board_id)
            .await?
            .into_iter()
            .filter(|l| l.id != list_id)
            .collect();
        sort_siblings(&mut siblings);

        let placement = self.resolve_slot(
            &mut siblings,
            request.new_position,
            request.after_id,
            request.before_id,
            EntityKind::List,
        )?;

        let mut writes = self.collect_renumbered(&siblings, &placement, ChangeEvent::list_moved);
        let renumbered = writes.len();
        list.move_to(placement.position);
        writes.push((list.clone(), ChangeEvent::list_moved(&list)));
        self.commit_lists(board_id, writes).await?;

        tracing::info!(
            list = %list_id,
            board = %board_id,
            requested = request.new_position,
            position = list.position,
            version = list.version,
            renumbered,
            "committed list move"
        );

        Ok((list, true))
    }

    /// Rewrites the board's list order to match `list_ids` exactly, which must
    /// be a permutation of the board's lists. Lists end up at `1..=N`; only the
    /// ones whose position changed are written and broadcast.
    pub async fn reorder_lists(&self, board_id: BoardId, list_ids: &[ListId]) -> Result<Vec<List>> {
        self.storage.load_board(&board_id).await?;
        let _guards = self.locks.lock([ParentRef::Board(board_id)]).await;

        let mut lists = self.storage.lists_for_board(&board_id).await?;
        validate_permutation(&lists, list_ids)?;

        lists.sort_by_key(|l| list_ids.iter().position(|id| *id == l.id));

        let mut writes = Vec::new();
        for (index, list) in lists.iter_mut().enumerate() {
            let position = (index + 1) as f64;
            if list.position != position {
                list.move_to(position);
                writes.push((list.clone(), ChangeEvent::list_moved(list)));
            }
        }
        let changed = writes.len();
        self.commit_lists(board_id, writes).await?;

        tracing::info!(
            board = %board_id,
            lists = lists.len(),
            changed,
            "committed list order"
        );

        Ok(lists)
    }

    pub async fn create_board(&self, project_id: ProjectId, name: &str) -> Result<Board> {
        let board = Board::new(project_id, require_text("board name", name)?);
        self.storage.save_board(&board).await?;
        tracing::info!(board = %board.id, "created board");
        Ok(board)
    }

    /// Appends a new list after the board's last list
    pub async fn create_list(&self, board_id: BoardId, name: &str) -> Result<List> {
        let name = require_text("list name", name)?;
        self.storage.load_board(&board_id).await?;
        let _guards = self.locks.lock([ParentRef::Board(board_id)]).await;

        let mut siblings = self.storage.lists_for_board(&board_id).await?;
        sort_siblings(&mut siblings);
        let placement = self.allocator.place(&mut siblings, usize::MAX);

        let mut writes = self.collect_renumbered(&siblings, &placement, ChangeEvent::list_moved);
        let list = List::new(board_id, name, placement.position);
        writes.push((list.clone(), ChangeEvent::ListCreated { list: list.clone() }));
        self.commit_lists(board_id, writes).await?;

        tracing::info!(list = %list.id, board = %board_id, position = list.position, "created list");
        Ok(list)
    }

    /// Appends a new card after the list's last card
    pub async fn create_card(
        &self,
        list_id: ListId,
        title: &str,
        description: Option<String>,
    ) -> Result<Card> {
        let title = require_text("card title", title)?;
        let _guards = self.locks.lock([ParentRef::List(list_id)]).await;
        let list = self.storage.load_list(&list_id).await?;

        let mut siblings = self.storage.cards_for_list(&list_id).await?;
        sort_siblings(&mut siblings);
        let placement = self.allocator.place(&mut siblings, usize::MAX);

        let mut writes = self.collect_renumbered(&siblings, &placement, ChangeEvent::card_moved);
        let mut card = Card::new(list_id, title, placement.position);
        card.description = description;
        writes.push((card.clone(), ChangeEvent::CardCreated { card: card.clone() }));
        self.commit_cards(list.board_id, writes).await?;

        tracing::info!(card = %card.id, list = %list_id, position = card.position, "created card");
        Ok(card)
    }

    /// Deletes a card. Its former siblings keep their positions.
    pub async fn delete_card(&self, card_id: CardId) -> Result<()> {
        for attempt in 1..=self.max_lock_attempts {
            let list_id = self.storage.load_card(&card_id).await?.list_id;
            let _guards = self.locks.lock([ParentRef::List(list_id)]).await;

            let card = self.storage.load_card(&card_id).await?;
            if card.list_id != list_id {
                tracing::debug!(card = %card_id, attempt, "card changed lists before delete");
                continue;
            }
            let list = self.storage.load_list(&list_id).await?;

            self.storage.delete_card(&card_id).await?;
            self.broadcaster
                .publish(list.board_id, ChangeEvent::CardDeleted { card_id, list_id })
                .await;

            tracing::info!(card = %card_id, list = %list_id, "deleted card");
            return Ok(());
        }

        Err(SyncError::Conflict(format!(
            "card {} was moved concurrently",
            card_id
        )))
    }

    /// Deletes a list together with its cards. Sibling lists keep their
    /// positions.
    pub async fn delete_list(&self, list_id: ListId) -> Result<()> {
        let board_id = self.storage.load_list(&list_id).await?.board_id;
        let _guards = self
            .locks
            .lock([ParentRef::Board(board_id), ParentRef::List(list_id)])
            .await;

        // Gone already if another delete won the lock
        self.storage.load_list(&list_id).await?;

        let cards = self.storage.cards_for_list(&list_id).await?;
        let mut removed = Vec::with_capacity(cards.len());
        let mut outcome = Ok(());
        for card in &cards {
            if let Err(err) = self.storage.delete_card(&card.id).await {
                outcome = Err(err);
                break;
            }
            removed.push(card.id);
        }
        if outcome.is_ok() {
            outcome = self.storage.delete_list(&list_id).await;
        }

        if let Err(err) = outcome {
            // Cards already gone must still reach subscribers
            tracing::warn!(list = %list_id, removed = removed.len(), error = %err, "list delete stopped part way");
            let events = removed
                .into_iter()
                .map(|card_id| ChangeEvent::CardDeleted { card_id, list_id })
                .collect();
            self.publish_all(board_id, events).await;
            return Err(err);
        }

        self.broadcaster
            .publish(board_id, ChangeEvent::ListDeleted { list_id })
            .await;

        tracing::info!(list = %list_id, board = %board_id, cards = cards.len(), "deleted list");
        Ok(())
    }

    /// Finds the slot the client meant and decides the final position.
    ///
    /// Anchors describe the client's view of the slot: `after_id` is the
    /// sibling it saw just before the drop point, `before_id` the one just
    /// after, and an omitted anchor means the drop was at that end of the
    /// parent. The stored siblings must still look exactly like that,
    /// otherwise another move changed the parent since the client's view and
    /// the request is a Conflict. Without anchors the slot is wherever the
    /// requested position sorts. The requested position survives only if it
    /// fits the slot with epsilon clearance.
    fn resolve_slot<T: Positioned>(
        &self,
        siblings: &mut [T],
        requested: f64,
        after_id: Option<T::Id>,
        before_id: Option<T::Id>,
        kind: EntityKind,
    ) -> Result<Placement<T::Id>> {
        let anchor = |id: T::Id| {
            index_of(siblings, id).ok_or_else(|| {
                SyncError::Conflict(format!(
                    "{} {:?} used as an anchor is no longer in the target",
                    kind, id
                ))
            })
        };

        let after_index = after_id.map(anchor).transpose()?;
        let before_index = before_id.map(anchor).transpose()?;

        let index = match (after_index, before_index) {
            (None, None) => siblings.partition_point(|s| s.position() < requested),
            (Some(after), Some(before)) if before == after + 1 => before,
            (Some(after), None) if after + 1 == siblings.len() => siblings.len(),
            (None, Some(0)) => 0,
            _ => {
                tracing::debug!(?after_index, ?before_index, siblings = siblings.len(), "anchors no longer adjacent");
                return Err(SyncError::Conflict(format!(
                    "the {} order around the drop point changed since it was read",
                    kind
                )));
            }
        };

        let (prev, next) = neighbors_at(siblings, index);
        if self.allocator.fits_between(requested, prev, next) {
            return Ok(Placement {
                position: requested,
                renumbered: Vec::new(),
            });
        }

        tracing::debug!(
            requested,
            ?prev,
            ?next,
            index,
            "requested position does not fit stored neighbours, recomputing"
        );
        Ok(self.allocator.place(siblings, index))
    }

    fn collect_renumbered<T: Positioned + Clone>(
        &self,
        siblings: &[T],
        placement: &Placement<T::Id>,
        event: fn(&T) -> ChangeEvent,
    ) -> Vec<(T, ChangeEvent)> {
        siblings
            .iter()
            .filter(|s| placement.renumbered.contains(&s.id()))
            .map(|s| (s.clone(), event(s)))
            .collect()
    }

    /// Saves cards in order and broadcasts every write that reached storage,
    /// including the ones before a failed save.
    async fn commit_cards(&self, board_id: BoardId, writes: Vec<(Card, ChangeEvent)>) -> Result<()> {
        let mut saved = Vec::with_capacity(writes.len());
        let mut outcome = Ok(());
        for (card, event) in writes {
            if let Err(err) = self.storage.save_card(&card).await {
                tracing::warn!(card = %card.id, saved = saved.len(), error = %err, "card write failed part way through a commit");
                outcome = Err(err);
                break;
            }
            saved.push(event);
        }
        self.publish_all(board_id, saved).await;
        outcome
    }

    /// List counterpart of [`Reconciler::commit_cards`]
    async fn commit_lists(&self, board_id: BoardId, writes: Vec<(List, ChangeEvent)>) -> Result<()> {
        let mut saved = Vec::with_capacity(writes.len());
        let mut outcome = Ok(());
        for (list, event) in writes {
            if let Err(err) = self.storage.save_list(&list).await {
                tracing::warn!(list = %list.id, saved = saved.len(), error = %err, "list write failed part way through a commit");
                outcome = Err(err);
                break;
            }
            saved.push(event);
        }
        self.publish_all(board_id, saved).await;
        outcome
    }

    async fn publish_all(&self, board_id: BoardId, events: Vec<ChangeEvent>) {
        for event in events {
            self.broadcaster.publish(board_id, event).await;
        }
    }
}

fn check_version(
    kind: EntityKind,
    id: impl std::fmt::Display,
    current: u64,
    expected: Option<u64>,
) -> Result<()> {
    match expected {
        Some(expected) if expected != current => {
            tracing::warn!(%id, expected, current, "stale move rejected");
            Err(SyncError::Conflict(format!(
                "{} {} is at version {}, request was based on version {}",
                kind, id, current, expected
            )))
        }
        _ => Ok(()),
    }
}

/// Duplicates are malformed; an order naming a different set of lists than
/// the board holds was built from an outdated view.
fn validate_permutation(lists: &[List], list_ids: &[ListId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(list_ids.len());
    for id in list_ids {
        if !seen.insert(*id) {
            return Err(SyncError::Validation(format!("list {} appears twice", id)));
        }
    }

    let stale = seen.len() != lists.len() || lists.iter().any(|l| !seen.contains(&l.id));
    if stale {
        return Err(SyncError::Conflict(format!(
            "order names {} lists but the board holds {} others",
            seen.len(),
            lists.len()
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}
