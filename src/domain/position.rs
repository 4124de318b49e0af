//! Fractional ordering keys for lists and cards.
//!
//! Siblings are ordered by an `f64` position. New positions are taken between
//! the neighbours of the insertion slot, so a move only ever rewrites the
//! moved entity. Repeated bisection of the same gap eventually runs out of
//! floating-point precision; when the gap falls below the allocator's epsilon
//! the sibling set is renumbered to `1..=N` before allocating again.

use crate::config::SyncConfig;
use std::fmt::Debug;

/// Position handed out for the first entity of an empty parent
pub const DEFAULT_BASE_POSITION: f64 = 1.0;

/// Smallest neighbour gap that may still be bisected
pub const DEFAULT_RENUMBER_EPSILON: f64 = 1e-9;

/// Anything ordered by a position among its siblings
pub trait Positioned {
    type Id: Copy + Eq + Ord + Debug;

    fn id(&self) -> Self::Id;
    fn position(&self) -> f64;
    fn set_position(&mut self, position: f64);
}

/// Computes a position between `prev` and `next` with the default base.
///
/// # Examples
/// ```
/// use hlavi_board_sync::domain::position::allocate;
///
/// assert_eq!(allocate(None, None), 1.0);
/// assert_eq!(allocate(Some(1.0), Some(2.0)), 1.5);
/// assert_eq!(allocate(None, Some(1.0)), 0.5);
/// assert_eq!(allocate(Some(3.0), None), 4.0);
/// ```
pub fn allocate(prev: Option<f64>, next: Option<f64>) -> f64 {
    PositionAllocator::default().allocate(prev, next)
}

/// Result of placing an entity into a sibling set
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<Id> {
    pub position: f64,
    /// Siblings whose position changed because the set had to be renumbered
    pub renumbered: Vec<Id>,
}

impl<Id> Placement<Id> {
    pub fn required_renumber(&self) -> bool {
        !self.renumbered.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    base: f64,
    epsilon: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_POSITION, DEFAULT_RENUMBER_EPSILON)
    }
}

impl PositionAllocator {
    pub fn new(base: f64, epsilon: f64) -> Self {
        Self { base, epsilon }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_position, config.renumber_epsilon)
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Raw allocation; never checks for precision exhaustion
    pub fn allocate(&self, prev: Option<f64>, next: Option<f64>) -> f64 {
        match (prev, next) {
            (None, None) => self.base,
            (None, Some(next)) => next / 2.0,
            (Some(prev), None) => prev + 1.0,
            (Some(prev), Some(next)) => (prev + next) / 2.0,
        }
    }

    /// Whether the gap between two neighbours can still be bisected.
    /// A missing `prev` counts as zero.
    pub fn has_room(&self, prev: Option<f64>, next: Option<f64>) -> bool {
        match next {
            Some(next) => next - prev.unwrap_or(0.0) >= self.epsilon,
            None => true,
        }
    }

    /// Allocates a position strictly between the neighbours, or `None` when
    /// the sibling set must be renumbered first.
    pub fn try_allocate(&self, prev: Option<f64>, next: Option<f64>) -> Option<f64> {
        if !self.has_room(prev, next) {
            return None;
        }

        let position = self.allocate(prev, next);
        let above_prev = match prev {
            Some(prev) => position > prev,
            None => position > 0.0,
        };
        let below_next = next.map_or(true, |next| position < next);

        (position.is_finite() && above_prev && below_next).then_some(position)
    }

    /// Whether `position` sits strictly inside `(prev, next)` with at least
    /// epsilon clearance on each side.
    pub fn fits_between(&self, position: f64, prev: Option<f64>, next: Option<f64>) -> bool {
        let lower = prev.unwrap_or(0.0);
        let clear_of_prev = position - lower >= self.epsilon;
        let clear_of_next = next.map_or(true, |next| next - position >= self.epsilon);
        position.is_finite() && clear_of_prev && clear_of_next
    }

    /// Allocates a position for slot `index` of an ordered sibling set that
    /// excludes the entity being placed. Renumbers the set in place when the
    /// slot's gap is exhausted.
    pub fn place<T: Positioned>(&self, siblings: &mut [T], index: usize) -> Placement<T::Id> {
        let index = index.min(siblings.len());
        let (prev, next) = neighbors_at(siblings, index);

        if let Some(position) = self.try_allocate(prev, next) {
            return Placement {
                position,
                renumbered: Vec::new(),
            };
        }

        tracing::debug!(
            index,
            siblings = siblings.len(),
            "position gap exhausted, renumbering siblings"
        );
        let renumbered = renumber(siblings);
        let (prev, next) = neighbors_at(siblings, index);

        Placement {
            position: self.allocate(prev, next),
            renumbered,
        }
    }
}

/// Sorts siblings by position ascending, falling back to id for equal keys
pub fn sort_siblings<T: Positioned>(siblings: &mut [T]) {
    siblings.sort_by(|a, b| {
        a.position()
            .total_cmp(&b.position())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

/// Positions on either side of slot `index`
pub fn neighbors_at<T: Positioned>(siblings: &[T], index: usize) -> (Option<f64>, Option<f64>) {
    let prev = index
        .checked_sub(1)
        .and_then(|i| siblings.get(i))
        .map(Positioned::position);
    let next = siblings.get(index).map(Positioned::position);
    (prev, next)
}

/// Assigns `1..=N` in current order; returns the ids whose position changed
pub fn renumber<T: Positioned>(siblings: &mut [T]) -> Vec<T::Id> {
    let mut changed = Vec::new();
    for (index, sibling) in siblings.iter_mut().enumerate() {
        let position = (index + 1) as f64;
        if sibling.position() != position {
            sibling.set_position(position);
            changed.push(sibling.id());
        }
    }
    changed
}

pub fn index_of<T: Positioned>(siblings: &[T], id: T::Id) -> Option<usize> {
    siblings.iter().position(|s| s.id() == id)
}

/// True when positions are strictly increasing (no duplicates)
pub fn is_strictly_ordered<T: Positioned>(siblings: &[T]) -> bool {
    siblings
        .windows(2)
        .all(|pair| pair[0].position() < pair[1].position())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Slot {
        id: u32,
        position: f64,
    }

    impl Positioned for Slot {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }

        fn position(&self) -> f64 {
            self.position
        }

        fn set_position(&mut self, position: f64) {
            self.position = position;
        }
    }

    fn slots(positions: &[f64]) -> Vec<Slot> {
        positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Slot {
                id: i as u32,
                position,
            })
            .collect()
    }

    #[test]
    fn test_allocate_cases() {
        let allocator = PositionAllocator::default();
        assert_eq!(allocator.allocate(None, None), 1.0);
        assert_eq!(allocator.allocate(None, Some(3.0)), 1.5);
        assert_eq!(allocator.allocate(Some(3.0), None), 4.0);
        assert_eq!(allocator.allocate(Some(1.0), Some(2.0)), 1.5);
    }

    #[test]
    fn test_custom_base() {
        let allocator = PositionAllocator::new(1024.0, 1e-9);
        assert_eq!(allocator.allocate(None, None), 1024.0);
    }

    #[test]
    fn test_insert_between_existing_positions() {
        let allocator = PositionAllocator::default();
        let mut list = slots(&[1.0, 2.0, 3.0]);

        let first = allocator.place(&mut list, 1);
        assert_eq!(first.position, 1.5);
        assert!(!first.required_renumber());
        list.insert(1, Slot { id: 10, position: first.position });

        let second = allocator.place(&mut list, 1);
        assert_eq!(second.position, 1.25);
    }

    #[test]
    fn test_place_into_empty_and_at_edges() {
        let allocator = PositionAllocator::default();

        let mut empty: Vec<Slot> = Vec::new();
        assert_eq!(allocator.place(&mut empty, 0).position, 1.0);

        let mut list = slots(&[1.0, 2.0]);
        assert_eq!(allocator.place(&mut list, 0).position, 0.5);
        assert_eq!(allocator.place(&mut list, 2).position, 3.0);
        // Out of range indexes clamp to the tail
        assert_eq!(allocator.place(&mut list, 99).position, 3.0);
    }

    #[test]
    fn test_repeated_bisection_stays_ordered_until_exhausted() {
        let allocator = PositionAllocator::default();
        let mut list = slots(&[1.0, 2.0]);
        let mut inserted = 0;

        // Always insert directly after the first sibling
        loop {
            let (prev, next) = neighbors_at(&list, 1);
            match allocator.try_allocate(prev, next) {
                Some(position) => {
                    list.insert(
                        1,
                        Slot {
                            id: 100 + inserted,
                            position,
                        },
                    );
                    inserted += 1;
                    assert!(is_strictly_ordered(&list));
                }
                None => break,
            }
            assert!(inserted < 200, "epsilon never triggered");
        }

        assert!(inserted > 20);
        let gap = list[1].position - list[0].position;
        assert!(gap < 2e-9);

        let placement = allocator.place(&mut list, 1);
        assert!(placement.required_renumber());
        assert_eq!(placement.position, 1.5);

        let expected: Vec<f64> = (1..=list.len()).map(|n| n as f64).collect();
        let actual: Vec<f64> = list.iter().map(|s| s.position).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_head_insert_exhaustion() {
        let allocator = PositionAllocator::default();
        assert!(allocator.try_allocate(None, Some(1e-10)).is_none());
        assert_eq!(allocator.try_allocate(None, Some(1e-3)), Some(5e-4));
    }

    #[test]
    fn test_precision_loss_is_reported() {
        let allocator = PositionAllocator::default();
        let prev = 1e17;
        let next = prev + 16.0;
        // The gap is far above epsilon but the midpoint rounds onto prev
        assert!(allocator.has_room(Some(prev), Some(next)));
        assert!(allocator.try_allocate(Some(prev), Some(next)).is_none());
        // prev + 1 rounds back to prev at this magnitude
        assert!(allocator.try_allocate(Some(prev), None).is_none());
        assert_eq!(allocator.try_allocate(Some(1.0), Some(2.0)), Some(1.5));
    }

    #[test]
    fn test_fits_between() {
        let allocator = PositionAllocator::default();
        assert!(allocator.fits_between(1.5, Some(1.0), Some(2.0)));
        assert!(!allocator.fits_between(1.0, Some(1.0), Some(2.0)));
        assert!(!allocator.fits_between(2.5, Some(1.0), Some(2.0)));
        assert!(allocator.fits_between(7.0, Some(1.0), None));
        assert!(allocator.fits_between(0.5, None, Some(1.0)));
        assert!(!allocator.fits_between(f64::NAN, None, None));
    }

    #[test]
    fn test_renumber_reports_changes_only() {
        let mut list = slots(&[1.0, 2.5, 3.0]);
        let changed = renumber(&mut list);
        assert_eq!(changed, vec![1]);
        assert_eq!(list[1].position, 2.0);
    }

    #[test]
    fn test_sort_siblings() {
        let mut list = slots(&[3.0, 1.0, 2.0]);
        sort_siblings(&mut list);
        let ids: Vec<u32> = list.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert_eq!(index_of(&list, 0), Some(2));
    }
}
