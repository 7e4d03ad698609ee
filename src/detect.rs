//! New-item detection against a stored cursor.
//!
//! A page arrives most-recent-first. Items newer than the cursor form a
//! prefix of it; that prefix, reversed to oldest-first, is what gets
//! announced. The cursor then moves to the top of the page.

use std::cmp::Ordering;

/// Something with an identifier ordered by recency.
pub trait FeedItem {
    type Id: Ord + Clone;

    fn id(&self) -> Self::Id;
}

/// Outcome of comparing one page with a cursor.
#[derive(Debug, PartialEq, Eq)]
pub struct Detection<'a, T, K> {
    /// New items, oldest first.
    pub new_items: Vec<&'a T>,
    /// Cursor to persist. `None` only if the page was empty and no cursor
    /// was stored.
    pub cursor: Option<K>,
    /// The cursor was unset; it now points at the top of the page and
    /// nothing was announced.
    pub seeded: bool,
    /// Every item on the page was new, so older unseen items may exist on
    /// pages that were not fetched.
    pub possible_gap: bool,
}

impl<'a, T, K> Detection<'a, T, K> {
    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty()
    }
}

/// Detect new items using the natural order of item ids.
pub fn detect_new<'a, T: FeedItem>(
    page: &'a [T],
    cursor: Option<&T::Id>,
) -> Detection<'a, T, T::Id> {
    detect_new_by(page, cursor, T::id, <T::Id as Ord>::cmp)
}

/// Detect new items with an explicit key and total order.
///
/// `compare(a, b)` must return `Greater` when `a` is more recent than `b`.
pub fn detect_new_by<'a, T, K, F, C>(
    page: &'a [T],
    cursor: Option<&K>,
    key: F,
    compare: C,
) -> Detection<'a, T, K>
where
    K: Clone,
    F: Fn(&T) -> K,
    C: Fn(&K, &K) -> Ordering,
{
    let Some(top) = page.first() else {
        return Detection {
            new_items: Vec::new(),
            cursor: cursor.cloned(),
            seeded: false,
            possible_gap: false,
        };
    };
    let top_key = key(top);

    let Some(cursor) = cursor else {
        return Detection {
            new_items: Vec::new(),
            cursor: Some(top_key),
            seeded: true,
            possible_gap: false,
        };
    };

    let mut new_items: Vec<&T> = page
        .iter()
        .take_while(|item| compare(&key(*item), cursor) == Ordering::Greater)
        .collect();
    let possible_gap = new_items.len() == page.len();
    new_items.reverse();

    Detection {
        new_items,
        cursor: Some(top_key),
        seeded: false,
        possible_gap,
    }
}
