//! Study-plan item status classification and list ordering
//!
//! Pure functions over an item's time fields and an explicit `now`. The
//! write path never calls these; readers and the consistency monitor do.
//!
//! Classification precedence (first match wins):
//! 1. `completed_at` set -> Completed
//! 2. `start_date` unset or in the future -> Upcoming
//! 3. `start_date <= now <= end_date` (unset end is open-ended) -> Active
//! 4. `end_date < now` -> Overdue
//!
//! Archived is a stored status set by status-update operations; it is never
//! derived here. Soft-deleted items and items outside their availability
//! window are excluded from listings via [`is_visible`], not by returning a
//! fifth state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Derived lifecycle status of a study-plan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Upcoming,
    Active,
    Overdue,
    Completed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Upcoming => "upcoming",
            ItemStatus::Active => "active",
            ItemStatus::Overdue => "overdue",
            ItemStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(ItemStatus::Upcoming),
            "active" => Some(ItemStatus::Active),
            "overdue" => Some(ItemStatus::Overdue),
            "completed" => Some(ItemStatus::Completed),
            _ => None,
        }
    }

    /// Whether this bucket lists most-recently-started work first
    /// (Completed/Overdue flip the start_date direction).
    pub fn sorts_descending(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Overdue)
    }
}

/// The time fields that drive classification, lifted off a study-plan item
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemWindow {
    pub available_from: Option<DateTime<Utc>>,
    pub available_to: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Classify an item. Total over the four derived states.
pub fn classify(now: DateTime<Utc>, w: &ItemWindow) -> ItemStatus {
    if w.completed_at.is_some() {
        return ItemStatus::Completed;
    }
    match w.start_date {
        None => ItemStatus::Upcoming,
        Some(start) if start > now => ItemStatus::Upcoming,
        Some(_) => match w.end_date {
            None => ItemStatus::Active,
            Some(end) if now <= end => ItemStatus::Active,
            Some(_) => ItemStatus::Overdue,
        },
    }
}

/// Whether an item appears in listings at `now`.
///
/// An item with no `available_from` has not been released and is never
/// visible. Soft-deleted items are excluded regardless of time fields.
pub fn is_visible(now: DateTime<Utc>, w: &ItemWindow) -> bool {
    if w.deleted_at.is_some() {
        return false;
    }
    match w.available_from {
        None => false,
        Some(from) if from > now => false,
        Some(_) => match w.available_to {
            None => true,
            Some(to) => now <= to,
        },
    }
}

/// Sort key fields for the list-ordering contracts
#[derive(Debug, Clone)]
pub struct ItemSortKey {
    pub start_date: Option<DateTime<Utc>>,
    pub display_order: i64,
    pub item_id: String,
}

// Items without a start date sort as if starting in the far future.
fn start_or_max(k: &ItemSortKey) -> DateTime<Utc> {
    k.start_date.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Ordering for Active/Upcoming listings:
/// `(start_date ASC, display_order ASC, item_id ASC)`
pub fn cmp_current(a: &ItemSortKey, b: &ItemSortKey) -> Ordering {
    start_or_max(a)
        .cmp(&start_or_max(b))
        .then_with(|| a.display_order.cmp(&b.display_order))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Ordering for Completed/Overdue listings:
/// `(start_date DESC, display_order ASC, item_id DESC)`
///
/// The direction flip places most-recently-started work first once it is
/// in the past. Downstream pagination depends on this exact total order.
pub fn cmp_past(a: &ItemSortKey, b: &ItemSortKey) -> Ordering {
    start_or_max(b)
        .cmp(&start_or_max(a))
        .then_with(|| a.display_order.cmp(&b.display_order))
        .then_with(|| b.item_id.cmp(&a.item_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, 0, 0).unwrap()
    }

    fn window(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        completed: Option<DateTime<Utc>>,
    ) -> ItemWindow {
        ItemWindow {
            available_from: Some(at(0)),
            available_to: None,
            start_date: start,
            end_date: end,
            completed_at: completed,
            deleted_at: None,
        }
    }

    #[test]
    fn completed_wins_over_everything() {
        // Even an item squarely inside its active window is Completed
        let w = window(Some(at(8)), Some(at(18)), Some(at(9)));
        assert_eq!(classify(at(12), &w), ItemStatus::Completed);
        // ... and even one long overdue
        let w = window(Some(at(1)), Some(at(2)), Some(at(3)));
        assert_eq!(classify(at(20), &w), ItemStatus::Completed);
    }

    #[test]
    fn unset_or_future_start_is_upcoming() {
        assert_eq!(classify(at(12), &window(None, None, None)), ItemStatus::Upcoming);
        assert_eq!(
            classify(at(12), &window(Some(at(15)), None, None)),
            ItemStatus::Upcoming
        );
    }

    #[test]
    fn active_window_boundaries_inclusive() {
        let w = window(Some(at(10)), Some(at(14)), None);
        assert_eq!(classify(at(10), &w), ItemStatus::Active);
        assert_eq!(classify(at(12), &w), ItemStatus::Active);
        assert_eq!(classify(at(14), &w), ItemStatus::Active);
        assert_eq!(classify(at(14) + Duration::seconds(1), &w), ItemStatus::Overdue);
    }

    #[test]
    fn open_ended_item_stays_active() {
        let w = window(Some(at(10)), None, None);
        assert_eq!(classify(at(23), &w), ItemStatus::Active);
    }

    #[test]
    fn classification_is_total() {
        let starts = [None, Some(at(5)), Some(at(15))];
        let ends = [None, Some(at(6)), Some(at(20))];
        let completes = [None, Some(at(7))];
        for s in starts {
            for e in ends {
                for c in completes {
                    // Every combination lands in exactly one of the four states
                    let _ = classify(at(12), &window(s, e, c));
                }
            }
        }
    }

    #[test]
    fn visibility_excludes_deleted_and_unreleased() {
        let mut w = window(Some(at(10)), None, None);
        assert!(is_visible(at(12), &w));

        w.deleted_at = Some(at(11));
        assert!(!is_visible(at(12), &w));

        let unreleased = ItemWindow {
            available_from: None,
            ..window(Some(at(10)), None, None)
        };
        assert!(!is_visible(at(12), &unreleased));

        let not_yet = ItemWindow {
            available_from: Some(at(13)),
            ..window(Some(at(10)), None, None)
        };
        assert!(!is_visible(at(12), &not_yet));

        let expired = ItemWindow {
            available_from: Some(at(1)),
            available_to: Some(at(11)),
            ..window(Some(at(10)), None, None)
        };
        assert!(!is_visible(at(12), &expired));
        assert!(is_visible(at(11), &expired));
    }

    fn key(start: Option<DateTime<Utc>>, order: i64, id: &str) -> ItemSortKey {
        ItemSortKey {
            start_date: start,
            display_order: order,
            item_id: id.to_string(),
        }
    }

    #[test]
    fn current_listing_sorts_start_asc_then_order_then_id() {
        let mut items = vec![
            key(Some(at(9)), 2, "c"),
            key(Some(at(8)), 5, "b"),
            key(Some(at(9)), 2, "a"),
            key(Some(at(9)), 1, "d"),
            key(None, 0, "e"),
        ];
        items.sort_by(cmp_current);
        let ids: Vec<&str> = items.iter().map(|k| k.item_id.as_str()).collect();
        assert_eq!(ids, ["b", "d", "a", "c", "e"]);
    }

    #[test]
    fn past_listing_flips_start_and_id_but_not_display_order() {
        let mut items = vec![
            key(Some(at(8)), 5, "b"),
            key(Some(at(9)), 2, "a"),
            key(Some(at(9)), 1, "d"),
            key(Some(at(9)), 2, "c"),
        ];
        items.sort_by(cmp_past);
        let ids: Vec<&str> = items.iter().map(|k| k.item_id.as_str()).collect();
        // Most recently started first; within equal starts display_order still
        // ascends, and equal (start, order) pairs tie-break by id descending.
        assert_eq!(ids, ["d", "c", "a", "b"]);
    }
}
