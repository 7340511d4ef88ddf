//! Keyset (cursor) pagination.
//!
//! Pages are addressed by the `(created_at, id)` tuple of a cursor row, never
//! by offset, so a page that was already returned does not shift when rows
//! are inserted or deleted elsewhere in the table. `id` breaks ties between
//! rows created in the same instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::PaginationError;

/// Default page size when neither `first` nor `last` is given
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest accepted `first` / `last`
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sort key of every paginated table, most significant column first.
/// The trailing `id` is the tie-breaker and must never be dropped.
pub const KEYSET_COLUMNS: [&str; 2] = ["created_at", "id"];

/// An entity that can be paginated by keyset
pub trait Paginated {
    /// Opaque cursor identifying this row
    fn cursor(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;
}

/// Sort order of a listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Relay-style pagination arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaginationWindow {
    /// Return rows after this cursor
    pub after: Option<String>,
    /// Return rows before this cursor
    pub before: Option<String>,
    /// Page size when paginating forward (0-100, default 20)
    pub first: Option<i64>,
    /// Page size when paginating backward (0-100, default 20, requires `before`)
    pub last: Option<i64>,
}

impl PaginationWindow {
    #[must_use]
    pub fn first(first: i64) -> Self {
        Self {
            first: Some(first),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn after(cursor: impl Into<String>, first: i64) -> Self {
        Self {
            after: Some(cursor.into()),
            first: Some(first),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn before(cursor: impl Into<String>, last: i64) -> Self {
        Self {
            before: Some(cursor.into()),
            last: Some(last),
            ..Default::default()
        }
    }
}

/// Traversal direction relative to the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// How a keyset row compares to the cursor row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    Less,
}

impl Comparison {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::Less => "<",
        }
    }
}

/// A validated pagination window, ready to be executed against a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub cursor: Option<String>,
    pub direction: Direction,
    pub limit: i64,
    pub order: SortOrder,
}

impl PagePlan {
    /// Validate a window and resolve it into a plan.
    ///
    /// When both `after` and `before` are present, `after` wins and the page
    /// is read forward.
    pub fn from_window(window: &PaginationWindow, order: SortOrder) -> Result<Self, PaginationError> {
        if window.before.is_none() && window.last.is_some() {
            return Err(PaginationError::BackwardPaginationRequiresCursor);
        }
        let first = page_size("first", window.first)?;
        let last = page_size("last", window.last)?;

        match (&window.after, &window.before) {
            (None, Some(before)) => Ok(Self {
                cursor: Some(before.clone()),
                direction: Direction::Backward,
                limit: last,
                order,
            }),
            (after, _) => Ok(Self {
                cursor: after.clone(),
                direction: Direction::Forward,
                limit: first,
                order,
            }),
        }
    }

    /// Comparison of candidate rows against the cursor row
    pub fn comparison(&self) -> Comparison {
        match (self.direction, self.order) {
            (Direction::Forward, SortOrder::Asc) | (Direction::Backward, SortOrder::Desc) => {
                Comparison::Greater
            }
            (Direction::Forward, SortOrder::Desc) | (Direction::Backward, SortOrder::Asc) => {
                Comparison::Less
            }
        }
    }

    /// Order in which the store scans rows; backward pages scan in reverse
    pub fn scan_order(&self) -> SortOrder {
        match self.direction {
            Direction::Forward => self.order,
            Direction::Backward => self.order.reverse(),
        }
    }

    /// Whether scanned rows must be reversed to restore the natural order
    pub fn reverses(&self) -> bool {
        self.direction == Direction::Backward
    }
}

fn page_size(field: &'static str, value: Option<i64>) -> Result<i64, PaginationError> {
    match value {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(v) if (0..=MAX_PAGE_SIZE).contains(&v) => Ok(v),
        Some(v) => Err(PaginationError::InvalidPageSize { field, value: v }),
    }
}

/// Execute a plan over an in-memory collection.
///
/// An unknown cursor matches nothing, the same way the SQL sub-select
/// yields no row to compare against.
pub fn apply_keyset<T: Paginated + Clone>(items: &[T], plan: &PagePlan) -> Vec<T> {
    apply_keyset_where(items, plan, |_| true)
}

/// Like [`apply_keyset`] with an equality-style filter on the page rows.
///
/// The cursor is still resolved against every item, so a cursor row that
/// the filter excludes keeps its position as the anchor.
pub fn apply_keyset_where<T, F>(items: &[T], plan: &PagePlan, filter: F) -> Vec<T>
where
    T: Paginated + Clone,
    F: Fn(&T) -> bool,
{
    let anchor = match &plan.cursor {
        Some(cursor) => match items.iter().find(|item| item.cursor() == cursor) {
            Some(row) => Some((row.created_at(), row.cursor().to_string())),
            None => return Vec::new(),
        },
        None => None,
    };

    let mut rows: Vec<&T> = items
        .iter()
        .filter(|item| filter(item))
        .filter(|item| match &anchor {
            None => true,
            Some((created_at, id)) => {
                let key = (item.created_at(), item.cursor());
                let anchor = (*created_at, id.as_str());
                match plan.comparison() {
                    Comparison::Greater => key > anchor,
                    Comparison::Less => key < anchor,
                }
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        let ordering = (a.created_at(), a.cursor()).cmp(&(b.created_at(), b.cursor()));
        match plan.scan_order() {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    let mut page: Vec<T> = rows
        .into_iter()
        .take(usize::try_from(plan.limit).unwrap_or(0))
        .cloned()
        .collect();
    if plan.reverses() {
        page.reverse();
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        created_at: DateTime<Utc>,
    }

    impl Paginated for Row {
        fn cursor(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    /// Rows r00..r{n-1}, created one second apart
    fn rows(n: usize) -> Vec<Row> {
        let base = Utc::now();
        (0..n)
            .map(|i| Row {
                id: format!("r{i:02}"),
                created_at: base + Duration::seconds(i as i64),
            })
            .collect()
    }

    fn ids(page: &[Row]) -> Vec<&str> {
        page.iter().map(|r| r.id.as_str()).collect()
    }

    fn plan(window: PaginationWindow, order: SortOrder) -> PagePlan {
        PagePlan::from_window(&window, order).unwrap()
    }

    #[test]
    fn test_last_without_before_is_rejected() {
        let window = PaginationWindow {
            last: Some(10),
            ..Default::default()
        };
        assert_eq!(
            PagePlan::from_window(&window, SortOrder::Desc),
            Err(PaginationError::BackwardPaginationRequiresCursor)
        );
    }

    #[test]
    fn test_page_size_bounds() {
        for (first, ok) in [(-1, false), (0, true), (100, true), (101, false)] {
            let result = PagePlan::from_window(&PaginationWindow::first(first), SortOrder::Asc);
            assert_eq!(result.is_ok(), ok, "first = {first}");
        }

        let window = PaginationWindow::before("x", 101);
        assert_eq!(
            PagePlan::from_window(&window, SortOrder::Asc),
            Err(PaginationError::InvalidPageSize {
                field: "last",
                value: 101
            })
        );
    }

    #[test]
    fn test_defaults() {
        let plan = plan(PaginationWindow::default(), SortOrder::Desc);
        assert_eq!(plan.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.direction, Direction::Forward);
        assert!(plan.cursor.is_none());
    }

    #[test]
    fn test_after_wins_over_before() {
        let window = PaginationWindow {
            after: Some("a".to_string()),
            before: Some("b".to_string()),
            first: Some(3),
            last: Some(7),
        };
        let plan = plan(window, SortOrder::Asc);
        assert_eq!(plan.direction, Direction::Forward);
        assert_eq!(plan.cursor.as_deref(), Some("a"));
        assert_eq!(plan.limit, 3);
    }

    #[test]
    fn test_comparison_matrix() {
        let forward_asc = plan(PaginationWindow::after("c", 1), SortOrder::Asc);
        assert_eq!(forward_asc.comparison(), Comparison::Greater);
        assert_eq!(forward_asc.scan_order(), SortOrder::Asc);

        let forward_desc = plan(PaginationWindow::after("c", 1), SortOrder::Desc);
        assert_eq!(forward_desc.comparison(), Comparison::Less);

        let backward_asc = plan(PaginationWindow::before("c", 1), SortOrder::Asc);
        assert_eq!(backward_asc.comparison(), Comparison::Less);
        assert_eq!(backward_asc.scan_order(), SortOrder::Desc);
        assert!(backward_asc.reverses());

        let backward_desc = plan(PaginationWindow::before("c", 1), SortOrder::Desc);
        assert_eq!(backward_desc.comparison(), Comparison::Greater);
    }

    #[test]
    fn test_first_k_desc_returns_most_recent_first() {
        let items = rows(10);
        let page = apply_keyset(&items, &plan(PaginationWindow::first(3), SortOrder::Desc));
        assert_eq!(ids(&page), vec!["r09", "r08", "r07"]);
    }

    #[test]
    fn test_after_cursor_returns_rows_strictly_after() {
        let items = rows(10);
        let page = apply_keyset(&items, &plan(PaginationWindow::after("r04", 3), SortOrder::Asc));
        assert_eq!(ids(&page), vec!["r05", "r06", "r07"]);

        let page = apply_keyset(&items, &plan(PaginationWindow::after("r04", 3), SortOrder::Desc));
        assert_eq!(ids(&page), vec!["r03", "r02", "r01"]);
    }

    #[test]
    fn test_backward_page_matches_forward_page() {
        let items = rows(12);
        for order in [SortOrder::Asc, SortOrder::Desc] {
            // Walk forward from the start to collect the natural order
            let all = apply_keyset(&items, &plan(PaginationWindow::first(100), order));
            for end in 4..all.len() - 1 {
                let k = 4;
                let forward: Vec<Row> = all[end + 1 - k..=end].to_vec();
                let one_past = all[end + 1].id.clone();
                let backward =
                    apply_keyset(&items, &plan(PaginationWindow::before(one_past, k as i64), order));
                assert_eq!(backward, forward, "order {order:?}, end {end}");
            }
        }
    }

    #[test]
    fn test_ties_on_created_at_are_broken_by_id() {
        let at = Utc::now();
        let items: Vec<Row> = ["b", "a", "d", "c"]
            .iter()
            .map(|id| Row {
                id: id.to_string(),
                created_at: at,
            })
            .collect();

        let page = apply_keyset(&items, &plan(PaginationWindow::first(10), SortOrder::Asc));
        assert_eq!(ids(&page), vec!["a", "b", "c", "d"]);

        let page = apply_keyset(&items, &plan(PaginationWindow::after("b", 10), SortOrder::Asc));
        assert_eq!(ids(&page), vec!["c", "d"]);

        let page = apply_keyset(&items, &plan(PaginationWindow::before("c", 10), SortOrder::Asc));
        assert_eq!(ids(&page), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_cursor_yields_empty_page() {
        let items = rows(5);
        let page = apply_keyset(&items, &plan(PaginationWindow::after("nope", 5), SortOrder::Asc));
        assert!(page.is_empty());
    }

    #[test]
    fn test_filtered_page_anchors_on_excluded_cursor() {
        let items = rows(6);
        let even = |r: &Row| r.id.ends_with(['0', '2', '4']);

        let page = apply_keyset_where(
            &items,
            &plan(PaginationWindow::after("r01", 10), SortOrder::Asc),
            even,
        );
        assert_eq!(ids(&page), vec!["r02", "r04"]);

        let page = apply_keyset_where(
            &items,
            &plan(PaginationWindow::before("r03", 10), SortOrder::Asc),
            even,
        );
        assert_eq!(ids(&page), vec!["r00", "r02"]);
    }

    #[test]
    fn test_zero_page_size_yields_empty_page() {
        let items = rows(5);
        let page = apply_keyset(&items, &plan(PaginationWindow::first(0), SortOrder::Asc));
        assert!(page.is_empty());
    }

    #[test]
    fn test_sort_order_deserializes_lowercase() {
        let order: SortOrder = serde_json::from_str("\"asc\"").unwrap();
        assert_eq!(order, SortOrder::Asc);
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }
}
