//! Page fetching and Relay page info resolution.
//!
//! Page existence is probed with one-row fetches past each edge of the
//! current page instead of counting rows.

use std::future::Future;

use tracing::warn;
use utoipa::ToSchema;

use crate::domain::{
    AppError, Connection, PageInfo, PagePlan, Paginated, PaginationWindow, SortOrder,
};

/// Validate `window` and fetch the page it designates.
pub async fn get_page<T, F, Fut>(
    fetch: &F,
    window: &PaginationWindow,
    order: SortOrder,
) -> Result<Vec<T>, AppError>
where
    F: Fn(PagePlan) -> Fut,
    Fut: Future<Output = Result<Vec<T>, AppError>>,
{
    let plan = PagePlan::from_window(window, order)?;
    fetch(plan).await
}

/// Compute cursors and neighbour flags for `page`.
pub async fn resolve_page_info<T, F, Fut>(fetch: &F, page: &[T], order: SortOrder) -> PageInfo
where
    T: Paginated,
    F: Fn(PagePlan) -> Fut,
    Fut: Future<Output = Result<Vec<T>, AppError>>,
{
    let (Some(first), Some(last)) = (page.first(), page.last()) else {
        return PageInfo::default();
    };
    let start_cursor = first.cursor().to_string();
    let end_cursor = last.cursor().to_string();

    let has_next_page = probe(
        fetch,
        PaginationWindow::after(end_cursor.clone(), 1),
        order,
    )
    .await;
    let has_previous_page = probe(
        fetch,
        PaginationWindow::before(start_cursor.clone(), 1),
        order,
    )
    .await;

    PageInfo {
        start_cursor: Some(start_cursor),
        end_cursor: Some(end_cursor),
        has_next_page,
        has_previous_page,
    }
}

async fn probe<T, F, Fut>(fetch: &F, window: PaginationWindow, order: SortOrder) -> bool
where
    F: Fn(PagePlan) -> Fut,
    Fut: Future<Output = Result<Vec<T>, AppError>>,
{
    match get_page(fetch, &window, order).await {
        Ok(rows) => rows.len() == 1,
        Err(e) => {
            warn!(error = %e, "Page info probe failed");
            false
        }
    }
}

/// Fetch a page and wrap it in a connection with its page info.
pub async fn paginate<T, F, Fut>(
    fetch: F,
    window: &PaginationWindow,
    order: SortOrder,
) -> Result<Connection<T>, AppError>
where
    T: Paginated + ToSchema,
    F: Fn(PagePlan) -> Fut,
    Fut: Future<Output = Result<Vec<T>, AppError>>,
{
    let page = get_page(&fetch, window, order).await?;
    let page_info = resolve_page_info(&fetch, &page, order).await;
    Ok(Connection::new(page, page_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PaginationError, apply_keyset};
    use chrono::{DateTime, Duration, Utc};
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, ToSchema)]
    struct Item {
        id: String,
        created_at: DateTime<Utc>,
    }

    impl Paginated for Item {
        fn cursor(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    fn items(n: usize) -> Vec<Item> {
        let base = Utc::now();
        (0..n)
            .map(|i| Item {
                id: format!("item-{i:03}"),
                created_at: base + Duration::milliseconds(i as i64),
            })
            .collect()
    }

    fn fetcher(
        items: &[Item],
    ) -> impl Fn(PagePlan) -> std::future::Ready<Result<Vec<Item>, AppError>> + '_ {
        move |plan| std::future::ready(Ok(apply_keyset(items, &plan)))
    }

    #[tokio::test]
    async fn test_first_page_of_many_has_next_but_no_previous() {
        let items = items(20);
        let connection = paginate(fetcher(&items), &PaginationWindow::first(5), SortOrder::Desc)
            .await
            .unwrap();

        assert_eq!(connection.edges.len(), 5);
        assert!(connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
        assert_eq!(
            connection.page_info.start_cursor.as_deref(),
            Some("item-019")
        );
        assert_eq!(connection.page_info.end_cursor.as_deref(), Some("item-015"));
    }

    #[tokio::test]
    async fn test_page_covering_everything_has_no_next() {
        let items = items(22);
        let connection = paginate(fetcher(&items), &PaginationWindow::first(22), SortOrder::Asc)
            .await
            .unwrap();

        assert_eq!(connection.edges.len(), 22);
        assert!(!connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_middle_page_has_both_neighbours() {
        let items = items(10);
        let connection = paginate(
            fetcher(&items),
            &PaginationWindow::after("item-002", 3),
            SortOrder::Asc,
        )
        .await
        .unwrap();

        let ids: Vec<&str> = connection.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["item-003", "item-004", "item-005"]);
        assert!(connection.page_info.has_next_page);
        assert!(connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_empty_page_has_default_page_info() {
        let items: Vec<Item> = Vec::new();
        let connection = paginate(fetcher(&items), &PaginationWindow::default(), SortOrder::Asc)
            .await
            .unwrap();

        assert!(connection.edges.is_empty());
        assert_eq!(connection.page_info, PageInfo::default());
    }

    #[tokio::test]
    async fn test_invalid_window_is_rejected_before_fetching() {
        let calls = AtomicUsize::new(0);
        let fetch = |_plan: PagePlan| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<Vec<Item>, AppError>(Vec::new()))
        };
        let window = PaginationWindow {
            last: Some(10),
            ..Default::default()
        };

        let result = paginate(fetch, &window, SortOrder::Desc).await;
        assert!(matches!(
            result,
            Err(AppError::Pagination(
                PaginationError::BackwardPaginationRequiresCursor
            ))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_probe_counts_as_no_page() {
        let items = items(5);
        let calls = AtomicUsize::new(0);
        let fetch = |plan: PagePlan| {
            // First call serves the page, the probes fail
            let result = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(apply_keyset(&items, &plan))
            } else {
                Err(AppError::Internal("store unavailable".to_string()))
            };
            std::future::ready(result)
        };

        let connection = paginate(fetch, &PaginationWindow::first(2), SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(connection.edges.len(), 2);
        assert!(!connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
    }
}
