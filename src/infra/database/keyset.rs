//! SQL rendering of keyset page plans.

use sqlx::{Postgres, QueryBuilder};

use crate::domain::{KEYSET_COLUMNS, PagePlan, SortOrder};

/// Builds a paginated `SELECT` on top of a base query.
///
/// The cursor is resolved inside the query with a sub-select on the cursor
/// row, so an unknown cursor compares against `NULL` and matches nothing.
pub struct KeysetQuery {
    builder: QueryBuilder<'static, Postgres>,
    table: &'static str,
    alias: &'static str,
    has_where: bool,
}

impl KeysetQuery {
    /// `select` must end with `FROM {table} {alias}` plus any joins.
    pub fn new(select: &str, table: &'static str, alias: &'static str) -> Self {
        Self {
            builder: QueryBuilder::new(select),
            table,
            alias,
            has_where: false,
        }
    }

    fn push_condition(&mut self) {
        self.builder
            .push(if self.has_where { " AND " } else { " WHERE " });
        self.has_where = true;
    }

    /// Restrict the page to rows where `column = value`
    #[must_use]
    pub fn filter_eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.push_condition();
        self.builder
            .push(column)
            .push(" = ")
            .push_bind(value.into());
        self
    }

    /// Append the cursor predicate, ordering and limit
    pub fn page(mut self, plan: &PagePlan) -> QueryBuilder<'static, Postgres> {
        if let Some(cursor) = &plan.cursor {
            self.push_condition();
            self.builder
                .push(format!(
                    "({}) {} (SELECT {} FROM {} c WHERE c.id = ",
                    qualified_columns(self.alias),
                    plan.comparison().as_sql(),
                    qualified_columns("c"),
                    self.table,
                ))
                .push_bind(cursor.clone())
                .push(")");
        }
        self.builder
            .push(" ORDER BY ")
            .push(order_by(self.alias, plan.scan_order()))
            .push(" LIMIT ")
            .push_bind(plan.limit);
        self.builder
    }
}

fn qualified_columns(alias: &str) -> String {
    KEYSET_COLUMNS
        .iter()
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by(alias: &str, order: SortOrder) -> String {
    KEYSET_COLUMNS
        .iter()
        .map(|column| format!("{alias}.{column} {}", order.as_sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaginationWindow;

    const SELECT: &str = "SELECT x.id, x.created_at FROM assets x";

    fn plan(window: PaginationWindow, order: SortOrder) -> PagePlan {
        PagePlan::from_window(&window, order).unwrap()
    }

    #[test]
    fn test_first_page_has_no_cursor_predicate() {
        let builder =
            KeysetQuery::new(SELECT, "assets", "x").page(&plan(PaginationWindow::first(5), SortOrder::Desc));
        assert_eq!(
            builder.sql(),
            "SELECT x.id, x.created_at FROM assets x ORDER BY x.created_at DESC, x.id DESC LIMIT $1"
        );
    }

    #[test]
    fn test_forward_page_compares_against_cursor_row() {
        let builder = KeysetQuery::new(SELECT, "assets", "x")
            .page(&plan(PaginationWindow::after("abc", 5), SortOrder::Asc));
        assert_eq!(
            builder.sql(),
            "SELECT x.id, x.created_at FROM assets x \
             WHERE (x.created_at, x.id) > (SELECT c.created_at, c.id FROM assets c WHERE c.id = $1) \
             ORDER BY x.created_at ASC, x.id ASC LIMIT $2"
        );
    }

    #[test]
    fn test_backward_page_flips_comparison_and_order() {
        let builder = KeysetQuery::new(SELECT, "assets", "x")
            .filter_eq("x.code", "USD")
            .page(&plan(PaginationWindow::before("abc", 5), SortOrder::Asc));
        assert_eq!(
            builder.sql(),
            "SELECT x.id, x.created_at FROM assets x WHERE x.code = $1 \
             AND (x.created_at, x.id) < (SELECT c.created_at, c.id FROM assets c WHERE c.id = $2) \
             ORDER BY x.created_at DESC, x.id DESC LIMIT $3"
        );
    }
}
