//! Query descriptors.
//!
//! A `Query` is an immutable filter over a table's rows. It owns its parsed
//! expression and names columns rather than holding indices, so it can be
//! cloned freely, stored as a view's provenance, and carried across threads
//! inside a handover payload.

use crate::error::Result;
use crate::expr::{eval_row, parse_expr, resolve_columns, Expr};
use crate::table::{Table, TableRef};
use crate::view::TableView;
use std::fmt;

/// `end` / `limit` value meaning "no bound".
pub const UNBOUNDED: usize = usize::MAX;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    expr: Option<Expr>,
}

impl Query {
    /// Matches every row.
    pub fn all() -> Self {
        Query { expr: None }
    }

    /// Parse filter text such as `salary < 1800 AND name != 'Bob'`.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Query {
            expr: Some(parse_expr(text)?),
        })
    }

    pub fn from_expr(expr: Expr) -> Self {
        Query { expr: Some(expr) }
    }

    /// Narrow the query with another condition.
    pub fn and(self, expr: Expr) -> Self {
        let expr = match self.expr {
            Some(existing) => existing.and(expr),
            None => expr,
        };
        Query { expr: Some(expr) }
    }

    pub fn or(self, expr: Expr) -> Self {
        match self.expr {
            Some(existing) => Query {
                expr: Some(existing.or(expr)),
            },
            // Already matches everything
            None => self,
        }
    }

    pub fn expr(&self) -> Option<&Expr> {
        self.expr.as_ref()
    }

    /// Matching rows in `[start, end)`, ascending, at most `limit` of them.
    ///
    /// `end` is clamped to the table length. Fails if the expression names a
    /// column the table does not have.
    pub fn find_all(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<Vec<usize>> {
        let end = end.min(table.len());
        if start >= end || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(expr) = &self.expr else {
            return Ok((start..end).take(limit).collect());
        };
        let columns = resolve_columns(expr, table)?;
        Ok((start..end)
            .filter(|&row| eval_row(expr, table, &columns, row))
            .take(limit)
            .collect())
    }

    pub fn count(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<usize> {
        Ok(self.find_all(table, start, end, limit)?.len())
    }

    /// Run the query and wrap the result in a view that re-runs it on sync.
    pub fn find_all_view(&self, table: &TableRef, start: usize, end: usize, limit: usize) -> Result<TableView> {
        TableView::from_query(table, self.clone(), start, end, limit)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{}", expr),
            None => write!(f, "TRUEPREDICATE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnType, ColumnValue};
    use crate::error::TableError;
    use crate::expr::{CompareOp, LiteralValue};
    use crate::table::Schema;
    use std::collections::HashMap;

    fn salaries(values: &[i64]) -> Table {
        let schema = Schema::new(vec![("salary".to_string(), ColumnType::Int64, false)]);
        let mut table = Table::new("employees".to_string(), schema);
        for v in values {
            let mut row = HashMap::new();
            row.insert("salary".to_string(), ColumnValue::Int64(*v));
            table.append_row(row).unwrap();
        }
        table
    }

    #[test]
    fn test_find_all_respects_range_and_limit() {
        let table = salaries(&[1000, 2000, 1500, 900, 1700]);
        let query = Query::parse("salary < 1800").unwrap();
        assert_eq!(query.find_all(&table, 0, UNBOUNDED, UNBOUNDED).unwrap(), vec![0, 2, 3, 4]);
        assert_eq!(query.find_all(&table, 1, 4, UNBOUNDED).unwrap(), vec![2, 3]);
        assert_eq!(query.find_all(&table, 0, UNBOUNDED, 2).unwrap(), vec![0, 2]);
        assert_eq!(query.count(&table, 4, 2, UNBOUNDED).unwrap(), 0);
    }

    #[test]
    fn test_all_and_builders() {
        let table = salaries(&[1000, 2000, 1500]);
        assert_eq!(Query::all().find_all(&table, 1, UNBOUNDED, UNBOUNDED).unwrap(), vec![1, 2]);

        let query = Query::all()
            .and(Expr::compare("salary", CompareOp::Gt, LiteralValue::Int(1200)))
            .or(Expr::compare("salary", CompareOp::Eq, LiteralValue::Int(1000)));
        assert_eq!(query.find_all(&table, 0, UNBOUNDED, UNBOUNDED).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let table = salaries(&[1]);
        let query = Query::parse("bonus > 1").unwrap();
        assert!(matches!(
            query.find_all(&table, 0, UNBOUNDED, UNBOUNDED),
            Err(TableError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_query_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Query>();
    }
}
