//! What a view was built from, and therefore how it is rebuilt on sync.

use crate::link::LinkList;
use crate::query::Query;

#[derive(Debug, Clone, Default)]
pub enum Provenance {
    /// Imperative view: rows were chosen explicitly and are never re-derived.
    #[default]
    None,
    /// Matches of `query` over table rows `[start, end)`, at most `limit`.
    Query {
        query: Query,
        start: usize,
        end: usize,
        limit: usize,
    },
    /// Targets of a link list.
    LinkList(LinkList),
    /// One representative row per distinct value of `column`.
    Distinct { column: usize },
}

impl Provenance {
    pub fn is_none(&self) -> bool {
        matches!(self, Provenance::None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Provenance::None => "none",
            Provenance::Query { .. } => "query",
            Provenance::LinkList(_) => "link list",
            Provenance::Distinct { .. } => "distinct",
        }
    }

    /// Only views without provenance, or already distinct, may become
    /// distinct views.
    pub fn allows_distinct(&self) -> bool {
        matches!(self, Provenance::None | Provenance::Distinct { .. })
    }
}
