//! AND-combined list filters.

use super::builder::NamedParams;
use super::value::{IntoSqlValue, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Gte,
    Lt,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Gte => "gte",
            Comparison::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    column: &'static str,
    comparison: Comparison,
    value: SqlValue,
}

/// Equality and range predicates combined with AND.
///
/// Column names are `&'static str` so they can only come from code, never
/// from request input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
    exclude_deleted: bool,
}

impl Filter {
    /// Creates a filter that matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `column = value`.
    pub fn eq(mut self, column: &'static str, value: impl IntoSqlValue) -> Self {
        self.push(column, Comparison::Eq, value.to_sql_value());
        self
    }

    /// Adds `column >= value`.
    pub fn gte(mut self, column: &'static str, value: impl IntoSqlValue) -> Self {
        self.push(column, Comparison::Gte, value.to_sql_value());
        self
    }

    /// Adds `column < value`.
    pub fn lt(mut self, column: &'static str, value: impl IntoSqlValue) -> Self {
        self.push(column, Comparison::Lt, value.to_sql_value());
        self
    }

    /// Adds the half-open range `start <= column < end`.
    pub fn between(
        self,
        column: &'static str,
        start: impl IntoSqlValue,
        end: impl IntoSqlValue,
    ) -> Self {
        self.gte(column, start).lt(column, end)
    }

    /// Restricts the filter to rows whose soft-delete flag is clear.
    pub fn exclude_deleted(mut self) -> Self {
        self.exclude_deleted = true;
        self
    }

    /// Returns true if the soft-delete guard is set.
    pub fn excludes_deleted(&self) -> bool {
        self.exclude_deleted
    }

    fn push(&mut self, column: &'static str, comparison: Comparison, value: SqlValue) {
        self.predicates.push(Predicate {
            column,
            comparison,
            value,
        });
    }

    /// Renders a `WHERE ...` clause (or an empty string) and binds its values.
    pub fn render(&self, params: &mut NamedParams) -> String {
        let mut clauses = Vec::with_capacity(self.predicates.len() + 1);
        for (index, predicate) in self.predicates.iter().enumerate() {
            let name = format!(
                "w{}_{}_{}",
                index,
                predicate.column,
                predicate.comparison.suffix()
            );
            clauses.push(format!(
                "{} {} @{}",
                predicate.column,
                predicate.comparison.operator(),
                name
            ));
            params.insert(name, predicate.value.clone());
        }
        if self.exclude_deleted {
            clauses.push("is_deleted = 0".to_string());
        }
        if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        }
    }
}
