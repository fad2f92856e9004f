//! Dialect-portable statement building.
//!
//! Repositories write every query once, using `@name` placeholders, and pass
//! the values in a [`NamedParams`] map. The [`StatementBuilder`] converts that
//! into the concrete syntax of the store's dialect:
//!
//! - [`Dialect::Sqlite`] binds named placeholders natively, so the text and
//!   parameters pass through unchanged.
//! - [`Dialect::Postgres`] is positional. The distinct placeholder names are
//!   sorted lexicographically and numbered from 1, every occurrence of a name
//!   is rewritten to its `$n`, and the parameters are rekeyed by position.
//!
//! Sorting the set of names (rather than numbering by first appearance) makes
//! the assignment reproducible no matter how the parameter map is iterated.
//!
//! ```
//! use helios_secure_core::named_params;
//! use helios_secure_core::statement::{Dialect, ParamKey, StatementBuilder, SqlValue};
//!
//! let builder = StatementBuilder::new(Dialect::Postgres);
//! let stmt = builder.build(
//!     "SELECT * FROM t WHERE c = @c AND a = @a AND b = @b AND a2 = @a",
//!     named_params! { "a" => "x", "b" => 2i64, "c" => "z" },
//! );
//! assert_eq!(stmt.sql(), "SELECT * FROM t WHERE c = $3 AND a = $1 AND b = $2 AND a2 = $1");
//! assert_eq!(stmt.params().get(&ParamKey::Position(1)), Some(&SqlValue::Text("x".into())));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::value::SqlValue;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder pattern is a valid regex")
});

/// Parameters keyed by placeholder name (without the `@`).
pub type NamedParams = BTreeMap<String, SqlValue>;

/// The SQL syntax and parameter-binding convention of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite: named `@name` placeholders.
    #[default]
    Sqlite,
    /// PostgreSQL: positional `$n` placeholders.
    Postgres,
}

impl Dialect {
    /// Returns true if this dialect binds `@name` placeholders directly.
    pub fn uses_named_placeholders(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    /// Returns the configuration name of this dialect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "named" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "positional" => Ok(Dialect::Postgres),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}

/// Key of a bound parameter in a built statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    /// Named placeholder (`@name`).
    Name(String),
    /// 1-based positional placeholder (`$n`).
    Position(usize),
}

impl ParamKey {
    /// Returns the placeholder token as it appears in the statement text.
    pub fn placeholder(&self) -> String {
        match self {
            ParamKey::Name(name) => format!("@{}", name),
            ParamKey::Position(pos) => format!("${}", pos),
        }
    }
}

/// A statement ready to execute against a store of one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: BTreeMap<ParamKey, SqlValue>,
    dialect: Dialect,
}

impl Statement {
    /// Returns the dialect-specific statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the bound parameters.
    pub fn params(&self) -> &BTreeMap<ParamKey, SqlValue> {
        &self.params
    }

    /// Returns the dialect the statement was built for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns positional values in position order.
    ///
    /// Named parameters, if any, are skipped.
    pub fn positional_values(&self) -> Vec<&SqlValue> {
        self.params
            .iter()
            .filter(|(key, _)| matches!(key, ParamKey::Position(_)))
            .map(|(_, value)| value)
            .collect()
    }
}

/// Builds [`Statement`]s for one dialect.
///
/// The dialect is fixed at construction; nothing is read from the process
/// environment when a statement is built.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: Dialect,
}

impl StatementBuilder {
    /// Creates a builder for the given dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Returns the builder's dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Converts a named-placeholder query into the builder's dialect.
    ///
    /// Names present in `params` but never referenced by `sql` are dropped
    /// without error.
    pub fn build(&self, sql: &str, params: NamedParams) -> Statement {
        if self.dialect.uses_named_placeholders() {
            return Statement {
                sql: sql.to_string(),
                params: params
                    .into_iter()
                    .map(|(name, value)| (ParamKey::Name(name), value))
                    .collect(),
                dialect: self.dialect,
            };
        }

        let names: BTreeSet<&str> = PLACEHOLDER
            .captures_iter(sql)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();

        if names.is_empty() {
            if !params.is_empty() {
                tracing::debug!(
                    dropped = params.len(),
                    "Statement has no placeholders; parameters dropped"
                );
            }
            return Statement {
                sql: sql.to_string(),
                params: BTreeMap::new(),
                dialect: self.dialect,
            };
        }

        let positions: BTreeMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(index, name)| (*name, index + 1))
            .collect();

        let rewritten = PLACEHOLDER.replace_all(sql, |caps: &Captures| {
            match positions.get(&caps[1]) {
                Some(pos) => format!("${}", pos),
                None => caps[0].to_string(),
            }
        });

        let mut params = params;
        let mut bound = BTreeMap::new();
        for (name, pos) in &positions {
            if let Some(value) = params.remove(*name) {
                bound.insert(ParamKey::Position(*pos), value);
            }
        }

        if !params.is_empty() {
            let dropped: Vec<&String> = params.keys().collect();
            tracing::debug!(?dropped, "Unreferenced named parameters dropped");
        }

        Statement {
            sql: rewritten.into_owned(),
            params: bound,
            dialect: self.dialect,
        }
    }
}
