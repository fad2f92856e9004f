//! Generic row decoding and sparse updates.
//!
//! Each persisted entity describes its columns once, as a table of
//! [`Column`]s built with the [`column!`](crate::column) macro. That single
//! table drives the `SELECT` column list, `INSERT` statements and decoding a
//! [`Row`] back into the entity.

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult, DependencyError};

use super::builder::NamedParams;
use super::value::{FromSqlValue, IntoSqlValue, SqlValue};

/// One row returned by the store, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.values.insert(column.into(), value);
    }

    /// Returns the raw value of a column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Decodes a single column.
    pub fn decode<T: FromSqlValue>(&self, column: &str) -> CoreResult<T> {
        let value = self.get(column).ok_or_else(|| decode_error(column, "column missing from row"))?;
        T::from_sql_value(value).map_err(|message| decode_error(column, &message))
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn decode_error(column: &str, message: &str) -> CoreError {
    CoreError::Dependency(DependencyError::Decode {
        column: column.to_string(),
        message: message.to_string(),
    })
}

/// Mapping between one column and one entity field.
pub struct Column<E> {
    name: &'static str,
    read: fn(&E) -> SqlValue,
    write: fn(&mut E, &SqlValue) -> Result<(), String>,
}

impl<E> Column<E> {
    /// Creates a column mapping from its accessor pair.
    pub fn new(
        name: &'static str,
        read: fn(&E) -> SqlValue,
        write: fn(&mut E, &SqlValue) -> Result<(), String>,
    ) -> Self {
        Self { name, read, write }
    }

    /// Returns the column name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Builds a [`Column`] for a field path of `Self`.
///
/// ```ignore
/// fn columns() -> Vec<Column<Self>> {
///     vec![column!("id" => meta.id), column!("title" => title)]
/// }
/// ```
#[macro_export]
macro_rules! column {
    ($name:literal => $($field:ident).+) => {
        $crate::statement::Column::new(
            $name,
            |entity: &Self| $crate::statement::IntoSqlValue::to_sql_value(&entity.$($field).+),
            |entity: &mut Self, value: &$crate::statement::SqlValue| {
                entity.$($field).+ = $crate::statement::FromSqlValue::from_sql_value(value)?;
                Ok(())
            },
        )
    };
}

/// An entity persisted as one row of one table.
pub trait Mapped: Default + Clone + Send + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;

    /// Resource type recorded in errors and audit entries.
    const RESOURCE_TYPE: &'static str;

    /// The column/field mapping table.
    fn columns() -> Vec<Column<Self>>;

    /// The entity's primary key.
    fn id(&self) -> &str;
}

/// Decodes a row into an entity using its column table.
pub fn decode<E: Mapped>(row: &Row) -> CoreResult<E> {
    let mut entity = E::default();
    for column in E::columns() {
        let value = row
            .get(column.name)
            .ok_or_else(|| decode_error(column.name, "column missing from row"))?;
        (column.write)(&mut entity, value).map_err(|message| decode_error(column.name, &message))?;
    }
    Ok(entity)
}

/// Returns the entity as a read of its row would.
///
/// Every field passes through its column encoding, so timestamps finer than
/// the stored microseconds come back truncated.
pub fn stored_form<E: Mapped>(entity: &E) -> CoreResult<E> {
    let row: Row = E::columns()
        .iter()
        .map(|column| (column.name.to_string(), (column.read)(entity)))
        .collect();
    decode(&row)
}

/// Returns the comma-separated column list of an entity.
pub fn select_columns<E: Mapped>() -> String {
    E::columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the `INSERT` statement text and parameters for an entity.
pub fn insert_sql<E: Mapped>(entity: &E) -> (String, NamedParams) {
    let columns = E::columns();
    let mut params = NamedParams::new();
    let mut names = Vec::with_capacity(columns.len());
    let mut placeholders = Vec::with_capacity(columns.len());
    for column in &columns {
        names.push(column.name);
        placeholders.push(format!("@{}", column.name));
        params.insert(column.name.to_string(), (column.read)(entity));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        E::TABLE,
        names.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

/// The present fields of a sparse update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments {
    fields: Vec<(&'static str, SqlValue)>,
}

impl Assignments {
    /// Creates an empty set of assignments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always assigns a column.
    pub fn set(&mut self, column: &'static str, value: impl IntoSqlValue) {
        self.fields.push((column, value.to_sql_value()));
    }

    /// Assigns a column only if the patch field is present.
    pub fn set_present<T: IntoSqlValue>(&mut self, column: &'static str, value: &Option<T>) {
        if let Some(v) = value {
            self.fields.push((column, v.to_sql_value()));
        }
    }

    /// Returns true if nothing is assigned.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the assigned column names in order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(c, _)| *c).collect()
    }

    /// Renders `col = @set_col, ...` and binds the values into `params`.
    pub fn render(&self, params: &mut NamedParams) -> String {
        self.fields
            .iter()
            .map(|(column, value)| {
                let name = format!("set_{}", column);
                let clause = format!("{} = @{}", column, name);
                params.insert(name, value.clone());
                clause
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A sparse update for entity `E`: absent fields are left untouched.
pub trait Patch<E>: Send + Sync {
    /// Returns the column assignments of the present fields.
    fn assignments(&self) -> Assignments;

    /// Applies the present fields to an in-memory copy.
    fn apply_to(&self, entity: &mut E);

    /// Returns true if no field is present.
    fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}
