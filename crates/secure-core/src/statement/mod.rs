//! Statement building, column values and row decoding.
//!
//! - [`StatementBuilder`] - converts `@name` queries into the store's dialect
//! - [`SqlValue`] - dialect-neutral column values
//! - [`Row`], [`Mapped`], [`Column`] - one column table per entity drives
//!   inserts, selects and decoding
//! - [`Assignments`], [`Patch`] - sparse updates
//! - [`Filter`] - AND-combined list predicates

pub mod builder;
pub mod filter;
pub mod row;
pub mod value;

pub use builder::{Dialect, NamedParams, ParamKey, Statement, StatementBuilder};
pub use filter::Filter;
pub use row::{
    decode, insert_sql, select_columns, stored_form, Assignments, Column, Mapped, Patch, Row,
};
pub use value::{format_timestamp, parse_timestamp, FromSqlValue, IntoSqlValue, SqlValue};

/// Builds a [`NamedParams`] map.
///
/// ```
/// use helios_secure_core::named_params;
///
/// let params = named_params! { "id" => "abc", "version" => 3i64 };
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::statement::NamedParams::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::statement::NamedParams::new();
        $(
            params.insert(
                ($name).to_string(),
                $crate::statement::IntoSqlValue::to_sql_value(&$value),
            );
        )+
        params
    }};
}
