//! Backend dispatch macro for reducing code duplication.
//!
//! Engines, session connections and session transactions are all enums with one
//! variant per sqlx backend. `dispatch!` expands the same body once per variant so
//! each arm is type-checked against its own concrete sqlx type.

/// Run the same expression against whichever backend variant is present.
///
/// # Example
///
/// ```ignore
/// dispatch!(Engine, self, pool => sqlx::query(sql).execute(pool).await)
/// ```
#[macro_export]
macro_rules! dispatch {
    ($enum:ident, $value:expr, $p:ident => $body:expr) => {
        match $value {
            $enum::Postgres($p) => $body,
            $enum::MySql($p) => $body,
            $enum::Sqlite($p) => $body,
        }
    };
}

pub use dispatch;
