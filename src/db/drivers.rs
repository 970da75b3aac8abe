//! Driver availability checks per dialect family.
//!
//! A `DriverRequirements` table maps each database family to the packages its
//! engine needs, and a `DriverLocator` answers whether a package is available in
//! the running build. Both are injected into the registry, so tests can simulate
//! missing drivers without touching the build.

use crate::error::{DbError, DbResult};
use crate::models::dialect_family;
use std::collections::HashMap;
use tracing::debug;

/// Driver packages linked into this build through sqlx features.
pub const COMPILED_DRIVERS: &[&str] = &["sqlx-postgres", "sqlx-mysql", "sqlx-sqlite"];

/// Answers whether a driver package can be used at runtime.
pub trait DriverLocator: Send + Sync {
    fn is_available(&self, package: &str) -> bool;
}

impl<F> DriverLocator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_available(&self, package: &str) -> bool {
        self(package)
    }
}

/// Default locator: a package is available if it is one of the compiled-in sqlx drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompiledDrivers;

impl DriverLocator for CompiledDrivers {
    fn is_available(&self, package: &str) -> bool {
        COMPILED_DRIVERS.contains(&package)
    }
}

/// Packages required by one database family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRequirement {
    pub packages: Vec<String>,
    /// Shown to the user when one of the packages is missing
    pub install_hint: String,
}

/// Immutable family → required packages table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRequirements {
    families: HashMap<String, DriverRequirement>,
}

impl DriverRequirements {
    /// A table with no entries: every family needs nothing.
    pub fn empty() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    /// Add or replace the requirement for a family (stored lower-cased).
    pub fn with_family<I, S>(
        mut self,
        family: &str,
        packages: I,
        install_hint: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.families.insert(
            family.to_lowercase(),
            DriverRequirement {
                packages: packages.into_iter().map(Into::into).collect(),
                install_hint: install_hint.into(),
            },
        );
        self
    }

    /// Packages required for a family. Unknown families require nothing.
    pub fn required_for(&self, family: &str) -> &[String] {
        self.families
            .get(&family.to_lowercase())
            .map(|req| req.packages.as_slice())
            .unwrap_or(&[])
    }

    /// Get the full requirement entry for a family.
    pub fn requirement(&self, family: &str) -> Option<&DriverRequirement> {
        self.families.get(&family.to_lowercase())
    }

    /// Check that every package required by the dialect's family is available.
    ///
    /// Fails with `MissingDriver` on the first missing package.
    pub fn check(&self, dialect: &str, locator: &dyn DriverLocator) -> DbResult<()> {
        let family = dialect_family(dialect);
        let Some(requirement) = self.families.get(&family) else {
            debug!(dialect = %dialect, family = %family, "No driver requirements for family");
            return Ok(());
        };

        for package in &requirement.packages {
            if !locator.is_available(package) {
                return Err(DbError::missing_driver(
                    package.as_str(),
                    dialect,
                    requirement.install_hint.as_str(),
                ));
            }
        }

        debug!(dialect = %dialect, family = %family, "Driver requirements satisfied");
        Ok(())
    }
}

impl Default for DriverRequirements {
    fn default() -> Self {
        Self::empty()
            .with_family(
                "postgresql",
                ["sqlx-postgres"],
                "cargo add sqlx --features postgres",
            )
            .with_family("mysql", ["sqlx-mysql"], "cargo add sqlx --features mysql")
            .with_family("oracle", ["oracle"], "cargo add oracle")
            .with_family("mssql", ["tiberius"], "cargo add tiberius")
            .with_family("sqlite", Vec::<String>::new(), "")
    }
}
