//! Database layer.
//!
//! This module provides:
//! - Driver availability checks per dialect family
//! - Connection URL construction
//! - Pooled engines, one per sqlx backend
//! - Session factories, sessions and transactions
//! - The connection registry and its scoped guard

#[macro_use]
pub mod macros;
pub mod drivers;
pub mod engine;
pub mod registry;
pub mod session;
pub mod url;

pub use drivers::{
    COMPILED_DRIVERS, CompiledDrivers, DriverLocator, DriverRequirement, DriverRequirements,
};
pub use engine::Engine;
pub use registry::{ConnectionRegistry, RegistryBuilder, RegistryGuard};
pub use session::{Session, SessionConnection, SessionFactory, SessionTransaction};
pub use self::url::ConnectionUrl;
