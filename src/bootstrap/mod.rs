//! One-time bootstrap flows.
//!
//! Both flows follow the same shape: read the current state, decide what
//! has to change, ask the operator where needed, apply the change through
//! the safe writer, and record a marker only once everything succeeded.

pub mod config;
pub mod database;

pub use config::{ConfigInitReport, ConfigStatus, UpgradeMode, config_status, reconcile_config, set_secret};
pub use database::{DataDirAction, DbInitReport, bootstrap_database, generate_password, write_backend_password};
