//! SQL Server driver for Sprocket
//!
//! Wraps tiberius behind the core [`Connection`](sprocket_core::Connection)
//! and [`CatalogIntrospection`](sprocket_core::CatalogIntrospection) traits,
//! and provides the production [`Connector`](sprocket_core::Connector)
//! implementation used by the tenant connection registry.

mod catalog;
mod connection;

pub use connection::{MssqlConnection, MssqlConnectionError, MssqlConnector};
