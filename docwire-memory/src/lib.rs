//! In-memory transport for docwire.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `Transport` trait. Behind it sits an emulated single server that keeps
//! collections in memory, answers `getlasterror` for the last write and runs
//! the admin commands the command layer sends. It is meant for development
//! and tests.
//!
//! # Features
//!
//! - **Verified writes** - Inserts, updates and deletes record a last-error status
//! - **Queries** - Equality and comparison selectors, `$orderby`, skip, limit and projections
//! - **Admin commands** - count, distinct, findandmodify, drop, deleteIndexes, renameCollection
//! - **Test hooks** - A command log, injected transport failures and custom command handlers
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use docwire_core::{connection::Connection, options::OptionSet};
//! use docwire_memory::MemoryTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::new(MemoryTransport::new(), "app")?;
//!     let users = connection.collection("users")?;
//!
//!     let mut alice = doc! { "name": "Alice" };
//!     users.insert_one(&mut alice, OptionSet::new().safe(true)).await?;
//!
//!     Ok(())
//! }
//! ```

mod evaluator;
mod server;
pub mod transport;
mod update;

pub use server::{CommandHandler, NO_MATCHING_OBJECT};
pub use transport::{MemoryTransport, MemoryTransportBuilder};
