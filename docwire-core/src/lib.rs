//! The client-side command layer of a document database driver.
//!
//! This crate turns collection operations into server commands and provides:
//!
//! - **Document identifiers** ([`id`]) - 12-byte identifiers and pluggable generators
//! - **Option resolution** ([`options`]) - The call → collection → connection precedence chain
//! - **Command building** ([`command`], [`query`], [`group`]) - Typed command payloads
//! - **Write-concern protocol** ([`executor`]) - Verified and unacknowledged writes
//! - **Legacy call shapes** ([`args`]) - Positional `find`/`findOne` argument resolution
//! - **Transport abstraction** ([`transport`]) - The trait every connection implements
//! - **Collections and connections** ([`collection`], [`connection`]) - The caller-facing API
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docwire_core::{connection::Connection, options::OptionSet};
//!
//! let connection = Connection::new(transport, "app")?;
//! let users = connection.collection("users")?;
//!
//! let mut alice = doc! { "name": "Alice" };
//! let outcome = users.insert_one(&mut alice, OptionSet::new().safe(true)).await?;
//! assert_eq!(outcome.affected(), Some(1));
//! ```

pub mod args;
pub mod collection;
pub mod command;
pub mod connection;
pub mod document;
pub mod error;
pub mod executor;
pub mod group;
pub mod id;
pub mod namespace;
pub mod options;
pub mod query;
pub mod transport;
