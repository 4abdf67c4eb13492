//! Main docwire crate providing the client-side command layer of a document
//! database driver.
//!
//! This crate is the primary entry point. It re-exports the core types from
//! `docwire-core` and the in-memory transport from `docwire-memory`.
//!
//! # Features
//!
//! - **Verified writes** - Writes are paired with `getlasterror` when the effective `safe` option asks for it
//! - **Option precedence** - Call options override collection defaults, which override connection defaults
//! - **Legacy call shapes** - Positional `find`/`findOne` arguments are resolved into one normalized call
//! - **Pluggable transports** - Anything implementing [`transport::Transport`] can carry the commands
//!
//! # Quick Start
//!
//! ```ignore
//! use docwire::{prelude::*, memory::MemoryTransport};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> CommandResult<()> {
//!     let connection = Connection::builder(MemoryTransport::new())
//!         .database("app")
//!         .options(ConnectionOptions::new().defaults(OptionSet::new().safe(true)))
//!         .build()?;
//!
//!     let users = connection.collection("users")?;
//!
//!     // The generated _id is written back into the document
//!     let mut alice = doc! { "name": "Alice" };
//!     users.insert_one(&mut alice, OptionSet::new()).await?;
//!
//!     // Verified update; the outcome carries the affected count
//!     let outcome = users
//!         .update(doc! { "name": "Alice" }, doc! { "$set": { "age": 30 } }, UpdateOptions::new())
//!         .await?;
//!     assert_eq!(outcome.affected(), Some(1));
//!
//!     let found = users.find_one(doc! { "name": "Alice" }, FindOptions::default()).await?;
//!     println!("Found: {:?}", found);
//!
//!     connection.shutdown().await
//! }
//! ```
//!
//! # Legacy Call Shapes
//!
//! `find_compat` accepts the positional shapes older drivers accepted and
//! returns the query it would run. A completion handler may lead or trail the
//! argument list.
//!
//! ```ignore
//! use docwire::{prelude::*, args::FindArg};
//! use bson::doc;
//!
//! let query = users
//!     .find_compat(vec![FindArg::from(doc! { "age": { "$gt": 21 } }), FindArg::from(vec!["name"])])
//!     .expect("no handler given")?;
//! ```
//!
//! # Transports
//!
//! - [`memory`] - An emulated single server for development and testing

pub mod prelude;

pub use docwire_core::{
    args, collection, command, connection, document, error, executor, group, id, namespace, options, query,
    transport,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory transport implementations.
pub mod memory {
    pub use docwire_memory::{CommandHandler, MemoryTransport, MemoryTransportBuilder};
}
