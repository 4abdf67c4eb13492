//! Convenient re-exports of commonly used types from docwire.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docwire::prelude::*;
//! ```
//!
//! This provides access to:
//! - Connections and collections
//! - Option sets and write concerns
//! - Selectors, projections and find options
//! - Group and map-reduce specifications
//! - Transport traits and error types

pub use docwire_core::{
    collection::Collection,
    command::{FindAndModifyOptions, InsertOptions, UpdateOptions},
    connection::{CollectionOptions, Connection, ConnectionBuilder},
    document::{EncodedDocument, Projection, Selector},
    error::{CommandError, CommandResult},
    executor::WriteOutcome,
    group::{GroupKeys, GroupMode, GroupSpec, MapReduceOptions, MapReduceOut, MapReduceOutput, Script},
    id::{DocumentId, IdGenerator, ObjectIdGenerator},
    namespace::Namespace,
    options::{ConnectionOptions, OptionSet, WriteConcern, WriteConcernSpec},
    query::{FindOptions, SortDirection, SortSpec},
    transport::{Reply, Transport, TransportBuilder},
};
