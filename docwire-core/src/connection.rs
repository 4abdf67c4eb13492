//! Database connection handle.
//!
//! A [`Connection`] owns a [`Transport`], the name of the database it talks
//! to and the connection-level [`ConnectionOptions`]. Collections borrow it.
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::{connection::Connection, options::{ConnectionOptions, OptionSet}};
//!
//! let connection = Connection::builder(transport)
//!     .database("app")
//!     .options(ConnectionOptions::new().defaults(OptionSet::new().safe(true)))
//!     .build()?;
//!
//! let users = connection.collection("users")?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document};

use crate::{
    collection::Collection,
    command::AdminCommand,
    error::{CommandError, CommandResult},
    executor::{WriteConcernExecutor, first_document},
    group::{Script, eval_command, eval_result},
    id::{IdGenerator, ObjectIdGenerator},
    namespace::{Namespace, validate_database_name},
    options::{ConnectionOptions, OptionSet},
    transport::Transport,
};

/// Collection-level defaults.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Options applied when the call does not set them.
    pub defaults: OptionSet,
    /// Identifier strategy; the process-wide [`ObjectIdGenerator`] when unset.
    pub id_generator: Option<Arc<dyn IdGenerator>>,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults(mut self, defaults: OptionSet) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }
}

/// A handle to one database over one transport.
///
/// # Type Parameters
///
/// * `T` - The transport implementation type
#[derive(Debug)]
pub struct Connection<T: Transport> {
    transport: T,
    database: String,
    options: ConnectionOptions,
}

impl<T: Transport> Connection<T> {
    /// Creates a connection with default options.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a malformed database name.
    pub fn new(transport: T, database: impl Into<String>) -> CommandResult<Self> {
        Connection::builder(transport)
            .database(database)
            .build()
    }

    /// Creates a builder for fluent construction.
    pub fn builder(transport: T) -> ConnectionBuilder<T> {
        ConnectionBuilder { transport, database: None, options: ConnectionOptions::default() }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn executor(&self) -> WriteConcernExecutor<'_, T> {
        WriteConcernExecutor::new(&self.transport)
    }

    /// Returns a handle to a collection with no collection-level defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a malformed collection name.
    pub fn collection(&self, name: &str) -> CommandResult<Collection<'_, T>> {
        self.collection_with(name, CollectionOptions::default())
    }

    /// Returns a handle to a collection with its own defaults and identifier
    /// strategy.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a malformed collection name.
    pub fn collection_with(&self, name: &str, options: CollectionOptions) -> CommandResult<Collection<'_, T>> {
        let namespace = Namespace::new(self.database.as_str(), name)?;
        let generator = options
            .id_generator
            .unwrap_or_else(|| Arc::new(ObjectIdGenerator::new()));

        Ok(Collection::new(namespace, self, options.defaults, generator))
    }

    /// Sends a raw reply-returning admin command and returns the first
    /// response document without interpreting it.
    pub(crate) async fn run(&self, command: AdminCommand) -> CommandResult<Document> {
        tracing::debug!(
            command = command.name().unwrap_or_default(),
            namespace = %command.namespace,
            "dispatching command"
        );
        let reply = self.transport.dispatch(command.into()).await?;
        Ok(first_document(&reply)?.clone())
    }

    /// Runs an admin command against this database.
    ///
    /// # Arguments
    ///
    /// * `command` - The command document; its first key names the command
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the reply reports failure.
    pub async fn command(&self, command: Document) -> CommandResult<Document> {
        self.executor()
            .command(AdminCommand::new(self.database.as_str(), command))
            .await
    }

    /// Evaluates a script on the server.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Evaluation`] if the script fails.
    pub async fn eval(&self, script: impl Into<Script>, args: Vec<Bson>) -> CommandResult<Bson> {
        let script = script.into();
        let reply = self
            .run(eval_command(&self.database, &script, args))
            .await?;
        eval_result(&reply)
    }

    /// Drops a collection.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server refuses, e.g. because
    /// the collection does not exist.
    pub async fn drop_collection(&self, name: &str) -> CommandResult<bool> {
        self.collection(name)?.drop().await
    }

    /// Renames a collection within this database.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a malformed target name, or
    /// [`CommandError::Server`] if the server refuses.
    pub async fn rename_collection(&self, from: &str, to: &str) -> CommandResult<()> {
        self.collection(from)?
            .rename(to)
            .await
            .map(|_| ())
    }

    /// Shuts down the underlying transport.
    pub async fn shutdown(self) -> CommandResult<()> {
        self.transport.shutdown().await
    }
}

/// Builder for [`Connection`].
#[derive(Debug)]
pub struct ConnectionBuilder<T: Transport> {
    transport: T,
    database: Option<String>,
    options: ConnectionOptions,
}

impl<T: Transport> ConnectionBuilder<T> {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the connection.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] if no database was named or the
    /// name is malformed.
    pub fn build(self) -> CommandResult<Connection<T>> {
        let database = self
            .database
            .ok_or_else(|| CommandError::Validation("a connection requires a database name".into()))?;
        validate_database_name(&database)?;

        Ok(Connection { transport: self.transport, database, options: self.options })
    }
}
