//! Typed command payloads and the builders that assemble them.
//!
//! Every call builds a fresh [`Command`]; nothing is shared between calls.
//! The transport decides how a command is framed and serialized. This module
//! only decides which documents and flags it carries.

use std::fmt::{self, Display};

use bson::{Bson, Document, doc};

use crate::{
    document::{Body, ID_FIELD, Projection, Selector, has_id},
    error::{CommandError, CommandResult},
    id::IdGenerator,
    namespace::Namespace,
    options::{EffectiveOptions, OptionSet, WriteConcern},
    query::{QueryCommand, SortSpec},
};

/// Database that receives cross-database admin commands such as renames.
pub const ADMIN_DATABASE: &str = "admin";

/// The kind of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Insert,
    Update,
    Delete,
    Query,
    Admin,
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Insert => "insert",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
            CommandKind::Query => "query",
            CommandKind::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// The payload of one server operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    Query(QueryCommand),
    Admin(AdminCommand),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Insert(_) => CommandKind::Insert,
            Command::Update(_) => CommandKind::Update,
            Command::Delete(_) => CommandKind::Delete,
            Command::Query(_) => CommandKind::Query,
            Command::Admin(_) => CommandKind::Admin,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        match self {
            Command::Insert(command) => &command.namespace,
            Command::Update(command) => &command.namespace,
            Command::Delete(command) => &command.namespace,
            Command::Query(command) => &command.namespace,
            Command::Admin(command) => &command.namespace,
        }
    }
}

impl From<InsertCommand> for Command {
    fn from(command: InsertCommand) -> Self {
        Command::Insert(command)
    }
}

impl From<UpdateCommand> for Command {
    fn from(command: UpdateCommand) -> Self {
        Command::Update(command)
    }
}

impl From<DeleteCommand> for Command {
    fn from(command: DeleteCommand) -> Self {
        Command::Delete(command)
    }
}

impl From<QueryCommand> for Command {
    fn from(command: QueryCommand) -> Self {
        Command::Query(command)
    }
}

impl From<AdminCommand> for Command {
    fn from(command: AdminCommand) -> Self {
        Command::Admin(command)
    }
}

/// Inserts a batch of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub namespace: Namespace,
    pub documents: Vec<Document>,
    /// Continue with the rest of the batch when one document fails.
    pub keep_going: bool,
    pub serialize_functions: bool,
}

impl InsertCommand {
    /// Builds an insert, assigning `_id` to every document that lacks one.
    ///
    /// Identifiers are written into the caller's documents, so the caller
    /// sees exactly the identifiers that were sent. Passing `None` as the
    /// generator leaves identifier assignment to the server.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for an empty batch.
    pub fn build(
        namespace: Namespace,
        documents: &mut [Document],
        keep_going: bool,
        effective: &EffectiveOptions,
        generator: Option<&dyn IdGenerator>,
    ) -> CommandResult<Self> {
        if documents.is_empty() {
            return Err(CommandError::Validation("insert requires at least one document".into()));
        }

        if let Some(generator) = generator {
            for document in documents.iter_mut() {
                if !has_id(document) {
                    document.insert(ID_FIELD, generator.generate());
                }
            }
        }

        Ok(InsertCommand {
            namespace,
            documents: documents.to_vec(),
            keep_going,
            serialize_functions: effective.serialize_functions,
        })
    }
}

/// Updates the documents matching a selector.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub namespace: Namespace,
    pub selector: Body,
    pub update: Document,
    pub upsert: bool,
    /// Update every match instead of the first one.
    pub multi: bool,
    pub serialize_functions: bool,
}

impl UpdateCommand {
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a size-mismatched
    /// pre-encoded selector.
    pub fn build(
        namespace: Namespace,
        selector: Selector,
        update: Document,
        upsert: bool,
        multi: bool,
        effective: &EffectiveOptions,
    ) -> CommandResult<Self> {
        Ok(UpdateCommand {
            namespace,
            selector: selector.into_body()?,
            update,
            upsert,
            multi,
            serialize_functions: effective.serialize_functions,
        })
    }
}

/// Removes the documents matching a selector.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub namespace: Namespace,
    pub selector: Body,
}

impl DeleteCommand {
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a size-mismatched
    /// pre-encoded selector.
    pub fn build(namespace: Namespace, selector: Selector) -> CommandResult<Self> {
        Ok(DeleteCommand { namespace, selector: selector.into_body()? })
    }
}

/// A single-document command sent to a `<database>.$cmd` namespace.
///
/// The first key of the document names the command.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminCommand {
    pub namespace: Namespace,
    pub command: Document,
    pub slave_ok: bool,
    pub serialize_functions: bool,
}

impl AdminCommand {
    pub fn new(database: impl Into<String>, command: Document) -> Self {
        AdminCommand {
            namespace: Namespace::command(database),
            command,
            slave_ok: false,
            serialize_functions: false,
        }
    }

    pub fn with_slave_ok(mut self, slave_ok: bool) -> Self {
        self.slave_ok = slave_ok;
        self
    }

    pub fn with_serialize_functions(mut self, serialize_functions: bool) -> Self {
        self.serialize_functions = serialize_functions;
        self
    }

    /// The command name, i.e. the first key of the command document.
    pub fn name(&self) -> Option<&str> {
        self.command.keys().next().map(String::as_str)
    }

    /// The `getlasterror` command verifying a write on `database`, or `None`
    /// for unacknowledged writes.
    pub fn verification(database: &str, concern: &WriteConcern) -> Option<Self> {
        concern
            .verification_command()
            .map(|command| AdminCommand::new(database, command))
    }

    /// `{count: <collection>, query: <query>, fields: null}`
    pub fn count(namespace: &Namespace, query: Document, effective: &EffectiveOptions) -> Self {
        AdminCommand::new(
            namespace.database(),
            doc! {
                "count": namespace.collection(),
                "query": query,
                "fields": Bson::Null,
            },
        )
        .with_slave_ok(effective.slave_ok)
    }

    /// `{distinct: <collection>, key: <key>, query: <query>}`
    pub fn distinct(namespace: &Namespace, key: &str, query: Document, effective: &EffectiveOptions) -> Self {
        AdminCommand::new(
            namespace.database(),
            doc! {
                "distinct": namespace.collection(),
                "key": key,
                "query": query,
            },
        )
        .with_slave_ok(effective.slave_ok)
    }

    /// `{findandmodify: <collection>, query, sort, new, remove, upsert, fields?, update?}`
    ///
    /// `update` is left out when `remove` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a pre-encoded projection.
    pub fn find_and_modify(
        namespace: &Namespace,
        query: Document,
        update: Option<Document>,
        options: &FindAndModifyOptions,
        effective: &EffectiveOptions,
    ) -> CommandResult<Self> {
        let sort = options
            .sort
            .as_ref()
            .map(SortSpec::to_document)
            .unwrap_or_default();

        let mut command = doc! {
            "findandmodify": namespace.collection(),
            "query": query,
            "sort": sort,
            "new": options.new,
            "remove": options.remove,
            "upsert": options.upsert,
        };

        if let Some(fields) = options.fields.clone() {
            match fields.into_body()? {
                Body::Document(fields) => {
                    command.insert("fields", fields);
                }
                Body::Encoded(_) => {
                    return Err(CommandError::Validation(
                        "find-and-modify fields must be a document or a field list".into(),
                    ));
                }
            }
        }

        if let Some(update) = update {
            if !options.remove {
                command.insert("update", update);
            }
        }

        Ok(AdminCommand::new(namespace.database(), command)
            .with_serialize_functions(effective.serialize_functions))
    }

    /// `{drop: <collection>}`
    pub fn drop(namespace: &Namespace) -> Self {
        AdminCommand::new(namespace.database(), doc! { "drop": namespace.collection() })
    }

    /// `{deleteIndexes: <collection>, index: <name>}`; `"*"` drops every index.
    pub fn delete_indexes(namespace: &Namespace, index: &str) -> Self {
        AdminCommand::new(
            namespace.database(),
            doc! { "deleteIndexes": namespace.collection(), "index": index },
        )
    }

    /// `{renameCollection: "<db>.<from>", to: "<db>.<to>"}`, sent to `admin.$cmd`.
    pub fn rename(from: &Namespace, to: &Namespace) -> Self {
        AdminCommand::new(
            ADMIN_DATABASE,
            doc! { "renameCollection": from.to_string(), "to": to.to_string() },
        )
    }
}

/// Per-call options of an insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOptions {
    pub options: OptionSet,
    pub keep_going: bool,
}

impl InsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: OptionSet) -> Self {
        self.options = options;
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }
}

impl From<OptionSet> for InsertOptions {
    fn from(options: OptionSet) -> Self {
        InsertOptions { options, keep_going: false }
    }
}

/// Per-call options of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub options: OptionSet,
    pub upsert: bool,
    pub multi: bool,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: OptionSet) -> Self {
        self.options = options;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }
}

impl From<OptionSet> for UpdateOptions {
    fn from(options: OptionSet) -> Self {
        UpdateOptions { options, ..Default::default() }
    }
}

/// Per-call options of a find-and-modify.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifyOptions {
    pub options: OptionSet,
    pub sort: Option<SortSpec>,
    /// Return the modified document instead of the original.
    pub new: bool,
    pub remove: bool,
    pub upsert: bool,
    pub fields: Option<Projection>,
}

impl FindAndModifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: OptionSet) -> Self {
        self.options = options;
        self
    }

    pub fn sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn return_new(mut self, new: bool) -> Self {
        self.new = new;
        self
    }

    pub fn remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn fields(mut self, fields: impl Into<Projection>) -> Self {
        self.fields = Some(fields.into());
        self
    }
}
