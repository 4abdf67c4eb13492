//! Database/collection namespaces and collection-name validation.

use std::fmt::{self, Display};

use crate::error::{CommandError, CommandResult};

/// Pseudo-collection that receives admin commands.
pub const COMMAND_COLLECTION: &str = "$cmd";

const OPLOG_COLLECTION: &str = "oplog.$main";

/// A fully qualified `database.collection` target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace after validating the collection name.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] if the name is rejected by
    /// [`validate_collection_name`].
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> CommandResult<Self> {
        let collection = collection.into();
        validate_collection_name(&collection)?;

        Ok(Self { database: database.into(), collection })
    }

    /// The command namespace (`<database>.$cmd`) of a database.
    pub fn command(database: impl Into<String>) -> Self {
        Self { database: database.into(), collection: COMMAND_COLLECTION.to_string() }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The command namespace of this namespace's database.
    pub fn command_namespace(&self) -> Namespace {
        Namespace::command(self.database.clone())
    }

    /// Returns `true` for `<database>.$cmd`.
    pub fn is_command(&self) -> bool {
        self.collection == COMMAND_COLLECTION
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Checks a collection name.
///
/// A valid name is non-empty, has no `..`, does not start or end with `.`,
/// and contains `$` only in the `$cmd` and `oplog.$main` system collections.
///
/// # Errors
///
/// Returns [`CommandError::Validation`] describing the first violated rule.
pub fn validate_collection_name(name: &str) -> CommandResult<()> {
    if name.is_empty() {
        return Err(CommandError::Validation("collection names cannot be empty".into()));
    }

    if name.contains("..") {
        return Err(CommandError::Validation(format!(
            "collection name {:?} must not contain '..'",
            name
        )));
    }

    if name.contains('$') && !name.starts_with(COMMAND_COLLECTION) && !name.contains(OPLOG_COLLECTION) {
        return Err(CommandError::Validation(format!(
            "collection name {:?} must not contain '$'",
            name
        )));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(CommandError::Validation(format!(
            "collection name {:?} must not start or end with '.'",
            name
        )));
    }

    Ok(())
}

/// Checks a database name: non-empty and free of spaces, `.`, `$`, `/`
/// and `\`.
///
/// # Errors
///
/// Returns [`CommandError::Validation`] naming the offending character.
pub fn validate_database_name(name: &str) -> CommandResult<()> {
    if name.is_empty() {
        return Err(CommandError::Validation("database names cannot be empty".into()));
    }

    if let Some(c) = name.chars().find(|c| matches!(c, ' ' | '.' | '$' | '/' | '\\')) {
        return Err(CommandError::Validation(format!(
            "database name {:?} must not contain {:?}",
            name, c
        )));
    }

    Ok(())
}
