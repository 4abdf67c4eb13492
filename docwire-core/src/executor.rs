//! The write-concern protocol.
//!
//! A write either goes out alone (unacknowledged) or is paired with a
//! verification command that the transport runs on the same connection. The
//! executor walks each call through [`WriteState`] and turns the replies into
//! a [`WriteOutcome`] or a [`CommandError`].

use std::fmt::{self, Display};

use bson::{Bson, Document};

use crate::{
    command::{AdminCommand, Command},
    error::{CommandError, CommandResult},
    options::WriteConcern,
    transport::{Reply, Transport},
};

/// Where a call is in the write-concern protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Building,
    Dispatched,
    AwaitingVerification,
    Resolved,
}

impl Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteState::Building => "building",
            WriteState::Dispatched => "dispatched",
            WriteState::AwaitingVerification => "awaiting-verification",
            WriteState::Resolved => "resolved",
        };
        f.write_str(name)
    }
}

/// The result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Sent without verification. Only local failures were reported.
    Unacknowledged,
    /// Verified by the server.
    Acknowledged {
        /// Documents written: the batch size for inserts, the server's `n`
        /// for updates and removes.
        affected: u64,
    },
}

impl WriteOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, WriteOutcome::Acknowledged { .. })
    }

    /// The affected count, if the write was verified.
    pub fn affected(&self) -> Option<u64> {
        match self {
            WriteOutcome::Unacknowledged => None,
            WriteOutcome::Acknowledged { affected } => Some(*affected),
        }
    }
}

/// A dispatched command and what came back.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Sent alone.
    Unverified(Reply),
    /// Sent with a verification command that reported no error.
    Verified {
        /// The primary command's response documents.
        reply: Reply,
        /// The verification response.
        verification: Document,
    },
}

impl Execution {
    /// The primary command's response documents.
    pub fn reply(&self) -> &Reply {
        match self {
            Execution::Unverified(reply) => reply,
            Execution::Verified { reply, .. } => reply,
        }
    }
}

/// Runs commands under a write concern.
#[derive(Debug)]
pub struct WriteConcernExecutor<'a, T: Transport> {
    transport: &'a T,
}

impl<'a, T: Transport> WriteConcernExecutor<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Dispatches `command`, paired with a verification command when the
    /// concern asks for one.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Transport`] from the transport, passed through as-is
    /// - [`CommandError::Server`] when the verification reply carries `err`
    pub async fn execute(&self, command: Command, concern: &WriteConcern) -> CommandResult<Execution> {
        let kind = command.kind();
        let namespace = command.namespace().clone();
        tracing::trace!(state = %WriteState::Building, %kind, %namespace, "write state changed");

        let Some(verification) = AdminCommand::verification(namespace.database(), concern) else {
            tracing::debug!(%kind, %namespace, "dispatching command");
            let reply = self.transport.dispatch(command).await?;
            tracing::trace!(state = %WriteState::Dispatched, %kind, %namespace, "write state changed");
            tracing::trace!(state = %WriteState::Resolved, %kind, %namespace, verified = false, "write state changed");
            return Ok(Execution::Unverified(reply));
        };

        tracing::debug!(%kind, %namespace, "dispatching verified command");
        tracing::trace!(state = %WriteState::AwaitingVerification, %kind, %namespace, "write state changed");
        let mut reply = self
            .transport
            .dispatch_paired(command, verification.into())
            .await?;

        let verification = reply
            .documents
            .pop()
            .ok_or_else(|| CommandError::Transport("paired dispatch returned no verification reply".into()))?;
        check_last_error(&verification)?;

        tracing::trace!(state = %WriteState::Resolved, %kind, %namespace, verified = true, "write state changed");
        Ok(Execution::Verified { reply, verification })
    }

    /// Dispatches a write and reports its outcome.
    ///
    /// # Errors
    ///
    /// See [`WriteConcernExecutor::execute`].
    pub async fn write(&self, command: Command, concern: &WriteConcern) -> CommandResult<WriteOutcome> {
        let batch = match &command {
            Command::Insert(insert) => Some(insert.documents.len() as u64),
            _ => None,
        };

        match self.execute(command, concern).await? {
            Execution::Unverified(_) => Ok(WriteOutcome::Unacknowledged),
            Execution::Verified { verification, .. } => {
                let affected = batch.unwrap_or_else(|| {
                    number_field(&verification, "n")
                        .map(|n| n.max(0) as u64)
                        .unwrap_or(0)
                });
                Ok(WriteOutcome::Acknowledged { affected })
            }
        }
    }

    /// Dispatches a command whose answer is read from its reply.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Transport`] from the transport, or
    /// [`CommandError::Server`] if the reply is empty or reports failure.
    pub async fn command(&self, command: AdminCommand) -> CommandResult<Document> {
        let reply = self.transport.dispatch(command.into()).await?;
        let document = first_document(&reply)?.clone();
        check_command(&document)?;
        Ok(document)
    }
}

/// Reads a numeric field as an integer.
pub fn number_field(document: &Document, key: &str) -> Option<i64> {
    match document.get(key)? {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) => Some(*d as i64),
        _ => None,
    }
}

fn code_field(document: &Document) -> Option<i32> {
    number_field(document, "code").map(|code| code as i32)
}

fn message_of(value: &Bson) -> String {
    match value {
        Bson::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// The first response document.
///
/// # Errors
///
/// Returns [`CommandError::Server`] for an empty reply.
pub fn first_document(reply: &Reply) -> CommandResult<&Document> {
    reply
        .first()
        .ok_or_else(|| CommandError::server("empty reply from server"))
}

/// Fails if a `getlasterror` reply carries a non-null `err`.
///
/// # Errors
///
/// Returns [`CommandError::Server`] with the reply's `err` and `code`.
pub fn check_last_error(document: &Document) -> CommandResult<()> {
    match document.get("err") {
        None | Some(Bson::Null) => Ok(()),
        Some(err) => Err(CommandError::Server { message: message_of(err), code: code_field(document) }),
    }
}

/// Returns `true` if a command reply reports success.
pub fn is_ok(document: &Document) -> bool {
    match document.get("ok") {
        Some(Bson::Boolean(ok)) => *ok,
        Some(_) => number_field(document, "ok") == Some(1),
        None => !document.contains_key("errmsg") && !document.contains_key("$err"),
    }
}

/// Fails if a command or query reply reports an error through `$err` or
/// `ok`/`errmsg`.
///
/// # Errors
///
/// Returns [`CommandError::Server`] with the reported message and code.
pub fn check_command(document: &Document) -> CommandResult<()> {
    if let Some(err) = document.get("$err") {
        return Err(CommandError::Server { message: message_of(err), code: code_field(document) });
    }

    if is_ok(document) {
        return Ok(());
    }

    let message = document
        .get("errmsg")
        .map(message_of)
        .unwrap_or_else(|| "command failed".to_string());
    Err(CommandError::Server { message, code: code_field(document) })
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn last_error_checks() {
        assert!(check_last_error(&doc! { "ok": 1, "err": Bson::Null, "n": 0 }).is_ok());
        assert!(check_last_error(&doc! { "ok": 1 }).is_ok());
        assert_eq!(
            check_last_error(&doc! { "ok": 1, "err": "E11000 duplicate key", "code": 11000 }),
            Err(CommandError::Server { message: "E11000 duplicate key".into(), code: Some(11000) }),
        );
    }

    #[test]
    fn command_checks() {
        assert!(check_command(&doc! { "ok": 1.0, "n": 3 }).is_ok());
        assert!(check_command(&doc! { "ok": true }).is_ok());
        assert_eq!(
            check_command(&doc! { "ok": 0, "errmsg": "ns not found" }),
            Err(CommandError::server("ns not found")),
        );
        assert_eq!(
            check_command(&doc! { "$err": "bad query", "code": 2 }),
            Err(CommandError::Server { message: "bad query".into(), code: Some(2) }),
        );
    }

    #[test]
    fn numbers_of_any_width() {
        let document = doc! { "a": 1, "b": 2_i64, "c": 3.0, "d": "4" };

        assert_eq!(number_field(&document, "a"), Some(1));
        assert_eq!(number_field(&document, "b"), Some(2));
        assert_eq!(number_field(&document, "c"), Some(3));
        assert_eq!(number_field(&document, "d"), None);
        assert_eq!(number_field(&document, "e"), None);
    }

    #[test]
    fn outcome_accessors() {
        assert_eq!(WriteOutcome::Unacknowledged.affected(), None);
        assert_eq!(WriteOutcome::Acknowledged { affected: 2 }.affected(), Some(2));
        assert!(!WriteOutcome::Unacknowledged.is_acknowledged());
    }
}
