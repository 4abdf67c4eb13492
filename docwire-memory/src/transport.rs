//! In-memory transport implementation.
//!
//! [`MemoryTransport`] answers commands from an emulated single server kept
//! behind an async-aware lock, so the command layer can be exercised end to
//! end without a network.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use mea::rwlock::RwLock;

use docwire_core::{
    command::Command,
    error::CommandResult,
    transport::{Reply, Transport, TransportBuilder},
};

use crate::server::{CommandHandler, ServerState};

/// Thread-safe in-memory transport.
///
/// # Thread Safety
///
/// `MemoryTransport` is cloneable and uses an `Arc`-wrapped internal state.
/// Clones share the same emulated server, so a test can keep one clone for
/// inspection while a connection owns another.
///
/// # Pairing
///
/// A paired dispatch holds the server lock across both commands, so no other
/// task's write can land between a write and its `getlasterror`.
///
/// # Example
///
/// ```ignore
/// use docwire_core::connection::Connection;
/// use docwire_memory::MemoryTransport;
///
/// let transport = MemoryTransport::new();
/// let connection = Connection::new(transport.clone(), "app")?;
///
/// connection.collection("users")?.insert_one(&mut doc! { "name": "Alice" }, OptionSet::new()).await?;
/// assert_eq!(transport.documents("app.users").await.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryTransport {
    state: Arc<RwLock<ServerState>>,
}

impl MemoryTransport {
    /// Creates a transport in front of an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new builder.
    pub fn builder() -> MemoryTransportBuilder {
        MemoryTransportBuilder::default()
    }

    /// Every command received so far, in arrival order.
    pub async fn commands(&self) -> Vec<Command> {
        self.state.read().await.log.clone()
    }

    /// Forgets the received-command log.
    pub async fn clear_commands(&self) {
        self.state.write().await.log.clear();
    }

    /// The documents stored under a full namespace such as `"app.users"`.
    pub async fn documents(&self, namespace: &str) -> Vec<Document> {
        self.state
            .read()
            .await
            .collections
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next dispatched command fail with a transport error.
    ///
    /// Queued failures are consumed one per command, in order. The failing
    /// command is still logged but has no effect on the server.
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state
            .write()
            .await
            .failures
            .push_back(message.into());
    }

    /// Answers every admin command named `name` with `handler`, taking
    /// precedence over the built-in commands.
    ///
    /// The emulator has no script engine, so `group`, `mapreduce` and
    /// `$eval` fail unless a handler answers them.
    pub async fn register_command(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&Document) -> Document + Send + Sync + 'static,
    ) {
        self.state
            .write()
            .await
            .handlers
            .insert(name.into(), CommandHandler::new(handler));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dispatch(&self, command: Command) -> CommandResult<Reply> {
        let mut state = self.state.write().await;
        state.execute(command)
    }

    async fn dispatch_paired(&self, primary: Command, verification: Command) -> CommandResult<Reply> {
        let mut state = self.state.write().await;

        let mut reply = state.execute(primary)?;
        let verification = state.execute(verification)?;

        reply
            .documents
            .extend(verification.into_documents());
        Ok(reply)
    }
}

/// Builder for constructing [`MemoryTransport`] instances.
///
/// # Example
///
/// ```ignore
/// use docwire_memory::MemoryTransport;
/// use docwire_core::transport::TransportBuilder;
///
/// let transport = MemoryTransport::builder()
///     .collection("app.users", vec![doc! { "_id": 1, "name": "Alice" }])
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransportBuilder {
    collections: Vec<(String, Vec<Document>)>,
}

impl MemoryTransportBuilder {
    /// Seeds a namespace with documents. Documents are stored as given.
    pub fn collection(mut self, namespace: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections
            .push((namespace.into(), documents));
        self
    }
}

#[async_trait]
impl TransportBuilder for MemoryTransportBuilder {
    type Transport = MemoryTransport;

    /// Builds a transport whose server holds the seeded collections.
    async fn build(self) -> CommandResult<Self::Transport> {
        let transport = MemoryTransport::new();
        {
            let mut state = transport.state.write().await;
            for (namespace, documents) in self.collections {
                state
                    .collections
                    .entry(namespace)
                    .or_default()
                    .extend(documents);
            }
        }
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use bson::{Bson, doc};

    use docwire_core::{
        command::{AdminCommand, DeleteCommand, InsertCommand, UpdateCommand},
        document::Selector,
        error::CommandError,
        namespace::Namespace,
        options::EffectiveOptions,
        query::{FindOptions, QueryCommand},
    };

    use super::*;

    fn users() -> Namespace {
        Namespace::new("app", "users").unwrap()
    }

    fn insert(documents: Vec<Document>) -> Command {
        let mut documents = documents;
        InsertCommand::build(users(), &mut documents, false, &EffectiveOptions::default(), None)
            .unwrap()
            .into()
    }

    fn last_error() -> Command {
        AdminCommand::new("app", doc! { "getlasterror": 1 }).into()
    }

    async fn query(transport: &MemoryTransport, selector: Document, options: FindOptions) -> Reply {
        let command = QueryCommand::build(users(), selector.into(), None, options, &EffectiveOptions::default()).unwrap();
        transport.dispatch(command.into()).await.unwrap()
    }

    #[tokio::test]
    async fn paired_insert_reports_duplicates() {
        let transport = MemoryTransport::new();

        let reply = transport
            .dispatch_paired(insert(vec![doc! { "_id": 1 }]), last_error())
            .await
            .unwrap();
        assert_eq!(reply.documents, vec![doc! { "err": Bson::Null, "n": 0_i64, "ok": 1.0 }]);

        let reply = transport
            .dispatch_paired(insert(vec![doc! { "_id": 1 }]), last_error())
            .await
            .unwrap();
        let verification = reply.last().unwrap();
        assert_eq!(verification.get_i32("code").unwrap(), 11000);
        assert!(verification.get_str("err").unwrap().starts_with("E11000"));
    }

    #[tokio::test]
    async fn server_assigns_missing_ids() {
        let transport = MemoryTransport::new();
        transport.dispatch(insert(vec![doc! { "a": 1 }])).await.unwrap();

        let stored = transport.documents("app.users").await;
        assert!(stored[0].get_object_id("_id").is_ok());
    }

    #[tokio::test]
    async fn updates_and_deletes_record_counts() {
        let transport = MemoryTransport::builder()
            .collection("app.users", vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": 1 }])
            .build()
            .await
            .unwrap();

        let update = UpdateCommand::build(
            users(),
            Selector::from(doc! { "n": 1 }),
            doc! { "$inc": { "n": 1 } },
            false,
            true,
            &EffectiveOptions::default(),
        )
        .unwrap();
        let reply = transport
            .dispatch_paired(update.into(), last_error())
            .await
            .unwrap();
        assert_eq!(reply.last().unwrap().get_i64("n").unwrap(), 2);
        assert!(reply.last().unwrap().get_bool("updatedExisting").unwrap());

        let delete = DeleteCommand::build(users(), Selector::from(doc! { "_id": 1 })).unwrap();
        let reply = transport
            .dispatch_paired(delete.into(), last_error())
            .await
            .unwrap();
        assert_eq!(reply.last().unwrap().get_i64("n").unwrap(), 1);
        assert_eq!(transport.documents("app.users").await, vec![doc! { "_id": 2, "n": 2 }]);
    }

    #[tokio::test]
    async fn queries_sort_skip_and_limit() {
        let transport = MemoryTransport::builder()
            .collection("app.users", (1..=5).map(|n| doc! { "_id": n, "n": n }).collect())
            .build()
            .await
            .unwrap();

        let options = FindOptions::builder()
            .sort(doc! { "n": -1 })
            .skip(1)
            .limit(2)
            .build();
        let reply = query(&transport, doc! { "n": { "$gt": 1 } }, options).await;

        assert_eq!(reply.documents, vec![doc! { "_id": 4, "n": 4 }, doc! { "_id": 3, "n": 3 }]);
    }

    #[tokio::test]
    async fn bad_queries_answer_with_err() {
        let transport = MemoryTransport::new();
        let reply = query(&transport, doc! { "a": { "$where": "1" } }, FindOptions::default()).await;

        assert!(reply.first().unwrap().contains_key("$err"));
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let transport = MemoryTransport::new();
        transport.fail_next("connection reset").await;

        let err = transport.dispatch(last_error()).await.unwrap_err();
        assert_eq!(err, CommandError::Transport("connection reset".into()));
        assert!(transport.dispatch(last_error()).await.is_ok());
        assert_eq!(transport.commands().await.len(), 2);
    }

    #[tokio::test]
    async fn handlers_answer_unknown_commands() {
        let transport = MemoryTransport::new();
        let eval = || Command::from(AdminCommand::new("app", doc! { "$eval": "1" }));

        let reply = transport.dispatch(eval()).await.unwrap();
        assert_eq!(reply.first().unwrap().get_f64("ok").unwrap(), 0.0);

        transport
            .register_command("$eval", |_| doc! { "ok": 1.0, "retval": 1 })
            .await;
        let reply = transport.dispatch(eval()).await.unwrap();
        assert_eq!(reply.first().unwrap(), &doc! { "ok": 1.0, "retval": 1 });
    }
}
