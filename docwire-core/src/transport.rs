//! Transport abstraction the command layer dispatches through.
//!
//! The command layer builds [`Command`] values and hands them to a
//! [`Transport`]. Framing, serialization, connection pooling and server
//! selection all live behind this trait.
//!
//! # Traits
//!
//! - [`Transport`]: dispatches single commands and verified pairs
//! - [`TransportBuilder`]: factory trait for creating transport instances
//!
//! # Examples
//!
//! ```ignore
//! use docwire_core::{command::AdminCommand, transport::Transport};
//! use bson::doc;
//!
//! let transport = MyTransport::connect("localhost:27017").await?;
//! let reply = transport
//!     .dispatch(AdminCommand::new("app", doc! { "ping": 1 }).into())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt::Debug, sync::Arc};

use crate::{command::Command, error::CommandResult};

/// The documents a transport received in response to a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Response documents in arrival order. For a paired dispatch the
    /// verification response is last.
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn new(documents: Vec<Document>) -> Self {
        Reply { documents }
    }

    /// A reply without documents, as produced by fire-and-forget writes.
    pub fn empty() -> Self {
        Reply::default()
    }

    pub fn first(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn last(&self) -> Option<&Document> {
        self.documents.last()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }
}

/// Abstract interface to a server connection.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and support concurrent dispatch from
/// multiple async tasks.
///
/// # Pairing
///
/// [`Transport::dispatch_paired`] must run both commands on one connection,
/// back to back, with no other command in between. Verification commands
/// report on the last operation of their connection, so a verification that
/// lands on another connection reports on the wrong write.
///
/// # Error Handling
///
/// Delivery failures are reported as
/// [`CommandError::Transport`](crate::error::CommandError::Transport). Server
/// errors travel inside the reply documents; the command layer interprets
/// them.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Sends one command and returns its response documents.
    ///
    /// Fire-and-forget writes produce an empty reply.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to send
    async fn dispatch(&self, command: Command) -> CommandResult<Reply>;

    /// Sends `primary` immediately followed by `verification` on the same
    /// connection.
    ///
    /// # Arguments
    ///
    /// * `primary` - The command being verified
    /// * `verification` - The verification command, usually `getlasterror`
    ///
    /// # Returns
    ///
    /// The primary's response documents followed by the verification
    /// response.
    async fn dispatch_paired(&self, primary: Command, verification: Command) -> CommandResult<Reply>;

    /// Cleanly shuts down the transport, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> CommandResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<T> Transport for &T
where
    T: Transport,
{
    async fn dispatch(&self, command: Command) -> CommandResult<Reply> {
        (**self).dispatch(command).await
    }

    async fn dispatch_paired(&self, primary: Command, verification: Command) -> CommandResult<Reply> {
        (**self)
            .dispatch_paired(primary, verification)
            .await
    }
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn dispatch(&self, command: Command) -> CommandResult<Reply> {
        (**self).dispatch(command).await
    }

    async fn dispatch_paired(&self, primary: Command, verification: Command) -> CommandResult<Reply> {
        (**self)
            .dispatch_paired(primary, verification)
            .await
    }
}

/// Factory trait for creating transport instances.
///
/// Implement this for configuration types that need async setup, such as
/// opening connections.
#[async_trait]
pub trait TransportBuilder {
    /// The type of transport this builder produces.
    type Transport: Transport;

    /// Builds and initializes the transport.
    async fn build(self) -> CommandResult<Self::Transport>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bson::doc;

    use super::*;
    use crate::command::AdminCommand;

    #[derive(Debug, Default)]
    struct Recording {
        sent: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn dispatch(&self, command: Command) -> CommandResult<Reply> {
            self.sent.lock().unwrap().push(command);
            Ok(Reply::new(vec![doc! { "ok": 1.0 }]))
        }

        async fn dispatch_paired(&self, primary: Command, verification: Command) -> CommandResult<Reply> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(primary);
            sent.push(verification);
            Ok(Reply::new(vec![doc! { "ok": 1.0 }, doc! { "err": null, "n": 1 }]))
        }
    }

    fn ping() -> Command {
        AdminCommand::new("app", doc! { "ping": 1 }).into()
    }

    async fn send<T: Transport>(transport: T) -> CommandResult<Reply> {
        transport.dispatch(ping()).await
    }

    #[tokio::test]
    async fn references_and_arcs_forward_to_the_transport() {
        let transport = Arc::new(Recording::default());

        send(&*transport).await.unwrap();
        let reply = transport.dispatch_paired(ping(), ping()).await.unwrap();

        assert_eq!(reply.last(), Some(&doc! { "err": null, "n": 1 }));
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
        assert!(Arc::clone(&transport).shutdown().await.is_ok());
    }

    #[test]
    fn empty_replies_have_no_documents() {
        let reply = Reply::empty();

        assert!(reply.is_empty());
        assert_eq!(reply.first(), None);
        assert!(reply.into_documents().is_empty());
    }
}
