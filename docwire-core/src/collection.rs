//! The collection API.
//!
//! A [`Collection`] ties together the pieces of the command layer: it
//! resolves options against its own and the connection's defaults, builds
//! commands, assigns identifiers and runs writes through the
//! write-concern executor.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docwire_core::{command::UpdateOptions, options::OptionSet, query::FindOptions};
//!
//! let users = connection.collection("users")?;
//!
//! let mut alice = doc! { "name": "Alice" };
//! users.insert_one(&mut alice, OptionSet::new().safe(true)).await?;
//! // `alice` now carries the `_id` that was sent.
//!
//! let outcome = users
//!     .update(doc! { "name": "Alice" }, doc! { "$set": { "active": true } }, UpdateOptions::new())
//!     .await?;
//!
//! let found = users.find_one(doc! { "name": "Alice" }, FindOptions::default()).await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::{
    args::{FindArg, FindCall, disambiguate},
    command::{
        AdminCommand, DeleteCommand, FindAndModifyOptions, InsertCommand, InsertOptions, UpdateCommand,
        UpdateOptions,
    },
    connection::Connection,
    document::{ID_FIELD, Projection, Selector},
    error::{CommandError, CommandResult},
    executor::{WriteConcernExecutor, WriteOutcome, check_command, first_document, number_field},
    group::{
        GroupMode, GroupSpec, MapReduceOptions, MapReduceOutput, Script, eval_command, group_result,
        map_reduce_command, map_reduce_result, scripted_group_result,
    },
    id::IdGenerator,
    namespace::Namespace,
    options::{EffectiveOptions, OptionSet, resolve},
    query::{FindOptions, QueryCommand},
    transport::Transport,
};

/// Error message of a find-and-modify that matched nothing on older servers.
const NO_MATCHING_OBJECT: &str = "No matching object found";

/// A collection bound to a connection.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the connection reference
/// * `T` - The transport implementation type
#[derive(Debug)]
pub struct Collection<'a, T: Transport> {
    namespace: Namespace,
    connection: &'a Connection<T>,
    defaults: OptionSet,
    id_generator: Arc<dyn IdGenerator>,
}

impl<'a, T: Transport> Collection<'a, T> {
    pub(crate) fn new(
        namespace: Namespace,
        connection: &'a Connection<T>,
        defaults: OptionSet,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { namespace, connection, defaults, id_generator }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.namespace.collection()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The collection-level defaults.
    pub fn defaults(&self) -> &OptionSet {
        &self.defaults
    }

    /// Resolves per-call options against this collection's and the
    /// connection's defaults.
    pub fn effective_options(&self, call: &OptionSet) -> EffectiveOptions {
        resolve(call, &self.defaults, &self.connection.options().defaults)
    }

    fn executor(&self) -> WriteConcernExecutor<'a, T> {
        self.connection.executor()
    }

    fn generator(&self) -> Option<&dyn IdGenerator> {
        if self.connection.options().force_server_object_id {
            None
        } else {
            Some(self.id_generator.as_ref())
        }
    }

    /// Inserts a batch of documents.
    ///
    /// Documents without `_id` get one from the collection's generator,
    /// written into the caller's documents before dispatch.
    ///
    /// # Arguments
    ///
    /// * `documents` - The documents to insert
    /// * `options` - Per-call options and the keep-going flag
    ///
    /// # Errors
    ///
    /// - [`CommandError::Validation`] for an empty batch
    /// - [`CommandError::Server`] if a verified insert failed
    /// - [`CommandError::Transport`] if the transport failed
    pub async fn insert(
        &self,
        documents: &mut [Document],
        options: impl Into<InsertOptions>,
    ) -> CommandResult<WriteOutcome> {
        let options = options.into();
        let effective = self.effective_options(&options.options);
        let command = InsertCommand::build(
            self.namespace.clone(),
            documents,
            options.keep_going,
            &effective,
            self.generator(),
        )?;

        self.executor()
            .write(command.into(), &effective.write_concern)
            .await
    }

    /// Inserts one document. See [`Collection::insert`].
    pub async fn insert_one(
        &self,
        document: &mut Document,
        options: impl Into<InsertOptions>,
    ) -> CommandResult<WriteOutcome> {
        self.insert(std::slice::from_mut(document), options)
            .await
    }

    /// Updates the documents matching `selector`.
    ///
    /// Only the first match is updated unless `multi` is set.
    ///
    /// # Arguments
    ///
    /// * `selector` - Which documents to update
    /// * `update` - A modifier document or a replacement document
    /// * `options` - Per-call options, `upsert` and `multi`
    ///
    /// # Errors
    ///
    /// - [`CommandError::Server`] if a verified update failed
    /// - [`CommandError::Transport`] if the transport failed
    pub async fn update(
        &self,
        selector: impl Into<Selector>,
        update: Document,
        options: impl Into<UpdateOptions>,
    ) -> CommandResult<WriteOutcome> {
        let options = options.into();
        let effective = self.effective_options(&options.options);
        let command = UpdateCommand::build(
            self.namespace.clone(),
            selector.into(),
            update,
            options.upsert,
            options.multi,
            &effective,
        )?;

        self.executor()
            .write(command.into(), &effective.write_concern)
            .await
    }

    /// Removes the documents matching `selector`; [`Selector::all`] empties
    /// the collection.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Server`] if a verified remove failed
    /// - [`CommandError::Transport`] if the transport failed
    pub async fn remove(&self, selector: impl Into<Selector>, options: OptionSet) -> CommandResult<WriteOutcome> {
        let effective = self.effective_options(&options);
        let command = DeleteCommand::build(self.namespace.clone(), selector.into())?;

        self.executor()
            .write(command.into(), &effective.write_concern)
            .await
    }

    /// Upserts a document by its `_id`, or inserts it if it has none.
    ///
    /// # Errors
    ///
    /// See [`Collection::insert`] and [`Collection::update`].
    pub async fn save(&self, document: &mut Document, options: OptionSet) -> CommandResult<WriteOutcome> {
        match document.get(ID_FIELD).cloned() {
            Some(id) if id != Bson::Null => {
                self.update(
                    doc! { ID_FIELD: id },
                    document.clone(),
                    UpdateOptions::from(options).upsert(true),
                )
                .await
            }
            _ => self.insert_one(document, options).await,
        }
    }

    fn build_query(&self, call: FindCall) -> CommandResult<QueryCommand> {
        let effective = self.effective_options(&call.options.options);
        QueryCommand::build(self.namespace.clone(), call.selector, call.projection, call.options, &effective)
    }

    /// Builds the initial query of a find.
    ///
    /// Paging through the results with get-more is the transport's job.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for malformed pre-encoded
    /// documents or modifiers on a pre-encoded selector.
    pub fn find(&self, selector: impl Into<Selector>, options: FindOptions) -> CommandResult<QueryCommand> {
        self.build_query(FindCall { selector: selector.into(), projection: None, options })
    }

    /// Like [`Collection::find`] with an explicit projection.
    pub fn find_fields(
        &self,
        selector: impl Into<Selector>,
        projection: impl Into<Projection>,
        options: FindOptions,
    ) -> CommandResult<QueryCommand> {
        self.build_query(FindCall {
            selector: selector.into(),
            projection: Some(projection.into()),
            options,
        })
    }

    /// Legacy positional find. See [`crate::args`] for the accepted shapes.
    ///
    /// When the arguments include a handler, the result (including
    /// validation errors) goes to the handler and `None` is returned.
    pub fn find_compat(&self, args: Vec<FindArg<QueryCommand>>) -> Option<CommandResult<QueryCommand>> {
        let (handler, call) = disambiguate(args);
        let result = call.and_then(|call| self.build_query(call));

        match handler {
            Some(handler) => {
                handler(result);
                None
            }
            None => Some(result),
        }
    }

    /// Dispatches a query and returns its first batch.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the reply carries `$err`.
    pub async fn fetch(&self, query: QueryCommand) -> CommandResult<Vec<Document>> {
        tracing::debug!(namespace = %query.namespace, "dispatching query");
        let reply = self
            .connection
            .transport()
            .dispatch(query.into())
            .await?;

        if let Some(first) = reply.first() {
            if first.contains_key("$err") {
                check_command(first)?;
            }
        }

        Ok(reply.into_documents())
    }

    /// Runs a find and returns the first batch.
    ///
    /// # Errors
    ///
    /// See [`Collection::find`] and [`Collection::fetch`].
    pub async fn find_documents(
        &self,
        selector: impl Into<Selector>,
        options: FindOptions,
    ) -> CommandResult<Vec<Document>> {
        let query = self.find(selector, options)?;
        self.fetch(query).await
    }

    async fn find_one_call(&self, mut call: FindCall) -> CommandResult<Option<Document>> {
        call.options.limit = Some(1);
        let query = self.build_query(call)?;

        Ok(self.fetch(query).await?.into_iter().next())
    }

    /// Returns the first matching document.
    ///
    /// # Errors
    ///
    /// See [`Collection::find_documents`].
    pub async fn find_one(
        &self,
        selector: impl Into<Selector>,
        options: FindOptions,
    ) -> CommandResult<Option<Document>> {
        self.find_one_call(FindCall { selector: selector.into(), projection: None, options })
            .await
    }

    /// Legacy positional findOne. See [`Collection::find_compat`].
    pub async fn find_one_compat(
        &self,
        args: Vec<FindArg<Option<Document>>>,
    ) -> Option<CommandResult<Option<Document>>> {
        let (handler, call) = disambiguate(args);
        let result = match call {
            Ok(call) => self.find_one_call(call).await,
            Err(err) => Err(err),
        };

        match handler {
            Some(handler) => {
                handler(result);
                None
            }
            None => Some(result),
        }
    }

    /// Atomically modifies (or removes) one document and returns it.
    ///
    /// Returns the original document, or the modified one with
    /// [`FindAndModifyOptions::return_new`]. A query that matches nothing,
    /// without upsert, resolves to `Ok(None)`.
    ///
    /// # Arguments
    ///
    /// * `query` - Which document to modify
    /// * `update` - The modification; ignored when removing
    /// * `options` - Per-call options, sort, new, remove, upsert and fields
    ///
    /// # Errors
    ///
    /// - [`CommandError::Server`] if the command or its verification failed
    /// - [`CommandError::Transport`] if the transport failed
    pub async fn find_and_modify(
        &self,
        query: Document,
        update: Option<Document>,
        options: FindAndModifyOptions,
    ) -> CommandResult<Option<Document>> {
        let effective = self.effective_options(&options.options);
        let command = AdminCommand::find_and_modify(&self.namespace, query, update, &options, &effective)?;

        let execution = self
            .executor()
            .execute(command.into(), &effective.write_concern)
            .await?;

        find_and_modify_value(first_document(execution.reply())?)
    }

    /// Removes one document and returns it.
    pub async fn find_and_remove(
        &self,
        query: Document,
        options: FindAndModifyOptions,
    ) -> CommandResult<Option<Document>> {
        self.find_and_modify(query, None, options.remove(true))
            .await
    }

    /// Counts the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server refuses the count.
    pub async fn count(&self, query: Document, options: OptionSet) -> CommandResult<u64> {
        let effective = self.effective_options(&options);
        let reply = self
            .executor()
            .command(AdminCommand::count(&self.namespace, query, &effective))
            .await?;

        Ok(number_field(&reply, "n")
            .unwrap_or(0)
            .max(0) as u64)
    }

    /// Returns the distinct values of `key` among documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server refuses the command.
    pub async fn distinct(&self, key: &str, query: Document, options: OptionSet) -> CommandResult<Vec<Bson>> {
        let effective = self.effective_options(&options);
        let reply = self
            .executor()
            .command(AdminCommand::distinct(&self.namespace, key, query, &effective))
            .await?;

        match reply.get("values") {
            Some(Bson::Array(values)) => Ok(values.clone()),
            _ => Err(CommandError::server("distinct reply carries no values")),
        }
    }

    /// Groups documents and returns the server's result.
    ///
    /// # Errors
    ///
    /// - Command mode: [`CommandError::Server`] with `group command failed: ..`
    /// - Scripted mode: [`CommandError::Evaluation`] if the script fails, or
    ///   [`CommandError::Validation`] if it cannot be rendered
    pub async fn group(&self, spec: GroupSpec) -> CommandResult<Bson> {
        match spec.mode {
            GroupMode::Command => {
                let reply = self
                    .connection
                    .run(spec.to_command(&self.namespace))
                    .await?;
                group_result(&reply)
            }
            GroupMode::Scripted => {
                let script = spec.to_script(&self.namespace)?;
                let reply = self
                    .connection
                    .run(eval_command(self.namespace.database(), &script, Vec::new()))
                    .await?;
                scripted_group_result(&reply)
            }
        }
    }

    /// Runs a map-reduce over this collection.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server reports failure.
    pub async fn map_reduce(
        &self,
        map: impl Into<Script>,
        reduce: impl Into<Script>,
        options: MapReduceOptions,
    ) -> CommandResult<MapReduceOutput> {
        let command = map_reduce_command(&self.namespace, &map.into(), &reduce.into(), &options);
        let reply = self.connection.run(command).await?;
        map_reduce_result(&reply)
    }

    /// Drops the collection.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server refuses.
    pub async fn drop(&self) -> CommandResult<bool> {
        self.executor()
            .command(AdminCommand::drop(&self.namespace))
            .await?;
        Ok(true)
    }

    /// Drops the named index.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Server`] if the server refuses.
    pub async fn drop_index(&self, name: &str) -> CommandResult<Document> {
        self.executor()
            .command(AdminCommand::delete_indexes(&self.namespace, name))
            .await
    }

    /// Drops every index on the collection.
    pub async fn drop_indexes(&self) -> CommandResult<Document> {
        self.drop_index("*").await
    }

    /// Renames the collection and returns a handle to the new name, carrying
    /// this handle's defaults and identifier strategy.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Validation`] for a malformed new name
    /// - [`CommandError::Server`] if the server refuses
    pub async fn rename(&self, new_name: &str) -> CommandResult<Collection<'a, T>> {
        let target = Namespace::new(self.namespace.database(), new_name)?;

        self.executor()
            .command(AdminCommand::rename(&self.namespace, &target))
            .await?;

        Ok(Collection::new(
            target,
            self.connection,
            self.defaults.clone(),
            Arc::clone(&self.id_generator),
        ))
    }
}

/// Reads the document a find-and-modify returned.
///
/// # Errors
///
/// Returns [`CommandError::Server`] for `err`, or for an `errmsg` other than
/// the no-match message.
pub fn find_and_modify_value(reply: &Document) -> CommandResult<Option<Document>> {
    match reply.get("err") {
        None | Some(Bson::Null) => {}
        Some(err) => {
            return Err(CommandError::Server {
                message: err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string()),
                code: number_field(reply, "code").map(|code| code as i32),
            });
        }
    }

    if let Ok(errmsg) = reply.get_str("errmsg") {
        if !errmsg.contains(NO_MATCHING_OBJECT) {
            return Err(CommandError::Server {
                message: errmsg.to_string(),
                code: number_field(reply, "code").map(|code| code as i32),
            });
        }
    }

    match reply.get("value") {
        Some(Bson::Document(value)) => Ok(Some(value.clone())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_and_modify_values() {
        assert_eq!(
            find_and_modify_value(&doc! { "ok": 1, "value": { "a": 1 } }).unwrap(),
            Some(doc! { "a": 1 }),
        );
        assert_eq!(find_and_modify_value(&doc! { "ok": 1, "value": Bson::Null }).unwrap(), None);
        assert_eq!(
            find_and_modify_value(&doc! { "ok": 0, "errmsg": "No matching object found" }).unwrap(),
            None,
        );
        assert_eq!(
            find_and_modify_value(&doc! { "ok": 0, "errmsg": "exception: bad sort", "code": 13 }),
            Err(CommandError::Server { message: "exception: bad sort".into(), code: Some(13) }),
        );
        assert!(find_and_modify_value(&doc! { "err": "E11000" }).unwrap_err().is_server());
    }
}
