//! The emulated server behind [`MemoryTransport`](crate::MemoryTransport).
//!
//! One [`ServerState`] plays the part of a single server connection: writes
//! record their status in a last-error slot that the next `getlasterror`
//! reports, queries and admin commands answer with reply documents, and
//! failures travel inside those documents the way a server reports them.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use bson::{Bson, Document, doc, oid::ObjectId};

use docwire_core::{
    command::{AdminCommand, Command, DeleteCommand, InsertCommand, UpdateCommand},
    document::{Body, ID_FIELD},
    error::{CommandError, CommandResult},
    query::QueryCommand,
    transport::Reply,
};

use crate::{
    evaluator::{Comparable, SelectorEvaluator, compare_by, lookup, project},
    update::{apply_update, upsert_document},
};

/// Error message a find-and-modify reports when nothing matched.
pub const NO_MATCHING_OBJECT: &str = "No matching object found";

const DUPLICATE_KEY: i32 = 11000;

/// A user-supplied responder for an admin command, keyed by command name.
#[derive(Clone)]
pub struct CommandHandler(Arc<dyn Fn(&Document) -> Document + Send + Sync>);

impl CommandHandler {
    pub fn new(handler: impl Fn(&Document) -> Document + Send + Sync + 'static) -> Self {
        CommandHandler(Arc::new(handler))
    }

    fn respond(&self, command: &Document) -> Document {
        (self.0)(command)
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandHandler(..)")
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServerState {
    /// Collections by full namespace, `<database>.<collection>`.
    pub(crate) collections: HashMap<String, Vec<Document>>,
    last_error: Document,
    pub(crate) log: Vec<Command>,
    pub(crate) failures: VecDeque<String>,
    pub(crate) handlers: HashMap<String, CommandHandler>,
}

fn decode(body: Body) -> CommandResult<Document> {
    match body {
        Body::Document(document) => Ok(document),
        Body::Encoded(encoded) => Ok(Document::from_reader(encoded.as_bytes())?),
    }
}

fn status(n: i64) -> Document {
    doc! { "err": Bson::Null, "n": n }
}

fn error_parts(err: &CommandError) -> (String, Option<i32>) {
    match err {
        CommandError::Server { message, code } => (message.clone(), *code),
        other => (other.to_string(), None),
    }
}

fn write_error(err: &CommandError) -> Document {
    let (message, code) = error_parts(err);
    let mut document = doc! { "err": message, "n": 0_i64 };
    if let Some(code) = code {
        document.insert("code", code);
    }
    document
}

fn command_error(err: &CommandError) -> Document {
    let (message, code) = error_parts(err);
    let mut document = doc! { "ok": 0.0, "errmsg": message };
    if let Some(code) = code {
        document.insert("code", code);
    }
    document
}

fn query_error(err: &CommandError) -> Document {
    let (message, code) = error_parts(err);
    let mut document = doc! { "$err": message };
    if let Some(code) = code {
        document.insert("code", code);
    }
    document
}

fn string_field<'d>(command: &'d Document, key: &str) -> CommandResult<&'d str> {
    command
        .get_str(key)
        .map_err(|_| CommandError::Server { message: format!("{} must be a string", key), code: Some(2) })
}

fn document_field(command: &Document, key: &str) -> Document {
    command
        .get_document(key)
        .cloned()
        .unwrap_or_default()
}

fn flag(command: &Document, key: &str) -> bool {
    command
        .get_bool(key)
        .unwrap_or(false)
}

impl ServerState {
    /// Runs one command as the server would.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Transport`] only for a failure queued with
    /// [`MemoryTransport::fail_next`](crate::MemoryTransport::fail_next).
    pub(crate) fn execute(&mut self, command: Command) -> CommandResult<Reply> {
        tracing::trace!(kind = %command.kind(), namespace = %command.namespace(), "memory server received command");
        self.log.push(command.clone());

        if let Some(message) = self.failures.pop_front() {
            tracing::debug!(%message, "memory server injecting transport failure");
            return Err(CommandError::Transport(message));
        }

        let reply = match command {
            Command::Insert(insert) => {
                self.last_error = self
                    .insert(insert)
                    .unwrap_or_else(|err| write_error(&err));
                Reply::empty()
            }
            Command::Update(update) => {
                self.last_error = self
                    .update(update)
                    .unwrap_or_else(|err| write_error(&err));
                Reply::empty()
            }
            Command::Delete(delete) => {
                self.last_error = self
                    .delete(delete)
                    .unwrap_or_else(|err| write_error(&err));
                Reply::empty()
            }
            Command::Query(query) => match self.query(query) {
                Ok(documents) => Reply::new(documents),
                Err(err) => Reply::new(vec![query_error(&err)]),
            },
            Command::Admin(admin) => Reply::new(vec![self.admin(admin)]),
        };

        Ok(reply)
    }

    fn collection_mut(&mut self, namespace: &str) -> &mut Vec<Document> {
        self.collections
            .entry(namespace.to_string())
            .or_default()
    }

    fn documents(&self, namespace: &str) -> &[Document] {
        self.collections
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert(&mut self, insert: InsertCommand) -> CommandResult<Document> {
        let namespace = insert.namespace.to_string();
        let collection = self.collection_mut(&namespace);
        let mut first_error = None;

        for mut document in insert.documents {
            if !document.contains_key(ID_FIELD) {
                let mut with_id = doc! { ID_FIELD: ObjectId::new() };
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                document = with_id;
            }

            let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
            let duplicate = collection
                .iter()
                .any(|existing| existing.get(ID_FIELD).map(Comparable::from) == Some(Comparable::from(&id)));

            if duplicate {
                let err = CommandError::Server {
                    message: format!("E11000 duplicate key error index: {}.$_id_  dup key: {{ : {} }}", namespace, id),
                    code: Some(DUPLICATE_KEY),
                };
                if first_error.is_none() {
                    first_error = Some(err);
                }
                if !insert.keep_going {
                    break;
                }
                continue;
            }

            collection.push(document);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(status(0)),
        }
    }

    fn update(&mut self, update: UpdateCommand) -> CommandResult<Document> {
        let namespace = update.namespace.to_string();
        let selector = decode(update.selector)?;

        let evaluator = SelectorEvaluator::new(&selector);
        let mut positions = Vec::new();
        for (position, document) in self.documents(&namespace).iter().enumerate() {
            if evaluator.matches(document)? {
                positions.push(position);
                if !update.multi {
                    break;
                }
            }
        }

        if positions.is_empty() {
            if !update.upsert {
                return Ok(doc! { "err": Bson::Null, "n": 0_i64, "updatedExisting": false });
            }

            let document = upsert_document(&selector, &update.update)?;
            let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
            self.collection_mut(&namespace).push(document);
            return Ok(doc! { "err": Bson::Null, "n": 1_i64, "updatedExisting": false, "upserted": id });
        }

        let collection = self.collection_mut(&namespace);
        for &position in &positions {
            let mut updated = collection[position].clone();
            apply_update(&mut updated, &update.update)?;
            collection[position] = updated;
        }

        Ok(doc! { "err": Bson::Null, "n": positions.len() as i64, "updatedExisting": true })
    }

    fn delete(&mut self, delete: DeleteCommand) -> CommandResult<Document> {
        let namespace = delete.namespace.to_string();
        let selector = decode(delete.selector)?;
        let evaluator = SelectorEvaluator::new(&selector);

        let mut matched = Vec::new();
        for document in self.documents(&namespace) {
            matched.push(evaluator.matches(document)?);
        }

        let mut flags = matched.iter();
        self.collection_mut(&namespace)
            .retain(|_| !flags.next().copied().unwrap_or(false));

        let removed = matched
            .iter()
            .filter(|removed| **removed)
            .count() as i64;
        Ok(status(removed))
    }

    fn query(&self, query: QueryCommand) -> CommandResult<Vec<Document>> {
        let namespace = query.namespace.to_string();
        let selector = decode(query.selector)?;

        let (filter, order, explain) = match selector.get("$query") {
            Some(Bson::Document(filter)) => (
                filter.clone(),
                selector.get_document("$orderby").ok().cloned(),
                flag(&selector, "$explain"),
            ),
            _ => (selector, None, false),
        };

        let documents = self.documents(&namespace);
        let mut matched = SelectorEvaluator::new(&filter).filter(documents)?;

        if explain {
            return Ok(vec![doc! {
                "cursor": "BasicCursor",
                "n": matched.len() as i64,
                "nscanned": documents.len() as i64,
            }]);
        }

        if let Some(order) = order {
            matched.sort_by(|left, right| compare_by(&order, left, right));
        }

        let projection = query
            .projection
            .map(decode)
            .transpose()?;
        let limit = match query.limit.unsigned_abs() as usize {
            0 => usize::MAX,
            limit => limit,
        };

        Ok(matched
            .into_iter()
            .skip(query.skip as usize)
            .take(limit)
            .map(|document| match &projection {
                Some(projection) => project(document, projection),
                None => document.clone(),
            })
            .collect())
    }

    fn admin(&mut self, admin: AdminCommand) -> Document {
        let name = admin.name().unwrap_or_default().to_string();
        tracing::debug!(command = %name, namespace = %admin.namespace, "memory server running command");

        if let Some(handler) = self.handlers.get(&name) {
            return handler.respond(&admin.command);
        }

        if name != "getlasterror" {
            self.last_error = status(0);
        }

        let database = admin.namespace.database().to_string();
        let result = match name.as_str() {
            "getlasterror" => Ok(self.get_last_error()),
            "count" => self.count(&database, &admin.command),
            "distinct" => self.distinct(&database, &admin.command),
            "findandmodify" => self.find_and_modify(&database, &admin.command),
            "drop" => self.drop(&database, &admin.command),
            "deleteIndexes" => self.delete_indexes(&database, &admin.command),
            "renameCollection" => self.rename(&database, &admin.command),
            other => Err(CommandError::Server { message: format!("no such cmd: {}", other), code: Some(59) }),
        };

        result.unwrap_or_else(|err| command_error(&err))
    }

    fn get_last_error(&self) -> Document {
        let mut reply = if self.last_error.is_empty() { status(0) } else { self.last_error.clone() };
        reply.insert("ok", 1.0);
        reply
    }

    fn target(database: &str, command: &Document, name: &str) -> CommandResult<String> {
        Ok(format!("{}.{}", database, string_field(command, name)?))
    }

    fn count(&self, database: &str, command: &Document) -> CommandResult<Document> {
        let namespace = Self::target(database, command, "count")?;
        let query = document_field(command, "query");
        let n = SelectorEvaluator::new(&query)
            .filter(self.documents(&namespace))?
            .len();

        Ok(doc! { "n": n as f64, "ok": 1.0 })
    }

    fn distinct(&self, database: &str, command: &Document) -> CommandResult<Document> {
        let namespace = Self::target(database, command, "distinct")?;
        let key = string_field(command, "key")?;
        let query = document_field(command, "query");

        let mut values: Vec<Bson> = Vec::new();
        let mut remember = |value: &Bson| {
            let candidate = Comparable::from(value);
            if !values.iter().any(|seen| Comparable::from(seen) == candidate) {
                values.push(value.clone());
            }
        };

        for document in SelectorEvaluator::new(&query).filter(self.documents(&namespace))? {
            match lookup(document, key) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut remember),
                Some(value) => remember(value),
                None => {}
            }
        }

        Ok(doc! { "values": values, "ok": 1.0 })
    }

    fn find_and_modify(&mut self, database: &str, command: &Document) -> CommandResult<Document> {
        let namespace = Self::target(database, command, "findandmodify")?;
        let query = document_field(command, "query");
        let sort = document_field(command, "sort");
        let fields = command.get_document("fields").ok().cloned();
        let update = command.get_document("update").ok().cloned();
        let (remove, return_new, upsert) = (flag(command, "remove"), flag(command, "new"), flag(command, "upsert"));

        if !remove && update.is_none() {
            return Err(CommandError::server("need remove or update"));
        }

        let evaluator = SelectorEvaluator::new(&query);
        let mut candidates = Vec::new();
        for (position, document) in self.documents(&namespace).iter().enumerate() {
            if evaluator.matches(document)? {
                candidates.push(position);
            }
        }
        let documents = self.documents(&namespace);
        candidates.sort_by(|&a, &b| compare_by(&sort, &documents[a], &documents[b]));

        let shape = |document: Document| match &fields {
            Some(fields) => project(&document, fields),
            None => document,
        };

        let Some(&position) = candidates.first() else {
            return match (upsert && !remove, update) {
                (true, Some(update)) => {
                    let document = upsert_document(&query, &update)?;
                    self.collection_mut(&namespace).push(document.clone());
                    self.last_error = status(1);
                    let value = if return_new { Bson::Document(shape(document)) } else { Bson::Null };
                    Ok(doc! { "value": value, "ok": 1.0 })
                }
                _ => Err(CommandError::server(NO_MATCHING_OBJECT)),
            };
        };

        let collection = self.collection_mut(&namespace);
        let original = collection[position].clone();

        let value = if remove {
            collection.remove(position);
            original
        } else {
            let mut modified = original.clone();
            if let Some(update) = &update {
                apply_update(&mut modified, update)?;
            }
            collection[position] = modified.clone();
            if return_new { modified } else { original }
        };

        self.last_error = status(1);
        Ok(doc! { "value": shape(value), "ok": 1.0 })
    }

    fn drop(&mut self, database: &str, command: &Document) -> CommandResult<Document> {
        let namespace = Self::target(database, command, "drop")?;

        match self.collections.remove(&namespace) {
            Some(_) => Ok(doc! { "ns": namespace, "nIndexesWas": 1, "ok": 1.0 }),
            None => Err(CommandError::server("ns not found")),
        }
    }

    fn delete_indexes(&self, database: &str, command: &Document) -> CommandResult<Document> {
        let namespace = Self::target(database, command, "deleteIndexes")?;
        if !self.collections.contains_key(&namespace) {
            return Err(CommandError::server("ns not found"));
        }

        match string_field(command, "index")? {
            "*" => Ok(doc! { "nIndexesWas": 1, "msg": "non-_id indexes dropped for collection", "ok": 1.0 }),
            "_id_" => Err(CommandError::server("cannot drop _id index")),
            other => Err(CommandError::Server { message: format!("index not found with name [{}]", other), code: Some(27) }),
        }
    }

    fn rename(&mut self, database: &str, command: &Document) -> CommandResult<Document> {
        if database != "admin" {
            return Err(CommandError::server("renameCollection may only be run against the admin database."));
        }

        let from = string_field(command, "renameCollection")?.to_string();
        let to = string_field(command, "to")?.to_string();

        if self.collections.contains_key(&to) {
            return Err(CommandError::server("target namespace exists"));
        }

        let documents = self
            .collections
            .remove(&from)
            .ok_or_else(|| CommandError::server("source namespace does not exist"))?;
        self.collections.insert(to, documents);

        Ok(doc! { "ok": 1.0 })
    }
}
