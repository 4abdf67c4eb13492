//! Option sets and the three-level precedence chain that resolves them.
//!
//! Options can be given per call, per collection and per connection. For every
//! key the first *present* value wins, walking call → collection → connection
//! → built-in default. An explicit `false` is a present value.
//!
//! The write-concern key (`safe`) adds one rule on top: a present `false` and
//! an absent key resolve to the same thing, an unacknowledged write. `true`
//! or a structured concern request verification.
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::options::{OptionSet, resolve};
//!
//! let call = OptionSet::new().safe(false);
//! let collection = OptionSet::new().safe(true);
//! let effective = resolve(&call, &collection, &OptionSet::default());
//! assert!(!effective.write_concern.is_verified());
//! ```

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::error::{CommandError, CommandResult};

/// How many acknowledgments a verified write waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Acknowledgment {
    /// A replica count.
    Nodes(i32),
    /// A named mode or tag set, e.g. `"majority"`.
    Tag(String),
}

impl From<&Acknowledgment> for Bson {
    fn from(ack: &Acknowledgment) -> Self {
        match ack {
            Acknowledgment::Nodes(n) => Bson::Int32(*n),
            Acknowledgment::Tag(tag) => Bson::String(tag.clone()),
        }
    }
}

/// A structured write concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConcernSpec {
    pub w: Option<Acknowledgment>,
    /// Milliseconds to wait for replication before giving up.
    pub wtimeout: Option<i64>,
    pub fsync: Option<bool>,
    pub j: Option<bool>,
}

impl WriteConcernSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn w(mut self, nodes: i32) -> Self {
        self.w = Some(Acknowledgment::Nodes(nodes));
        self
    }

    pub fn w_tag(mut self, tag: impl Into<String>) -> Self {
        self.w = Some(Acknowledgment::Tag(tag.into()));
        self
    }

    pub fn wtimeout(mut self, millis: i64) -> Self {
        self.wtimeout = Some(millis);
        self
    }

    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = Some(fsync);
        self
    }

    pub fn journal(mut self, j: bool) -> Self {
        self.j = Some(j);
        self
    }
}

/// The `safe` setting at one level of the precedence chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Safe {
    Flag(bool),
    Concern(WriteConcernSpec),
}

/// The resolved write concern for one operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WriteConcern {
    /// Fire and forget: only local dispatch failures are reported.
    #[default]
    Unacknowledged,
    /// Verify with a plain `getlasterror`.
    Acknowledged,
    /// Verify with the given concern fields.
    Custom(WriteConcernSpec),
}

impl WriteConcern {
    /// Returns `true` if a verification command must follow the write.
    pub fn is_verified(&self) -> bool {
        !matches!(self, WriteConcern::Unacknowledged)
    }

    /// Builds the verification command, or `None` for unacknowledged writes.
    pub fn verification_command(&self) -> Option<Document> {
        match self {
            WriteConcern::Unacknowledged => None,
            WriteConcern::Acknowledged => Some(doc! { "getlasterror": 1 }),
            WriteConcern::Custom(spec) => {
                let mut command = doc! { "getlasterror": 1 };
                if let Some(w) = &spec.w {
                    command.insert("w", Bson::from(w));
                }
                if let Some(wtimeout) = spec.wtimeout {
                    command.insert("wtimeout", wtimeout);
                }
                if let Some(fsync) = spec.fsync {
                    command.insert("fsync", fsync);
                }
                if let Some(j) = spec.j {
                    command.insert("j", j);
                }
                Some(command)
            }
        }
    }
}

impl From<Option<&Safe>> for WriteConcern {
    fn from(safe: Option<&Safe>) -> Self {
        match safe {
            None | Some(Safe::Flag(false)) => WriteConcern::Unacknowledged,
            Some(Safe::Flag(true)) => WriteConcern::Acknowledged,
            Some(Safe::Concern(spec)) => WriteConcern::Custom(spec.clone()),
        }
    }
}

/// An index hint, normalized to a key document when resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hint {
    /// `"a"` → `{a: 1}`
    Field(String),
    /// `["a", "b"]` → `{a: 1, b: 1}`
    Fields(Vec<String>),
    /// Used as given.
    Spec(Document),
}

impl Hint {
    /// Normalizes the hint into an index key document.
    pub fn to_document(&self) -> Document {
        match self {
            Hint::Field(field) => doc! { field.as_str(): 1 },
            Hint::Fields(fields) => fields
                .iter()
                .map(|field| (field.clone(), Bson::Int32(1)))
                .collect(),
            Hint::Spec(spec) => spec.clone(),
        }
    }

    /// Reads a hint from a loosely typed option value.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for values that are not a string,
    /// an array of strings or a document.
    pub fn from_bson(value: &Bson) -> CommandResult<Self> {
        match value {
            Bson::String(field) => Ok(Hint::Field(field.clone())),
            Bson::Document(spec) => Ok(Hint::Spec(spec.clone())),
            Bson::Array(items) => items
                .iter()
                .map(|item| match item {
                    Bson::String(field) => Ok(field.clone()),
                    other => Err(CommandError::Validation(format!(
                        "hint fields must be strings, got {}",
                        other
                    ))),
                })
                .collect::<CommandResult<Vec<_>>>()
                .map(Hint::Fields),
            other => Err(CommandError::Validation(format!("unsupported hint value {}", other))),
        }
    }
}

impl From<&str> for Hint {
    fn from(field: &str) -> Self {
        Hint::Field(field.to_string())
    }
}

impl From<String> for Hint {
    fn from(field: String) -> Self {
        Hint::Field(field)
    }
}

impl From<Vec<String>> for Hint {
    fn from(fields: Vec<String>) -> Self {
        Hint::Fields(fields)
    }
}

impl From<Document> for Hint {
    fn from(spec: Document) -> Self {
        Hint::Spec(spec)
    }
}

/// Options at one level of the precedence chain. Every field is optional;
/// `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionSet {
    pub safe: Option<Safe>,
    pub serialize_functions: Option<bool>,
    pub raw: Option<bool>,
    pub slave_ok: Option<bool>,
    pub hint: Option<Hint>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests (`true`) or explicitly declines (`false`) verification.
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = Some(Safe::Flag(safe));
        self
    }

    /// Requests verification with a structured concern.
    pub fn write_concern(mut self, spec: WriteConcernSpec) -> Self {
        self.safe = Some(Safe::Concern(spec));
        self
    }

    pub fn serialize_functions(mut self, serialize_functions: bool) -> Self {
        self.serialize_functions = Some(serialize_functions);
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Allows reads from secondaries.
    pub fn slave_ok(mut self, slave_ok: bool) -> Self {
        self.slave_ok = Some(slave_ok);
        self
    }

    pub fn hint(mut self, hint: impl Into<Hint>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Connection-level defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Options applied when neither the call nor the collection sets them.
    #[serde(flatten)]
    pub defaults: OptionSet,
    /// Leave `_id` assignment to the server.
    pub force_server_object_id: bool,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads connection options from a JSON object, e.g.
    /// `{"safe": {"w": 2}, "slaveOk": true, "forceServerObjectId": false}`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Serialization`] if the JSON does not describe
    /// connection options.
    pub fn from_json(json: &str) -> CommandResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn defaults(mut self, defaults: OptionSet) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn force_server_object_id(mut self, force: bool) -> Self {
        self.force_server_object_id = force;
        self
    }
}

/// The options in force for one operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectiveOptions {
    pub write_concern: WriteConcern,
    pub serialize_functions: bool,
    pub raw: bool,
    pub slave_ok: bool,
    /// The normalized index hint, if any level set one.
    pub hint: Option<Document>,
}

fn first_present<T: Clone>(levels: [&Option<T>; 3]) -> Option<T> {
    levels
        .into_iter()
        .find_map(|level| level.clone())
}

/// Resolves the effective options for one operation.
///
/// None of the inputs are modified; the result is a new value.
pub fn resolve(call: &OptionSet, collection: &OptionSet, connection: &OptionSet) -> EffectiveOptions {
    let safe = first_present([&call.safe, &collection.safe, &connection.safe]);

    EffectiveOptions {
        write_concern: WriteConcern::from(safe.as_ref()),
        serialize_functions: first_present([
            &call.serialize_functions,
            &collection.serialize_functions,
            &connection.serialize_functions,
        ])
        .unwrap_or(false),
        raw: first_present([&call.raw, &collection.raw, &connection.raw]).unwrap_or(false),
        slave_ok: first_present([&call.slave_ok, &collection.slave_ok, &connection.slave_ok])
            .unwrap_or(false),
        hint: first_present([&call.hint, &collection.hint, &connection.hint])
            .map(|hint| hint.to_document()),
    }
}
