//! Query options, sort specifications and the query command builder.
//!
//! A find call is described by a [`Selector`], an optional [`Projection`] and
//! a [`FindOptions`] value. [`QueryCommand::build`] folds them, together with
//! the resolved [`EffectiveOptions`], into the query the transport sends.
//!
//! # Query Building
//!
//! ```ignore
//! use docwire_core::query::{FindOptions, SortDirection, SortSpec};
//!
//! let options = FindOptions::builder()
//!     .limit(10)
//!     .skip(20)
//!     .sort(SortSpec::by("created_at", SortDirection::Desc))
//!     .fields(vec!["name", "email"])
//!     .build();
//! ```
//!
//! # Query Modifiers
//!
//! Sort, hint, explain and snapshot are sent as modifiers. When any is set the
//! selector is wrapped as `{$query: <selector>, $orderby: .., $hint: .., ..}`;
//! otherwise it is sent bare.

use bson::{Bson, Document, doc};

use crate::{
    document::{Body, Projection, Selector},
    error::{CommandError, CommandResult},
    namespace::Namespace,
    options::{EffectiveOptions, Hint, OptionSet},
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }

    /// Reads a direction from `1`, `-1`, `"asc"`, `"ascending"`, `"desc"` or
    /// `"descending"`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for any other value.
    pub fn from_bson(value: &Bson) -> CommandResult<Self> {
        let direction = match value {
            Bson::Int32(1) | Bson::Int64(1) => Some(SortDirection::Asc),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(SortDirection::Desc),
            Bson::Double(d) if *d == 1.0 => Some(SortDirection::Asc),
            Bson::Double(d) if *d == -1.0 => Some(SortDirection::Desc),
            Bson::String(s) => match s.to_ascii_lowercase().as_str() {
                "asc" | "ascending" => Some(SortDirection::Asc),
                "desc" | "descending" => Some(SortDirection::Desc),
                _ => None,
            },
            _ => None,
        };

        direction.ok_or_else(|| {
            CommandError::Validation(format!(
                "illegal sort direction {}, expected 1, -1, 'asc' or 'desc'",
                value
            ))
        })
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub enum SortSpec {
    /// A single ascending field.
    Field(String),
    /// Ordered fields with directions.
    Fields(Vec<(String, SortDirection)>),
    /// An order document used as given.
    Document(Document),
}

impl SortSpec {
    /// Sorts by one field in the given direction.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        SortSpec::Fields(vec![(field.into(), direction)])
    }

    /// Appends another sort key.
    pub fn then(self, field: impl Into<String>, direction: SortDirection) -> Self {
        let mut fields = match self {
            SortSpec::Field(first) => vec![(first, SortDirection::Asc)],
            SortSpec::Fields(fields) => fields,
            SortSpec::Document(document) => {
                let mut document = document;
                document.insert(field.into(), direction.as_i32());
                return SortSpec::Document(document);
            }
        };
        fields.push((field.into(), direction));
        SortSpec::Fields(fields)
    }

    /// Normalizes the sort into an order document.
    pub fn to_document(&self) -> Document {
        match self {
            SortSpec::Field(field) => doc! { field.as_str(): 1 },
            SortSpec::Fields(fields) => fields
                .iter()
                .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
                .collect(),
            SortSpec::Document(document) => document.clone(),
        }
    }

    /// Reads a sort from `"a"`, `["a", "b"]`, `[["a", 1], ["b", "desc"]]` or an
    /// order document.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for any other shape.
    pub fn from_bson(value: &Bson) -> CommandResult<Self> {
        match value {
            Bson::String(field) => Ok(SortSpec::Field(field.clone())),
            Bson::Document(document) => Ok(SortSpec::Document(document.clone())),
            Bson::Array(items) => items
                .iter()
                .map(|item| match item {
                    Bson::String(field) => Ok((field.clone(), SortDirection::Asc)),
                    Bson::Array(pair) => match pair.as_slice() {
                        [Bson::String(field), direction] => {
                            Ok((field.clone(), SortDirection::from_bson(direction)?))
                        }
                        _ => Err(CommandError::Validation(format!(
                            "sort pairs must be [field, direction], got {}",
                            item
                        ))),
                    },
                    other => Err(CommandError::Validation(format!(
                        "unsupported sort key {}",
                        other
                    ))),
                })
                .collect::<CommandResult<Vec<_>>>()
                .map(SortSpec::Fields),
            other => Err(CommandError::Validation(format!("unsupported sort value {}", other))),
        }
    }
}

impl From<&str> for SortSpec {
    fn from(field: &str) -> Self {
        SortSpec::Field(field.to_string())
    }
}

impl From<Document> for SortSpec {
    fn from(document: Document) -> Self {
        SortSpec::Document(document)
    }
}

/// The option keys that mark a document as find options rather than a
/// projection.
pub const FIND_OPTION_KEYS: [&str; 12] = [
    "limit", "sort", "fields", "skip", "hint", "explain", "snapshot", "timeout", "tailable",
    "batchSize", "raw", "read",
];

/// Per-call options of a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Per-call level of the option precedence chain (raw, slaveOk, hint).
    pub options: OptionSet,
    pub fields: Option<Projection>,
    pub skip: Option<u32>,
    /// Maximum number of documents; `0` means no limit.
    pub limit: Option<i32>,
    pub sort: Option<SortSpec>,
    pub explain: bool,
    pub snapshot: bool,
    /// `Some(false)` asks the server not to time out the cursor.
    pub timeout: Option<bool>,
    pub tailable: bool,
    pub batch_size: Option<i32>,
    /// Read preference name. Anything other than `"primary"` allows
    /// secondary reads.
    pub read: Option<String>,
}

impl FindOptions {
    /// Creates a new builder for fluent construction.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }

    /// Reads find options from an options document such as
    /// `{limit: 10, sort: [["a", -1]], fields: ["a"]}`.
    ///
    /// Unrecognized keys are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] if a recognized key has a value of
    /// the wrong type.
    pub fn from_document(document: &Document) -> CommandResult<Self> {
        let mut options = FindOptions::default();

        for (key, value) in document {
            match key.as_str() {
                "limit" => options.limit = Some(narrow(key, int_option(key, value)?)?),
                "skip" => options.skip = Some(narrow(key, int_option(key, value)?.max(0))?),
                "batchSize" => options.batch_size = Some(narrow(key, int_option(key, value)?)?),
                "sort" => options.sort = Some(SortSpec::from_bson(value)?),
                "fields" => options.fields = Some(Projection::from_bson(value)?),
                "hint" => options.options.hint = Some(Hint::from_bson(value)?),
                "explain" => options.explain = bool_option(key, value)?,
                "snapshot" => options.snapshot = bool_option(key, value)?,
                "tailable" => options.tailable = bool_option(key, value)?,
                "timeout" => options.timeout = Some(bool_option(key, value)?),
                "raw" => options.options.raw = Some(bool_option(key, value)?),
                "slaveOk" => options.options.slave_ok = Some(bool_option(key, value)?),
                "read" => match value {
                    Bson::String(mode) => options.read = Some(mode.clone()),
                    Bson::Boolean(slave_ok) => options.options.slave_ok = Some(*slave_ok),
                    other => {
                        return Err(CommandError::Validation(format!(
                            "find option 'read' must be a string, got {}",
                            other
                        )));
                    }
                },
                _ => tracing::warn!(option = %key, "ignoring unrecognized find option"),
            }
        }

        Ok(options)
    }
}

fn int_option(key: &str, value: &Bson) -> CommandResult<i64> {
    match value {
        Bson::Int32(n) => Ok(i64::from(*n)),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(d) if d.fract() == 0.0 => Ok(*d as i64),
        other => Err(CommandError::Validation(format!(
            "find option '{}' must be an integer, got {}",
            key, other
        ))),
    }
}

/// Narrows a paging value to its wire width.
pub(crate) fn narrow<T: TryFrom<i64>>(key: &str, value: i64) -> CommandResult<T> {
    T::try_from(value).map_err(|_| {
        CommandError::Validation(format!("find option '{}' is out of range: {}", key, value))
    })
}

fn bool_option(key: &str, value: &Bson) -> CommandResult<bool> {
    match value {
        Bson::Boolean(b) => Ok(*b),
        other => Err(CommandError::Validation(format!(
            "find option '{}' must be a boolean, got {}",
            key, other
        ))),
    }
}

/// Returns `true` if any top-level key of `document` is a find option key.
pub fn is_find_options(document: &Document) -> bool {
    FIND_OPTION_KEYS
        .iter()
        .any(|key| document.contains_key(key))
}

#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Sets the maximum number of documents to return.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum number of documents to return
    pub fn limit(mut self, limit: i32) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    ///
    /// # Arguments
    ///
    /// * `skip` - The number of documents to skip
    pub fn skip(mut self, skip: u32) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Sets the sort specification for the query results.
    ///
    /// # Arguments
    ///
    /// * `sort` - The sort keys and directions
    pub fn sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.options.sort = Some(sort.into());
        self
    }

    pub fn fields(mut self, fields: impl Into<Projection>) -> Self {
        self.options.fields = Some(fields.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<Hint>) -> Self {
        self.options.options.hint = Some(hint.into());
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.options.explain = explain;
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.options.snapshot = snapshot;
        self
    }

    pub fn timeout(mut self, timeout: bool) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn tailable(mut self, tailable: bool) -> Self {
        self.options.tailable = tailable;
        self
    }

    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.options.options.raw = Some(raw);
        self
    }

    pub fn slave_ok(mut self, slave_ok: bool) -> Self {
        self.options.options.slave_ok = Some(slave_ok);
        self
    }

    pub fn read(mut self, mode: impl Into<String>) -> Self {
        self.options.read = Some(mode.into());
        self
    }

    /// Builds and returns the final options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Wire-level query flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    pub tailable: bool,
    pub slave_ok: bool,
    pub no_cursor_timeout: bool,
}

impl QueryFlags {
    pub const TAILABLE: u32 = 1 << 1;
    pub const SLAVE_OK: u32 = 1 << 2;
    pub const NO_CURSOR_TIMEOUT: u32 = 1 << 4;

    /// The flags as the bit set carried in a query message.
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.tailable {
            bits |= Self::TAILABLE;
        }
        if self.slave_ok {
            bits |= Self::SLAVE_OK;
        }
        if self.no_cursor_timeout {
            bits |= Self::NO_CURSOR_TIMEOUT;
        }
        bits
    }
}

/// A query ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCommand {
    pub namespace: Namespace,
    pub flags: QueryFlags,
    pub skip: u32,
    /// `0` means no limit.
    pub limit: i32,
    pub batch_size: Option<i32>,
    /// The selector, wrapped with `$query` when modifiers are present.
    pub selector: Body,
    pub projection: Option<Body>,
    /// Hand results back without decoding them.
    pub raw: bool,
}

impl QueryCommand {
    /// Builds a query from a normalized find call.
    ///
    /// # Arguments
    ///
    /// * `namespace` - The collection being queried
    /// * `selector` - Which documents to return
    /// * `projection` - Which fields to return; `options.fields` wins when set
    /// * `options` - Per-call find options
    /// * `effective` - The resolved raw, slaveOk and hint settings
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for size-mismatched pre-encoded
    /// documents, or when modifiers would have to wrap a pre-encoded selector.
    pub fn build(
        namespace: Namespace,
        selector: Selector,
        projection: Option<Projection>,
        options: FindOptions,
        effective: &EffectiveOptions,
    ) -> CommandResult<Self> {
        let selector = selector.into_body()?;
        let projection = options
            .fields
            .or(projection)
            .map(Projection::into_body)
            .transpose()?;

        let mut modifiers = Document::new();
        if let Some(sort) = &options.sort {
            modifiers.insert("$orderby", sort.to_document());
        }
        if let Some(hint) = &effective.hint {
            modifiers.insert("$hint", hint.clone());
        }
        if options.explain {
            modifiers.insert("$explain", true);
        }
        if options.snapshot {
            modifiers.insert("$snapshot", true);
        }

        let selector = if modifiers.is_empty() {
            selector
        } else {
            match selector {
                Body::Document(query) => {
                    let mut wrapped = doc! { "$query": query };
                    for (key, value) in modifiers {
                        wrapped.insert(key, value);
                    }
                    Body::Document(wrapped)
                }
                Body::Encoded(_) => {
                    return Err(CommandError::Validation(
                        "query modifiers cannot be applied to a pre-encoded selector".into(),
                    ));
                }
            }
        };

        let secondary_read = options
            .read
            .as_deref()
            .is_some_and(|mode| !mode.eq_ignore_ascii_case("primary"));

        Ok(QueryCommand {
            namespace,
            flags: QueryFlags {
                tailable: options.tailable,
                slave_ok: effective.slave_ok || secondary_read,
                no_cursor_timeout: options.timeout == Some(false),
            },
            skip: options.skip.unwrap_or(0),
            limit: options.limit.unwrap_or(0),
            batch_size: options.batch_size,
            selector,
            projection,
            raw: effective.raw,
        })
    }
}
