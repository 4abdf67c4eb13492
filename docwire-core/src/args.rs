//! Legacy positional call shapes of `find` and `findOne`.
//!
//! The legacy form takes up to five positional values plus an optional
//! completion handler at either end. Each value is tagged with a [`FindArg`]
//! variant, and [`disambiguate`] maps the list onto a [`FindCall`]:
//!
//! | values | meaning                                        |
//! |--------|------------------------------------------------|
//! | 0      | `{}`                                           |
//! | 1      | selector (options, after a leading handler)    |
//! | 2      | selector, options or projection                |
//! | 3      | selector, projection, options                  |
//! | 4      | selector, projection, skip, limit              |
//! | 5      | selector, projection, skip, limit, timeout     |
//!
//! Every other shape is rejected.

use std::fmt;

use bson::Document;

use crate::{
    document::{EncodedDocument, Projection, Selector},
    error::{CommandError, CommandResult},
    id::DocumentId,
    query::{FindOptions, is_find_options, narrow},
};

/// Receives the result of a call exactly once.
pub type CompletionHandler<R> = Box<dyn FnOnce(CommandResult<R>) + Send>;

/// One positional argument of a legacy call.
pub enum FindArg<R> {
    Handler(CompletionHandler<R>),
    Document(Document),
    /// A projection given as a list of field names.
    Fields(Vec<String>),
    Encoded(EncodedDocument),
    Id(DocumentId),
    Int(i64),
    Bool(bool),
    Null,
}

impl<R> FindArg<R> {
    /// Wraps a closure as a handler argument.
    pub fn handler(handler: impl FnOnce(CommandResult<R>) + Send + 'static) -> Self {
        FindArg::Handler(Box::new(handler))
    }

    fn tag(&self) -> &'static str {
        match self {
            FindArg::Handler(_) => "handler",
            FindArg::Document(_) => "document",
            FindArg::Fields(_) => "fields",
            FindArg::Encoded(_) => "encoded",
            FindArg::Id(_) => "id",
            FindArg::Int(_) => "int",
            FindArg::Bool(_) => "bool",
            FindArg::Null => "null",
        }
    }
}

impl<R> fmt::Debug for FindArg<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindArg::Handler(_) => f.write_str("Handler(..)"),
            FindArg::Document(document) => f.debug_tuple("Document").field(document).finish(),
            FindArg::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            FindArg::Encoded(encoded) => f.debug_tuple("Encoded").field(encoded).finish(),
            FindArg::Id(id) => f.debug_tuple("Id").field(id).finish(),
            FindArg::Int(n) => f.debug_tuple("Int").field(n).finish(),
            FindArg::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            FindArg::Null => f.write_str("Null"),
        }
    }
}

impl<R> From<Document> for FindArg<R> {
    fn from(document: Document) -> Self {
        FindArg::Document(document)
    }
}

impl<R> From<DocumentId> for FindArg<R> {
    fn from(id: DocumentId) -> Self {
        FindArg::Id(id)
    }
}

impl<R> From<EncodedDocument> for FindArg<R> {
    fn from(encoded: EncodedDocument) -> Self {
        FindArg::Encoded(encoded)
    }
}

impl<R> From<Vec<&str>> for FindArg<R> {
    fn from(fields: Vec<&str>) -> Self {
        FindArg::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl<R> From<i64> for FindArg<R> {
    fn from(n: i64) -> Self {
        FindArg::Int(n)
    }
}

impl<R> From<bool> for FindArg<R> {
    fn from(b: bool) -> Self {
        FindArg::Bool(b)
    }
}

/// A find call in canonical form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindCall {
    pub selector: Selector,
    pub projection: Option<Projection>,
    pub options: FindOptions,
}

/// Splits the handler off a legacy argument list and resolves the rest.
///
/// The handler is returned even when resolution fails, so the caller can
/// deliver the error to it.
pub fn disambiguate<R>(mut args: Vec<FindArg<R>>) -> (Option<CompletionHandler<R>>, CommandResult<FindCall>) {
    let mut leading = false;
    let handler = if matches!(args.last(), Some(FindArg::Handler(_))) {
        match args.pop() {
            Some(FindArg::Handler(handler)) => Some(handler),
            _ => None,
        }
    } else if matches!(args.first(), Some(FindArg::Handler(_))) {
        leading = true;
        match args.remove(0) {
            FindArg::Handler(handler) => Some(handler),
            _ => None,
        }
    } else {
        None
    };

    (handler, resolve_values(args, leading))
}

fn shape<R>(args: &[FindArg<R>]) -> String {
    let tags: Vec<_> = args.iter().map(FindArg::tag).collect();
    format!("({})", tags.join(", "))
}

fn resolve_values<R>(args: Vec<FindArg<R>>, leading_handler: bool) -> CommandResult<FindCall> {
    let shape = shape(&args);
    let unsupported = || CommandError::Validation(format!("unsupported find argument shape {}", shape));

    if args.len() > 5 || args.iter().any(|arg| matches!(arg, FindArg::Handler(_))) {
        return Err(unsupported());
    }

    let mut call = FindCall::default();
    let count = args.len();
    let mut values = args.into_iter();

    match (count, leading_handler) {
        (0, _) => {}
        (1, true) => {
            call.options = options_from(values.next()).ok_or_else(unsupported)??;
        }
        (2, _) => {
            call.selector = selector_from(values.next()).ok_or_else(unsupported)?;
            match values.next() {
                Some(FindArg::Document(document)) if is_find_options(&document) => {
                    call.options = FindOptions::from_document(&document)?;
                }
                second => call.projection = projection_from(second).ok_or_else(unsupported)?,
            }
        }
        _ => {
            call.selector = selector_from(values.next()).ok_or_else(unsupported)?;
            if count >= 2 {
                call.projection = projection_from(values.next()).ok_or_else(unsupported)?;
            }
            if count == 3 {
                call.options = options_from(values.next()).ok_or_else(unsupported)??;
            }
            if count >= 4 {
                let skip = int_from(values.next()).ok_or_else(unsupported)?;
                call.options.skip = Some(narrow("skip", skip.max(0))?);
                let limit = int_from(values.next()).ok_or_else(unsupported)?;
                call.options.limit = Some(narrow("limit", limit)?);
            }
            if count == 5 {
                call.options.timeout = Some(bool_from(values.next()).ok_or_else(unsupported)?);
            }
        }
    }

    if let Some(fields) = call.options.fields.take() {
        call.projection = Some(fields);
    }

    Ok(call)
}

fn selector_from<R>(arg: Option<FindArg<R>>) -> Option<Selector> {
    match arg? {
        FindArg::Document(document) => Some(Selector::Document(document)),
        FindArg::Encoded(encoded) => Some(Selector::Encoded(encoded)),
        FindArg::Id(id) => Some(Selector::Id(id)),
        FindArg::Null => Some(Selector::all()),
        _ => None,
    }
}

fn projection_from<R>(arg: Option<FindArg<R>>) -> Option<Option<Projection>> {
    match arg? {
        FindArg::Document(document) => Some(Some(Projection::Document(document))),
        FindArg::Fields(fields) => Some(Some(Projection::Fields(fields))),
        FindArg::Encoded(encoded) => Some(Some(Projection::Encoded(encoded))),
        FindArg::Null => Some(None),
        _ => None,
    }
}

fn options_from<R>(arg: Option<FindArg<R>>) -> Option<CommandResult<FindOptions>> {
    match arg? {
        FindArg::Document(document) => Some(FindOptions::from_document(&document)),
        FindArg::Null => Some(Ok(FindOptions::default())),
        _ => None,
    }
}

fn int_from<R>(arg: Option<FindArg<R>>) -> Option<i64> {
    match arg? {
        FindArg::Int(n) => Some(n),
        FindArg::Null => Some(0),
        _ => None,
    }
}

fn bool_from<R>(arg: Option<FindArg<R>>) -> Option<bool> {
    match arg? {
        FindArg::Bool(b) => Some(b),
        _ => None,
    }
}
