//! Document-shaped command inputs: selectors, projections and pre-encoded documents.
//!
//! Callers usually pass [`bson::Document`] values. A document that was already
//! serialized elsewhere can be passed through as an [`EncodedDocument`]; the
//! command layer never decodes it, but it does check that the 4-byte
//! little-endian length prefix matches the payload length.

use bson::{Bson, Document, doc};

use crate::{
    error::{CommandError, CommandResult},
    id::DocumentId,
};

/// Name of the identity field.
pub const ID_FIELD: &str = "_id";

/// A document that is already encoded and is passed to the transport as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    bytes: Vec<u8>,
}

impl EncodedDocument {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The length declared by the 4-byte little-endian prefix, if present.
    pub fn declared_len(&self) -> Option<usize> {
        self.bytes
            .get(0..4)
            .map(|prefix| u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize)
    }

    /// Checks the declared length against the actual length.
    ///
    /// `label` names the payload in the error message, e.g. `"query selector"`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] when the prefix is missing or wrong.
    pub fn validate(&self, label: &str) -> CommandResult<()> {
        match self.declared_len() {
            Some(declared) if declared == self.bytes.len() => Ok(()),
            declared => Err(CommandError::Validation(format!(
                "{} raw message size does not match message header size [{}] != [{}]",
                label,
                self.bytes.len(),
                declared.unwrap_or(0),
            ))),
        }
    }
}

/// A document as it is handed to the transport: structured, or pre-encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Document(Document),
    Encoded(EncodedDocument),
}

impl Body {
    /// Returns the structured document, if this body is not pre-encoded.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Body::Document(document) => Some(document),
            Body::Encoded(_) => None,
        }
    }
}

impl From<Document> for Body {
    fn from(document: Document) -> Self {
        Body::Document(document)
    }
}

/// Which documents an operation targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// A selector document; `{}` matches everything.
    Document(Document),
    /// A pre-encoded selector document.
    Encoded(EncodedDocument),
    /// Shorthand for `{_id: <id>}`.
    Id(DocumentId),
}

impl Selector {
    /// The selector that matches every document.
    pub fn all() -> Self {
        Selector::Document(Document::new())
    }

    /// Validates and normalizes the selector for a command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a pre-encoded selector whose
    /// length prefix does not match.
    pub fn into_body(self) -> CommandResult<Body> {
        match self {
            Selector::Document(document) => Ok(Body::Document(document)),
            Selector::Encoded(encoded) => {
                encoded.validate("query selector")?;
                Ok(Body::Encoded(encoded))
            }
            Selector::Id(id) => Ok(Body::Document(doc! { ID_FIELD: id })),
        }
    }

    /// Normalizes the selector into a structured document.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for pre-encoded selectors, which
    /// cannot be embedded in another document.
    pub fn into_document(self) -> CommandResult<Document> {
        match self.into_body()? {
            Body::Document(document) => Ok(document),
            Body::Encoded(_) => Err(CommandError::Validation(
                "a pre-encoded selector cannot be embedded in a command document".into(),
            )),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::all()
    }
}

impl From<Document> for Selector {
    fn from(document: Document) -> Self {
        Selector::Document(document)
    }
}

impl From<DocumentId> for Selector {
    fn from(id: DocumentId) -> Self {
        Selector::Id(id)
    }
}

impl From<EncodedDocument> for Selector {
    fn from(encoded: EncodedDocument) -> Self {
        Selector::Encoded(encoded)
    }
}

/// Which fields a query returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Included field names. An empty list returns only `_id`.
    Fields(Vec<String>),
    /// An inclusion/exclusion document used as given.
    Document(Document),
    /// A pre-encoded projection document.
    Encoded(EncodedDocument),
}

impl Projection {
    /// Validates and normalizes the projection for a command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for a pre-encoded projection whose
    /// length prefix does not match.
    pub fn into_body(self) -> CommandResult<Body> {
        match self {
            Projection::Fields(fields) if fields.is_empty() => Ok(Body::Document(doc! { ID_FIELD: 1 })),
            Projection::Fields(fields) => Ok(Body::Document(
                fields
                    .into_iter()
                    .map(|field| (field, Bson::Int32(1)))
                    .collect(),
            )),
            Projection::Document(document) => Ok(Body::Document(document)),
            Projection::Encoded(encoded) => {
                encoded.validate("query fields")?;
                Ok(Body::Encoded(encoded))
            }
        }
    }

    /// Reads a projection from a loosely typed option value.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] unless the value is a document or
    /// an array of field names.
    pub fn from_bson(value: &Bson) -> CommandResult<Self> {
        match value {
            Bson::Document(document) => Ok(Projection::Document(document.clone())),
            Bson::Array(items) => items
                .iter()
                .map(|item| match item {
                    Bson::String(field) => Ok(field.clone()),
                    other => Err(CommandError::Validation(format!(
                        "projection fields must be strings, got {}",
                        other
                    ))),
                })
                .collect::<CommandResult<Vec<_>>>()
                .map(Projection::Fields),
            other => Err(CommandError::Validation(format!("unsupported projection value {}", other))),
        }
    }
}

impl From<Document> for Projection {
    fn from(document: Document) -> Self {
        Projection::Document(document)
    }
}

impl From<Vec<String>> for Projection {
    fn from(fields: Vec<String>) -> Self {
        Projection::Fields(fields)
    }
}

impl From<Vec<&str>> for Projection {
    fn from(fields: Vec<&str>) -> Self {
        Projection::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<EncodedDocument> for Projection {
    fn from(encoded: EncodedDocument) -> Self {
        Projection::Encoded(encoded)
    }
}

/// Returns `true` if the document has a non-null `_id`.
pub fn has_id(document: &Document) -> bool {
    !matches!(document.get(ID_FIELD), None | Some(Bson::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_empty_document() -> EncodedDocument {
        EncodedDocument::new(vec![5, 0, 0, 0, 0])
    }

    #[test]
    fn encoded_length_must_match_prefix() {
        assert!(encoded_empty_document().validate("query selector").is_ok());

        let err = EncodedDocument::new(vec![9, 0, 0, 0, 0])
            .validate("query selector")
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::Validation(
                "query selector raw message size does not match message header size [5] != [9]".into()
            ),
        );

        assert!(EncodedDocument::new(vec![5, 0]).validate("query fields").is_err());
    }

    #[test]
    fn id_selector_expands_to_id_document() {
        let id = DocumentId::from_time(7);
        let body = Selector::from(id.clone()).into_body().unwrap();

        assert_eq!(body, Body::Document(doc! { "_id": id }));
    }

    #[test]
    fn encoded_selector_cannot_be_embedded() {
        let selector = Selector::from(encoded_empty_document());
        assert!(selector.into_document().unwrap_err().is_validation());
    }

    #[test]
    fn field_list_projection() {
        assert_eq!(
            Projection::from(vec!["a", "b"]).into_body().unwrap(),
            Body::Document(doc! { "a": 1, "b": 1 }),
        );
        assert_eq!(
            Projection::Fields(vec![]).into_body().unwrap(),
            Body::Document(doc! { "_id": 1 }),
        );
        assert!(Projection::from(EncodedDocument::new(vec![1, 2, 3, 4, 5])).into_body().is_err());
    }

    #[test]
    fn id_presence() {
        assert!(!has_id(&doc! { "a": 1 }));
        assert!(!has_id(&doc! { "_id": Bson::Null }));
        assert!(has_id(&doc! { "_id": 0 }));
    }
}
