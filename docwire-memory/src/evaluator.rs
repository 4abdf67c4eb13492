//! Selector evaluation for the in-memory server.
//!
//! Supports equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
//! `$nin`, `$exists`, and the `$and`/`$or` combinators, on top-level and
//! dotted field paths.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document, oid::ObjectId};

use docwire_core::error::{CommandError, CommandResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Types without an ordering; compared by raw equality.
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Looks up a dotted path such as `"address.city"`.
pub(crate) fn lookup<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => match document.get(head)? {
            Bson::Document(inner) => lookup(inner, rest),
            _ => None,
        },
    }
}

/// Matches documents against a selector document.
pub(crate) struct SelectorEvaluator<'a> {
    selector: &'a Document,
}

impl<'a> SelectorEvaluator<'a> {
    pub fn new(selector: &'a Document) -> Self {
        Self { selector }
    }

    /// # Errors
    ///
    /// Returns [`CommandError::Server`] for operators the emulator does not
    /// support.
    pub fn matches(&self, document: &Document) -> CommandResult<bool> {
        for (field, condition) in self.selector {
            let matched = match field.as_str() {
                "$and" => self.all_of(condition, document)?,
                "$or" => self.any_of(condition, document)?,
                _ if field.starts_with('$') => {
                    return Err(unsupported(field));
                }
                _ => matches_condition(lookup(document, field), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter<'d>(&self, documents: impl IntoIterator<Item = &'d Document>) -> CommandResult<Vec<&'d Document>> {
        let mut matched = Vec::new();
        for document in documents {
            if self.matches(document)? {
                matched.push(document);
            }
        }
        Ok(matched)
    }

    fn clauses(condition: &'a Bson) -> CommandResult<impl Iterator<Item = &'a Document>> {
        match condition {
            Bson::Array(clauses) => Ok(clauses.iter().filter_map(Bson::as_document)),
            _ => Err(CommandError::server("$and/$or expect an array of selectors")),
        }
    }

    fn all_of(&self, condition: &'a Bson, document: &Document) -> CommandResult<bool> {
        for clause in Self::clauses(condition)? {
            if !SelectorEvaluator::new(clause).matches(document)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any_of(&self, condition: &'a Bson, document: &Document) -> CommandResult<bool> {
        for clause in Self::clauses(condition)? {
            if SelectorEvaluator::new(clause).matches(document)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn unsupported(operator: &str) -> CommandError {
    CommandError::Server { message: format!("unsupported query operator {}", operator), code: Some(2) }
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(operators)
            if !operators.is_empty() && operators.keys().all(|key| key.starts_with('$')) =>
        {
            Some(operators)
        }
        _ => None,
    }
}

/// Equality, including "any array element equals".
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let expected = Comparable::from(expected);
    match value {
        None => expected == Comparable::Null,
        Some(Bson::Array(items)) if !matches!(expected, Comparable::Array(_)) => items
            .iter()
            .any(|item| Comparable::from(item) == expected),
        Some(value) => Comparable::from(value) == expected,
    }
}

fn ordered(value: Option<&Bson>, bound: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    Comparable::from(value)
        .partial_cmp(&Comparable::from(bound))
        .is_some_and(accept)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> CommandResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals(value, condition));
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, Ordering::is_gt),
            "$gte" => ordered(value, operand, Ordering::is_ge),
            "$lt" => ordered(value, operand, Ordering::is_lt),
            "$lte" => ordered(value, operand, Ordering::is_le),
            "$in" | "$nin" => {
                let Bson::Array(candidates) = operand else {
                    return Err(CommandError::server(format!("{} needs an array", operator)));
                };
                let found = candidates
                    .iter()
                    .any(|candidate| equals(value, candidate));
                if operator == "$in" { found } else { !found }
            }
            "$exists" => {
                let should_exist = !matches!(operand, Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0));
                value.is_some() == should_exist
            }
            other => return Err(unsupported(other)),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Orders two documents by an order document such as `{a: 1, b: -1}`.
pub(crate) fn compare_by(order: &Document, left: &Document, right: &Document) -> Ordering {
    for (field, direction) in order {
        let descending = matches!(direction, Bson::Int32(d) if *d < 0)
            || matches!(direction, Bson::Int64(d) if *d < 0)
            || matches!(direction, Bson::Double(d) if *d < 0.0);

        let a = lookup(left, field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);
        let b = lookup(right, field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);

        let ordering = match (&a, &b) {
            (Comparable::Null, Comparable::Null) => Ordering::Equal,
            (Comparable::Null, _) => Ordering::Less,
            (_, Comparable::Null) => Ordering::Greater,
            _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        };
        let ordering = if descending { ordering.reverse() } else { ordering };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Applies an inclusion (`{a: 1}`) or exclusion (`{a: 0}`) projection.
/// `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let is_excluded = |value: &Bson| matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
        || matches!(value, Bson::Double(d) if *d == 0.0);

    let inclusive = projection
        .iter()
        .any(|(field, value)| field != "_id" && !is_excluded(value));

    if inclusive {
        let mut projected = Document::new();
        let keep_id = !projection.get("_id").is_some_and(is_excluded);
        for (field, value) in document {
            if (field == "_id" && keep_id) || (field != "_id" && projection.contains_key(field)) {
                projected.insert(field.clone(), value.clone());
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for (field, value) in projection {
            if is_excluded(value) {
                projected.remove(field);
            }
        }
        projected
    }
}
