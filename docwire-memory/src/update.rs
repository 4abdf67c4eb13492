//! Update-document application: `$set`, `$unset`, `$inc` or whole-document
//! replacement.

use bson::{Bson, Document, oid::ObjectId};

use docwire_core::{
    document::ID_FIELD,
    error::{CommandError, CommandResult},
};

use crate::evaluator::lookup;

fn server_error(message: impl Into<String>, code: i32) -> CommandError {
    CommandError::Server { message: message.into(), code: Some(code) }
}

/// Returns `true` if the update is made of modifiers rather than a
/// replacement document.
pub(crate) fn is_modifier_update(update: &Document) -> bool {
    update
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

/// Applies `update` to `target` in place.
///
/// # Errors
///
/// Returns [`CommandError::Server`] for mixed or unknown modifiers, an
/// attempt to change `_id`, or `$inc` on a non-number.
pub(crate) fn apply_update(target: &mut Document, update: &Document) -> CommandResult<()> {
    if !is_modifier_update(update) {
        return replace(target, update);
    }

    for (modifier, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(server_error(format!("Modifier {} allowed for objects only", modifier), 10153));
        };

        for (path, value) in fields {
            if path == ID_FIELD {
                return Err(server_error("Mod on _id not allowed", 10148));
            }

            match modifier.as_str() {
                "$set" => set_path(target, path, value.clone())?,
                "$unset" => unset_path(target, path),
                "$inc" => {
                    let incremented = increment(lookup(target, path), value)?;
                    set_path(target, path, incremented)?;
                }
                other => {
                    return Err(server_error(format!("Invalid modifier specified {}", other), 10147));
                }
            }
        }
    }

    Ok(())
}

fn replace(target: &mut Document, replacement: &Document) -> CommandResult<()> {
    if replacement.keys().any(|key| key.starts_with('$')) {
        return Err(server_error("modifiers and non-modifiers cannot be mixed", 10154));
    }

    let id = target.get(ID_FIELD).cloned();
    match (id, replacement.get(ID_FIELD)) {
        (Some(current), Some(requested)) if &current != requested => {
            Err(server_error("cannot change _id of a document", 13596))
        }
        (Some(current), None) => {
            let mut replaced = Document::new();
            replaced.insert(ID_FIELD, current);
            for (key, value) in replacement {
                replaced.insert(key.clone(), value.clone());
            }
            *target = replaced;
            Ok(())
        }
        _ => {
            *target = replacement.clone();
            Ok(())
        }
    }
}

fn increment(current: Option<&Bson>, by: &Bson) -> CommandResult<Bson> {
    let non_number = || server_error("Cannot apply $inc modifier to non-number", 10140);

    match (current, by) {
        (None, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => Ok(by.clone()),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b)))),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Ok(Bson::Int64(i64::from(*a) + b)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Ok(Bson::Int64(a + i64::from(*b))),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Ok(Bson::Int64(a + b)),
        (Some(current), by) => match (as_f64(current), as_f64(by)) {
            (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
            _ => Err(non_number()),
        },
        _ => Err(non_number()),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> CommandResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => Err(server_error(format!("cannot use the part ({}) of ({}) to traverse the element", head, path), 16837)),
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Builds the document an upsert inserts: equality fields of the selector
/// with the update applied, or the replacement itself.
pub(crate) fn upsert_document(selector: &Document, update: &Document) -> CommandResult<Document> {
    let mut document = if is_modifier_update(update) {
        let mut seed = Document::new();
        for (field, value) in selector {
            let is_operator = matches!(value, Bson::Document(inner) if inner.keys().any(|k| k.starts_with('$')));
            if !field.starts_with('$') && !is_operator {
                set_path(&mut seed, field, value.clone())?;
            }
        }
        apply_update(&mut seed, update)?;
        seed
    } else {
        let mut seed = Document::new();
        if let Some(id) = selector.get(ID_FIELD) {
            seed.insert(ID_FIELD, id.clone());
        }
        replace(&mut seed, update)?;
        seed
    };

    if !document.contains_key(ID_FIELD) {
        let mut with_id = Document::new();
        with_id.insert(ID_FIELD, ObjectId::new());
        for (key, value) in document {
            with_id.insert(key, value);
        }
        document = with_id;
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn modifiers() {
        let mut document = doc! { "_id": 1, "n": 1, "gone": true };
        apply_update(
            &mut document,
            &doc! { "$inc": { "n": 2 }, "$set": { "a.b": "x" }, "$unset": { "gone": 1 } },
        )
        .unwrap();

        assert_eq!(document, doc! { "_id": 1, "n": 3, "a": { "b": "x" } });
    }

    #[test]
    fn replacement_keeps_id() {
        let mut document = doc! { "_id": 1, "n": 1 };
        apply_update(&mut document, &doc! { "m": 2 }).unwrap();
        assert_eq!(document, doc! { "_id": 1, "m": 2 });

        let err = apply_update(&mut document, &doc! { "_id": 2 }).unwrap_err();
        assert_eq!(err, CommandError::Server { message: "cannot change _id of a document".into(), code: Some(13596) });
    }

    #[test]
    fn inc_rejects_non_numbers() {
        let mut document = doc! { "s": "text" };
        let err = apply_update(&mut document, &doc! { "$inc": { "s": 1 } }).unwrap_err();

        assert!(matches!(err, CommandError::Server { code: Some(10140), .. }));
    }

    #[test]
    fn upserts_seed_from_selector() {
        let document = upsert_document(&doc! { "_id": 5, "a": 1, "b": { "$gt": 0 } }, &doc! { "$set": { "c": 2 } }).unwrap();
        assert_eq!(document, doc! { "_id": 5, "a": 1, "c": 2 });

        let document = upsert_document(&doc! { "a": 1 }, &doc! { "x": 1 }).unwrap();
        assert!(document.get_object_id("_id").is_ok());
        assert_eq!(document.get_i32("x").unwrap(), 1);
    }
}
