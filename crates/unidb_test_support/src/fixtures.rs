use serde_json::Value;
use unidb_core::{CollectionSchema, Document, FieldKind, FieldSpec};

/// Build a [`Document`] from a JSON object literal.
///
/// Panics when the value is not an object; fixtures are static.
pub fn doc(value: Value) -> Document {
    value
        .as_object()
        .expect("fixture value must be a JSON object")
        .clone()
}

/// Build a list of documents from JSON object literals.
pub fn docs(values: Vec<Value>) -> Vec<Document> {
    values.into_iter().map(doc).collect()
}

/// The schema most suite tests register for their `users`-like collection.
pub fn users_schema() -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSpec::new("name", FieldKind::string_max(100)).required(),
        FieldSpec::new("email", FieldKind::string()).required(),
        FieldSpec::new("age", FieldKind::integer()),
        FieldSpec::new("role", FieldKind::enumeration(["admin", "member", "guest"])),
        FieldSpec::new("active", FieldKind::Boolean),
    ])
}
