use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use crate::schema::{CollectionSchema, IndexSpec};

static SCHEMAS: LazyLock<RwLock<HashMap<String, Arc<CollectionSchema>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

static INDEXES: LazyLock<RwLock<HashMap<String, Vec<IndexSpec>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Process-wide registry of declared collection schemas.
///
/// Register during startup; the registry is read on every sanitized
/// operation. Tests use [`SchemaRegistry::clear`] to isolate state.
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn register(collection: impl Into<String>, schema: CollectionSchema) {
        SCHEMAS
            .write()
            .expect("schema registry poisoned")
            .insert(collection.into(), Arc::new(schema));
    }

    pub fn get(collection: &str) -> Option<Arc<CollectionSchema>> {
        SCHEMAS
            .read()
            .expect("schema registry poisoned")
            .get(collection)
            .cloned()
    }

    /// Registered collection names, sorted for stable output.
    pub fn collections() -> Vec<String> {
        let mut names: Vec<String> = SCHEMAS
            .read()
            .expect("schema registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn clear() {
        SCHEMAS.write().expect("schema registry poisoned").clear();
    }
}

/// Process-wide registry of declared secondary indexes.
pub struct IndexRegistry;

impl IndexRegistry {
    pub fn register(collection: impl Into<String>, index: IndexSpec) {
        INDEXES
            .write()
            .expect("index registry poisoned")
            .entry(collection.into())
            .or_default()
            .push(index);
    }

    pub fn get(collection: &str) -> Vec<IndexSpec> {
        INDEXES
            .read()
            .expect("index registry poisoned")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear() {
        INDEXES.write().expect("index registry poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SortOrder;
    use crate::schema::{FieldKind, FieldSpec};

    // Registry state is process-wide; this test uses its own collection names
    // to avoid interfering with other tests.
    #[test]
    fn register_get_and_clear() {
        let name = "registry_test_users";
        SchemaRegistry::register(
            name,
            CollectionSchema::new(vec![FieldSpec::new("email", FieldKind::string())]),
        );

        let schema = SchemaRegistry::get(name).expect("schema registered");
        assert_eq!(schema.field_names(), vec!["email"]);
        assert!(SchemaRegistry::collections().contains(&name.to_string()));

        IndexRegistry::register(
            name,
            IndexSpec::new(
                "registry_test_idx",
                vec![("email".to_string(), SortOrder::Ascending)],
            ),
        );
        assert_eq!(IndexRegistry::get(name).len(), 1);
        assert!(IndexRegistry::get("registry_test_missing").is_empty());
    }
}
