use serde_json::Value;

use unidb_core::{
    DbError, ExplainOutput, FieldKind, Filter, IndexSpec, OperationKind, QueryOptions,
    SchemaRegistry, Update, ValidationIssue, suggest_collection,
};

use crate::database::{Database, parse_operation_name};

/// Per-collection discovery output: declared fields, indexes, document
/// count, and a working example filter for agents to start from.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionDescription {
    pub collection: String,
    pub fields: Vec<FieldDescription>,
    pub indexes: Vec<IndexDescription>,
    pub document_count: u64,
    pub example_filter: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexDescription {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl From<&IndexSpec> for IndexDescription {
    fn from(index: &IndexSpec) -> Self {
        Self {
            name: index.name.clone(),
            fields: index.fields.iter().map(|(field, _)| field.clone()).collect(),
            unique: index.unique,
        }
    }
}

impl Database {
    /// Describe one registered collection.
    pub async fn describe(&self, collection: &str) -> Result<CollectionDescription, DbError> {
        let Some(schema) = SchemaRegistry::get(collection) else {
            return Err(suggest_collection(collection, &SchemaRegistry::collections())
                .with_backend(self.backend()));
        };

        let facts = self.adapter_facts(collection).await?;
        Ok(CollectionDescription {
            collection: collection.to_string(),
            fields: schema
                .fields
                .iter()
                .map(|spec| FieldDescription {
                    name: spec.name.clone(),
                    type_name: spec.kind.type_name(),
                    required: spec.required,
                    allowed: match &spec.kind {
                        FieldKind::String { allowed, .. } => allowed.clone(),
                        _ => None,
                    },
                })
                .collect(),
            indexes: facts.indexes.iter().map(IndexDescription::from).collect(),
            document_count: facts.document_count,
            example_filter: schema.example_filter(),
        })
    }

    /// Describe every registered collection.
    pub async fn describe_all(&self) -> Result<Vec<CollectionDescription>, DbError> {
        let mut described = Vec::new();
        for collection in SchemaRegistry::collections() {
            described.push(self.describe(&collection).await?);
        }
        Ok(described)
    }

    /// Dry-run a filter and/or document against the registered schema.
    ///
    /// Content problems come back as issues, not errors; only an unknown
    /// collection fails.
    pub fn validate(
        &self,
        collection: &str,
        filter: Option<&Value>,
        document: Option<&Value>,
    ) -> Result<Vec<ValidationIssue>, DbError> {
        let Some(schema) = SchemaRegistry::get(collection) else {
            return Err(suggest_collection(collection, &SchemaRegistry::collections())
                .with_backend(self.backend()));
        };

        let mut issues = Vec::new();

        if let Some(filter) = filter {
            match Filter::parse(filter) {
                Err(err) => issues.push(ValidationIssue {
                    field: "filter".to_string(),
                    message: err.message,
                    expected: "a valid filter document".to_string(),
                    received: filter.to_string(),
                }),
                Ok(parsed) => {
                    let allowed = schema.field_names();
                    for field in parsed.field_names() {
                        if !allowed.contains(&field) {
                            issues.push(ValidationIssue {
                                field: field.to_string(),
                                message: "field is not part of the schema".to_string(),
                                expected: format!("one of: {}", allowed.join(", ")),
                                received: field.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if let Some(document) = document {
            match document.as_object() {
                Some(doc) => issues.extend(schema.validate_document(doc)),
                None => issues.push(ValidationIssue {
                    field: "document".to_string(),
                    message: "document must be a JSON object".to_string(),
                    expected: "object".to_string(),
                    received: document.to_string(),
                }),
            }
        }

        Ok(issues)
    }

    /// Emit the native query that would execute, without running it.
    pub fn explain(
        &self,
        operation: &str,
        collection: &str,
        filter: &Value,
        update: Option<&Value>,
        options: Option<&Value>,
    ) -> Result<ExplainOutput, DbError> {
        let operation = parse_operation_name(operation)?;
        let filter = self.prepare_filter(collection, filter)?;
        let update = update.map(Update::parse).transpose()?;
        let options = match options {
            Some(value) => QueryOptions::parse(value)?,
            None => QueryOptions::default(),
        };

        self.explain_parsed(operation, collection, &filter, update.as_ref(), &options)
    }

    fn explain_parsed(
        &self,
        operation: OperationKind,
        collection: &str,
        filter: &Filter,
        update: Option<&Update>,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, DbError> {
        self.adapter_explain(operation, collection, filter, update, options)
    }
}
