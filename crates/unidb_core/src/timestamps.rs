use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::Document;
use crate::update::Update;

/// Timestamp injection policy: disabled, defaults, or an explicit pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampConfig {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl TimestampConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// The `true` configuration: `created_at` / `updated_at`.
    pub fn enabled() -> Self {
        Self {
            created_at: Some("created_at".to_string()),
            updated_at: Some("updated_at".to_string()),
        }
    }

    pub fn with_fields(
        created_at: impl Into<String>,
        updated_at: impl Into<String>,
    ) -> Self {
        Self {
            created_at: Some(created_at.into()),
            updated_at: Some(updated_at.into()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.created_at.is_none() && self.updated_at.is_none()
    }
}

fn timestamp_value(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Attach creation and update timestamps to an insert document.
///
/// Returns a fresh document; the input is never mutated. A field the caller
/// already provided is preserved, even when its value is JSON `null` — an
/// explicit null is the caller's choice.
pub fn inject_insert_timestamps(
    doc: &Document,
    config: &TimestampConfig,
    now: DateTime<Utc>,
) -> Document {
    let mut out = doc.clone();
    if config.is_disabled() {
        return out;
    }

    for field in [&config.created_at, &config.updated_at].into_iter().flatten() {
        if !out.contains_key(field) {
            out.insert(field.clone(), timestamp_value(now));
        }
    }
    out
}

/// Attach the update timestamp to an update document.
///
/// Returns a fresh update. When a `$set` exists, the updated-at field is
/// added iff absent; otherwise a `$set` with just that field is created.
/// Updates never receive a created-at field.
pub fn inject_update_timestamps(
    update: &Update,
    config: &TimestampConfig,
    now: DateTime<Utc>,
) -> Update {
    let mut out = update.clone();
    let Some(updated_at) = &config.updated_at else {
        return out;
    };

    if !out.set.iter().any(|(field, _)| field == updated_at) {
        out.set.push((updated_at.clone(), timestamp_value(now)));
        out.rebuild_raw();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn now_string() -> Value {
        json!("2024-06-01T12:00:00.000Z")
    }

    #[test]
    fn insert_injection_sets_both_fields() {
        let input = doc(json!({"name": "Ada"}));
        let out = inject_insert_timestamps(&input, &TimestampConfig::enabled(), now());

        assert_eq!(out.get("created_at"), Some(&now_string()));
        assert_eq!(out.get("updated_at"), Some(&now_string()));
        assert_eq!(out.get("name"), Some(&json!("Ada")));
        assert!(!input.contains_key("created_at"), "input untouched");
    }

    #[test]
    fn caller_provided_values_win_even_when_null() {
        let input = doc(json!({"name": "Ada", "created_at": null}));
        let out = inject_insert_timestamps(&input, &TimestampConfig::enabled(), now());

        assert_eq!(out.get("created_at"), Some(&Value::Null));
        assert_eq!(out.get("updated_at"), Some(&now_string()));
    }

    #[test]
    fn disabled_config_is_the_identity() {
        let input = doc(json!({"name": "Ada"}));
        let out = inject_insert_timestamps(&input, &TimestampConfig::disabled(), now());
        assert_eq!(out, input);

        let update = Update::parse(&json!({"$inc": {"n": 1}})).unwrap();
        let out = inject_update_timestamps(&update, &TimestampConfig::disabled(), now());
        assert_eq!(out, update);
    }

    #[test]
    fn update_injection_creates_set_when_absent() {
        let update = Update::parse(&json!({"$inc": {"loginCount": 1}})).unwrap();
        let config = TimestampConfig::with_fields("created_at", "updated_at");
        let out = inject_update_timestamps(&update, &config, now());

        assert_eq!(
            out.set,
            vec![("updated_at".to_string(), now_string())]
        );
        assert_eq!(out.inc, update.inc);
        assert_eq!(
            out.as_json(),
            &json!({"$set": {"updated_at": "2024-06-01T12:00:00.000Z"}, "$inc": {"loginCount": 1}})
        );
        // Original unmodified.
        assert!(update.set.is_empty());
    }

    #[test]
    fn update_injection_respects_existing_updated_at() {
        let update =
            Update::parse(&json!({"$set": {"updated_at": "caller-chosen"}})).unwrap();
        let out = inject_update_timestamps(&update, &TimestampConfig::enabled(), now());
        assert_eq!(out.set, update.set);
    }

    #[test]
    fn updates_never_gain_created_at() {
        let update = Update::parse(&json!({"$set": {"name": "Ada"}})).unwrap();
        let out = inject_update_timestamps(&update, &TimestampConfig::enabled(), now());
        assert!(out.set.iter().all(|(f, _)| f != "created_at"));
        assert!(out.set.iter().any(|(f, _)| f == "updated_at"));
    }

    #[test]
    fn custom_field_names_are_used() {
        let config = TimestampConfig::with_fields("createdOn", "modifiedOn");
        let out = inject_insert_timestamps(&doc(json!({})), &config, now());
        assert!(out.contains_key("createdOn"));
        assert!(out.contains_key("modifiedOn"));
    }
}
