use crate::error::DbError;
use crate::events::{Event, EventBus};
use crate::filter::Filter;
use crate::options::ConfirmToken;
use crate::receipt::OperationKind;

/// Hard preconditions on destructive or unbounded operations.
///
/// Evaluated before the adapter call when enabled:
///
/// - `delete_many` with an empty filter requires the `DELETE_ALL` token
/// - `update_many` with an empty filter requires the `UPDATE_ALL` token
/// - `delete_one` with an empty filter always blocks
/// - `query_many` without a limit blocks
///
/// A block publishes a `guardrail-blocked` event before raising.
pub fn check_guardrails(
    enabled: bool,
    operation: OperationKind,
    collection: &str,
    filter: &Filter,
    confirm: Option<ConfirmToken>,
    limit: Option<u64>,
    bus: Option<&EventBus>,
) -> Result<(), DbError> {
    if !enabled {
        return Ok(());
    }

    let violation = match operation {
        OperationKind::DeleteMany
            if filter.is_empty() && confirm != Some(ConfirmToken::DeleteAll) =>
        {
            Some((
                "delete_many with an empty filter deletes every document".to_string(),
                format!(
                    "Pass a filter, or confirm with delete_many(\"{}\", {{}}, {{confirm: \
                     \"DELETE_ALL\"}}) to delete everything.",
                    collection
                ),
            ))
        }
        OperationKind::UpdateMany
            if filter.is_empty() && confirm != Some(ConfirmToken::UpdateAll) =>
        {
            Some((
                "update_many with an empty filter modifies every document".to_string(),
                format!(
                    "Pass a filter, or confirm with update_many(\"{}\", {{}}, update, \
                     {{confirm: \"UPDATE_ALL\"}}) to update everything.",
                    collection
                ),
            ))
        }
        OperationKind::DeleteOne if filter.is_empty() => Some((
            "delete_one with an empty filter targets an arbitrary document".to_string(),
            format!(
                "Pass a filter identifying the document, e.g. delete_one(\"{}\", \
                 {{\"id\": 123}}).",
                collection
            ),
        )),
        OperationKind::QueryMany if limit.is_none() => Some((
            "query_many without a limit can return an unbounded result set".to_string(),
            format!(
                "Pass a limit, e.g. query_many(\"{}\", filter, {{limit: 100}}).",
                collection
            ),
        )),
        _ => None,
    };

    let Some((reason, fix)) = violation else {
        return Ok(());
    };

    if let Some(bus) = bus {
        bus.publish(&Event::GuardrailBlocked {
            collection: collection.to_string(),
            operation,
            reason: reason.clone(),
        });
    }

    Err(DbError::guardrail_blocked(format!("Blocked: {}.", reason), fix)
        .with_collection(collection)
        .with_operation(operation.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn non_empty() -> Filter {
        Filter::parse(&json!({"id": 1})).unwrap()
    }

    #[test]
    fn disabled_guardrails_never_block() {
        for op in [
            OperationKind::DeleteMany,
            OperationKind::UpdateMany,
            OperationKind::DeleteOne,
            OperationKind::QueryMany,
        ] {
            check_guardrails(false, op, "users", &Filter::empty(), None, None, None).unwrap();
        }
    }

    #[test]
    fn delete_many_requires_the_delete_all_token() {
        let err = check_guardrails(
            true,
            OperationKind::DeleteMany,
            "users",
            &Filter::empty(),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardrailBlocked);
        assert!(err.fix.contains("DELETE_ALL"));

        check_guardrails(
            true,
            OperationKind::DeleteMany,
            "users",
            &Filter::empty(),
            Some(ConfirmToken::DeleteAll),
            None,
            None,
        )
        .unwrap();

        check_guardrails(
            true,
            OperationKind::DeleteMany,
            "users",
            &non_empty(),
            None,
            None,
            None,
        )
        .unwrap();
    }

    #[test]
    fn the_wrong_token_does_not_unlock() {
        let err = check_guardrails(
            true,
            OperationKind::DeleteMany,
            "users",
            &Filter::empty(),
            Some(ConfirmToken::UpdateAll),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardrailBlocked);
    }

    #[test]
    fn update_many_requires_the_update_all_token() {
        let err = check_guardrails(
            true,
            OperationKind::UpdateMany,
            "users",
            &Filter::empty(),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(err.fix.contains("UPDATE_ALL"));

        check_guardrails(
            true,
            OperationKind::UpdateMany,
            "users",
            &Filter::empty(),
            Some(ConfirmToken::UpdateAll),
            None,
            None,
        )
        .unwrap();
    }

    #[test]
    fn delete_one_with_empty_filter_always_blocks() {
        let err = check_guardrails(
            true,
            OperationKind::DeleteOne,
            "users",
            &Filter::empty(),
            Some(ConfirmToken::DeleteAll),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardrailBlocked);
    }

    #[test]
    fn query_many_requires_a_limit() {
        let err = check_guardrails(
            true,
            OperationKind::QueryMany,
            "users",
            &non_empty(),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(err.fix.contains("limit"));

        check_guardrails(
            true,
            OperationKind::QueryMany,
            "users",
            &non_empty(),
            None,
            Some(100),
            None,
        )
        .unwrap();
    }

    #[test]
    fn other_operations_are_untouched() {
        check_guardrails(
            true,
            OperationKind::UpdateOne,
            "users",
            &Filter::empty(),
            None,
            None,
            None,
        )
        .unwrap();
        check_guardrails(
            true,
            OperationKind::QueryOne,
            "users",
            &Filter::empty(),
            None,
            None,
            None,
        )
        .unwrap();
    }

    #[test]
    fn a_block_publishes_the_event_first() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            None,
            Arc::new(move |event| {
                if let Event::GuardrailBlocked {
                    collection,
                    operation,
                    ..
                } = event
                {
                    sink.lock().unwrap().push((collection.clone(), *operation));
                }
            }),
        );

        let _ = check_guardrails(
            true,
            OperationKind::DeleteMany,
            "users",
            &Filter::empty(),
            None,
            None,
            Some(&bus),
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("users".to_string(), OperationKind::DeleteMany)]
        );
    }
}
