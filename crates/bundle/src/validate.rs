use serde_json::Value;

fn push(errors: &mut Vec<String>, path: &str, message: &str) {
    errors.push(format!("{path}: {message}"));
}

fn require_str(errors: &mut Vec<String>, obj: &Value, key: &str, path: &str) {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(_) => push(errors, &format!("{path}.{key}"), "expected a non-empty string"),
        None => push(errors, &format!("{path}.{key}"), "missing required field"),
    }
}

/// Validate a bundle against the v0.1 shape.  Returns human-readable errors
/// (empty when valid); never panics on foreign shapes.
pub fn validate_bundle(bundle: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if !bundle.is_object() {
        push(&mut errors, "$", "bundle must be an object");
        return errors;
    }

    require_str(&mut errors, bundle, "bundle_id", "$");
    require_str(&mut errors, bundle, "template", "$");
    require_str(&mut errors, bundle, "created_at", "$");

    match bundle.get("scope") {
        Some(scope) if scope.is_object() => {
            if !scope
                .get("time_window_days")
                .map(Value::is_u64)
                .unwrap_or(false)
            {
                push(&mut errors, "$.scope.time_window_days", "expected an integer");
            }
            require_str(&mut errors, scope, "since", "$.scope");
            require_str(&mut errors, scope, "workspace", "$.scope");
        }
        _ => push(&mut errors, "$.scope", "missing or not an object"),
    }

    match bundle.get("source_mu_ids") {
        Some(Value::Array(ids)) => {
            for (i, id) in ids.iter().enumerate() {
                if !id.is_string() {
                    push(&mut errors, &format!("$.source_mu_ids[{i}]"), "expected a string");
                }
            }
        }
        _ => push(&mut errors, "$.source_mu_ids", "missing or not an array"),
    }

    match bundle.get("query_on") {
        Some(query_on) if query_on.is_object() => {
            if query_on.get("query").is_none() {
                push(&mut errors, "$.query_on.query", "missing required field");
            }
        }
        _ => push(&mut errors, "$.query_on", "missing or not an object"),
    }

    match bundle.get("evidence") {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_object() {
                    push(&mut errors, &format!("$.evidence[{i}]"), "expected an object");
                    continue;
                }
                require_str(&mut errors, item, "mu_id", &format!("$.evidence[{i}]"));
                if let Some(pointer) = item.get("pointer") {
                    if !pointer.is_array() {
                        push(
                            &mut errors,
                            &format!("$.evidence[{i}].pointer"),
                            "expected an array",
                        );
                    }
                }
            }
        }
        _ => push(&mut errors, "$.evidence", "missing or not an array"),
    }

    errors
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::validate_bundle;

    fn minimal_bundle() -> serde_json::Value {
        json!({
            "bundle_id": "bndl_20260221000000",
            "template": "time_overview_v1",
            "scope": {"time_window_days": 7, "since": "2026-02-14T00:00:00Z", "workspace": "ws"},
            "source_mu_ids": ["mu_1"],
            "created_at": "2026-02-21T00:00:00Z",
            "query_on": {"query": "trip"},
            "evidence": [{"mu_id": "mu_1"}],
        })
    }

    #[test]
    fn minimal_bundle_is_valid() {
        assert!(validate_bundle(&minimal_bundle()).is_empty());
    }

    #[test]
    fn missing_fields_are_reported_with_paths() {
        let mut bundle = minimal_bundle();
        bundle["scope"]["time_window_days"] = json!("seven");
        bundle.as_object_mut().unwrap().remove("bundle_id");
        bundle["evidence"][0] = json!({"snippet": "no id"});

        let errors = validate_bundle(&bundle);
        assert!(errors.iter().any(|e| e.contains("$.bundle_id")));
        assert!(errors.iter().any(|e| e.contains("$.scope.time_window_days")));
        assert!(errors.iter().any(|e| e.contains("$.evidence[0].mu_id")));
    }

    #[test]
    fn non_object_input_is_one_error() {
        assert_eq!(validate_bundle(&json!([1, 2])).len(), 1);
    }
}
