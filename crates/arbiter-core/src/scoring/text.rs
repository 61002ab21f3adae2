//! Text and JSON helpers shared by scoring and anti-cheat.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::domain::TaskType;

/// Interpret a payload as a JSON object.
///
/// Objects are used as-is; strings are parsed as JSON text. Anything else,
/// including a string holding a non-object, yields `None`.
pub fn as_object(payload: &Value) -> Option<Map<String, Value>> {
    match payload {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

/// Lowercased alphanumeric runs.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Split prose on sentence terminators, dropping empty fragments.
pub fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '。', '！', '？'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Every string leaf of a JSON value, depth first.
pub fn string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| string_leaves(v, out)),
        _ => {}
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn list_field<'a>(obj: &'a Map<String, Value>, key: &str, field: &str) -> Vec<&'a str> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|item| str_field(item, field))
                .collect()
        })
        .unwrap_or_default()
}

/// The narrative prose of an output, joined with spaces.
pub fn prose(task_type: TaskType, obj: &Map<String, Value>) -> String {
    let parts: Vec<&str> = match task_type {
        TaskType::Blueprint => ["setting", "core_conflict"]
            .iter()
            .filter_map(|k| str_field(obj, k))
            .collect(),
        TaskType::Characters => list_field(obj, "characters", "background"),
        TaskType::StoryArc => list_field(obj, "chapters", "description"),
        TaskType::Chapters => list_field(obj, "chapters", "content"),
    };
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": {"z": true, "y": [3, {"k": 1, "j": 2}]}});
        let b = json!({"a": {"y": [3, {"j": 2, "k": 1}], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn string_payloads_are_parsed_as_json_text() {
        let parsed = as_object(&Value::String(r#"{"title": "Drift"}"#.into())).unwrap();
        assert_eq!(parsed["title"], "Drift");
        assert!(as_object(&Value::String("not json".into())).is_none());
        assert!(as_object(&json!([1, 2])).is_none());
        assert!(as_object(&Value::Null).is_none());
    }

    #[test]
    fn tokens_are_lowercase_alphanumeric_runs() {
        assert_eq!(tokens("The Tide's edge, 2 AM!"), vec!["the", "tide", "s", "edge", "2", "am"]);
    }

    #[test]
    fn sentences_split_on_terminators() {
        assert_eq!(sentences("One. Two!  Three? "), vec!["One", "Two", "Three"]);
        assert!(sentences("   ").is_empty());
    }

    #[test]
    fn prose_extracts_stage_specific_fields() {
        let obj = as_object(&json!({
            "chapters": [{"content": "First."}, {"content": "Second."}, {"title": "no content"}]
        }))
        .unwrap();
        assert_eq!(prose(TaskType::Chapters, &obj), "First. Second.");
        assert_eq!(prose(TaskType::StoryArc, &obj), "");
    }
}
