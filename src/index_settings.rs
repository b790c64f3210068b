//! Transforms applied to a source index's settings and mappings before the
//! destination index is created, plus the boolean-coercion script attached
//! to reindex requests.

use serde_json::{Map, Value, json};

use crate::cluster::{FlatSettings, ReindexScript};

/// Flat settings that never transfer to a new index.
const REMOVED_SETTINGS: &[&str] = &[
    "index.uuid",
    "index.blocks.write",
    "index.creation_date",
    "index.provided_name",
    "index.legacy",
    "index.mapping.single_type",
    "index.version.created",
    "index.version.upgraded",
];

/// Allocation and routing settings are tied to the old index's shards.
const REMOVED_SETTING_PREFIXES: &[&str] = &["index.routing.", "index.allocation."];

/// Keys that belong to a typeless mapping body. A single top-level key
/// outside this set is a legacy per-type wrapper.
const MAPPING_BODY_KEYS: &[&str] = &[
    "properties",
    "dynamic",
    "dynamic_templates",
    "date_detection",
    "numeric_detection",
    "_all",
    "_meta",
    "_routing",
    "_source",
];

/// Unwrap a legacy single-type mapping to its typeless body. Already
/// typeless mappings pass through unchanged.
pub fn mapping_body(mappings: &Map<String, Value>) -> Map<String, Value> {
    if mappings.len() == 1 {
        if let Some((key, value)) = mappings.iter().next() {
            if !MAPPING_BODY_KEYS.contains(&key.as_str()) {
                if let Some(body) = value.as_object() {
                    return body.clone();
                }
            }
        }
    }
    mappings.clone()
}

/// Derive the destination index's settings and mappings from the source's.
/// The write block and non-transferable settings are stripped, replicas are
/// held at zero for the duration of the copy, the per-type mapping wrapper
/// is unwrapped, and `_all` is dropped.
pub fn transform_flat_settings(flat: &FlatSettings) -> FlatSettings {
    let mut settings = flat.settings.clone();
    settings.retain(|key, _| {
        !REMOVED_SETTINGS.contains(&key.as_str())
            && !REMOVED_SETTING_PREFIXES.iter().any(|p| key.starts_with(p))
    });
    settings.insert("index.number_of_replicas".to_string(), json!(0));

    let mut mappings = mapping_body(&flat.mappings);
    mappings.remove("_all");

    FlatSettings { settings, mappings }
}

/// Path segments of every boolean-typed field in a typeless mapping body,
/// including fields nested under object properties.
pub fn boolean_field_paths(mapping_body: &Map<String, Value>) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    if let Some(props) = mapping_body.get("properties").and_then(Value::as_object) {
        let mut prefix = Vec::new();
        collect_boolean_paths(props, &mut prefix, &mut paths);
    }
    paths
}

fn collect_boolean_paths(
    properties: &Map<String, Value>,
    prefix: &mut Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    for (name, field) in properties {
        let Some(field) = field.as_object() else {
            continue;
        };
        prefix.push(name.clone());
        if field.get("type").and_then(Value::as_str) == Some("boolean") {
            out.push(prefix.clone());
        }
        if let Some(nested) = field.get("properties").and_then(Value::as_object) {
            collect_boolean_paths(nested, prefix, out);
        }
        prefix.pop();
    }
}

/// Painless source rewriting legacy boolean representations in each copied
/// document. Opaque text parameterised by `booleanFieldPaths`; the cluster
/// receives it verbatim.
const BOOLEAN_COERCION_SCRIPT: &str = r#"
for (def path : params.booleanFieldPaths) {
  def parent = ctx._source;
  for (int i = 0; i < path.size() - 1 && parent != null; i++) {
    parent = parent[path[i]];
  }
  if (parent == null) {
    continue;
  }
  def leaf = path[path.size() - 1];
  def value = parent[leaf];
  if (value == 'yes' || value == '1' || value == 1 || value == 'on') {
    parent[leaf] = true;
  } else if (value == 'no' || value == '0' || value == 0 || value == 'off') {
    parent[leaf] = false;
  }
}
"#;

pub fn boolean_coercion_script(boolean_field_paths: Vec<Vec<String>>) -> ReindexScript {
    ReindexScript {
        lang: "painless".to_string(),
        source: BOOLEAN_COERCION_SCRIPT.to_string(),
        params: json!({ "booleanFieldPaths": boolean_field_paths }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(settings: Value, mappings: Value) -> FlatSettings {
        FlatSettings {
            settings: settings.as_object().cloned().unwrap_or_default(),
            mappings: mappings.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn non_transferable_settings_are_stripped() {
        let transformed = transform_flat_settings(&flat(
            json!({
                "index.number_of_shards": "3",
                "index.blocks.write": "true",
                "index.uuid": "Cg0nFoYnQRa0dtu4TgWhFg",
                "index.provided_name": "logs-2019",
                "index.creation_date": "1547586159912",
                "index.routing.allocation.initial_recovery._id": "node-1",
                "index.refresh_interval": "5s"
            }),
            json!({}),
        ));

        assert_eq!(transformed.settings.get("index.number_of_shards"), Some(&json!("3")));
        assert_eq!(transformed.settings.get("index.refresh_interval"), Some(&json!("5s")));
        assert_eq!(transformed.settings.get("index.number_of_replicas"), Some(&json!(0)));
        assert!(!transformed.settings.contains_key("index.blocks.write"));
        assert!(!transformed.settings.contains_key("index.uuid"));
        assert!(!transformed.settings.contains_key("index.provided_name"));
        assert!(!transformed.settings.contains_key("index.creation_date"));
        assert!(
            !transformed
                .settings
                .contains_key("index.routing.allocation.initial_recovery._id")
        );
    }

    #[test]
    fn per_type_mapping_wrapper_is_unwrapped() {
        let transformed = transform_flat_settings(&flat(
            json!({}),
            json!({"doc": {"properties": {"value": {"type": "boolean"}}}}),
        ));
        assert_eq!(
            Value::Object(transformed.mappings),
            json!({"properties": {"value": {"type": "boolean"}}})
        );
    }

    #[test]
    fn typeless_mappings_pass_through_and_all_is_dropped() {
        let transformed = transform_flat_settings(&flat(
            json!({}),
            json!({
                "_all": {"enabled": true},
                "properties": {"name": {"type": "text"}}
            }),
        ));
        assert_eq!(
            Value::Object(transformed.mappings),
            json!({"properties": {"name": {"type": "text"}}})
        );
    }

    #[test]
    fn all_is_dropped_inside_type_wrapper() {
        let transformed = transform_flat_settings(&flat(
            json!({}),
            json!({"doc": {
                "_all": {"enabled": true},
                "properties": {"value": {"type": "boolean"}}
            }}),
        ));
        assert!(!transformed.mappings.contains_key("_all"));
        assert!(transformed.mappings.contains_key("properties"));
    }

    #[test]
    fn boolean_paths_cover_nested_objects() {
        let body = json!({
            "properties": {
                "enabled": {"type": "boolean"},
                "name": {"type": "keyword"},
                "flags": {
                    "properties": {
                        "active": {"type": "boolean"},
                        "labels": {"properties": {"hidden": {"type": "boolean"}}}
                    }
                }
            }
        });
        let mut paths = boolean_field_paths(body.as_object().unwrap());
        paths.sort();
        assert_eq!(
            paths,
            vec![
                vec!["enabled".to_string()],
                vec!["flags".to_string(), "active".to_string()],
                vec!["flags".to_string(), "labels".to_string(), "hidden".to_string()],
            ]
        );
    }

    #[test]
    fn no_boolean_fields_yields_no_paths() {
        let body = json!({"properties": {"name": {"type": "keyword"}}});
        assert!(boolean_field_paths(body.as_object().unwrap()).is_empty());
    }

    #[test]
    fn script_carries_paths_as_params() {
        let script = boolean_coercion_script(vec![vec!["value".to_string()]]);
        assert_eq!(script.lang, "painless");
        assert_eq!(script.params["booleanFieldPaths"], json!([["value"]]));
        assert!(script.source.contains("booleanFieldPaths"));
    }
}
