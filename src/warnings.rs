//! Advisory warning detection over a source index's settings and mappings.
//! Warnings never block operation creation; they are purely data-driven
//! predicates with no cluster calls.

use serde_json::Value;

use crate::cluster::FlatSettings;
use crate::index_settings::{boolean_field_paths, mapping_body};
use crate::models::ReindexWarning;

/// Name prefix identifying legacy APM indices.
const APM_INDEX_PREFIX: &str = "apm-";

/// Mapping `_meta.version` major at which APM indices no longer need the
/// migration.
const APM_CURRENT_MAJOR: u64 = 7;

pub fn detect(index_name: &str, flat: &FlatSettings) -> Vec<ReindexWarning> {
    let body = mapping_body(&flat.mappings);

    let mut warnings = Vec::new();
    if body
        .get("_all")
        .and_then(|all| all.get("enabled"))
        .and_then(Value::as_bool)
        == Some(true)
    {
        warnings.push(ReindexWarning::AllField);
    }
    if !boolean_field_paths(&body).is_empty() {
        warnings.push(ReindexWarning::BooleanFields);
    }
    if is_legacy_apm_index(index_name, &body) {
        warnings.push(ReindexWarning::ApmReindex);
    }
    warnings
}

fn is_legacy_apm_index(index_name: &str, mapping_body: &serde_json::Map<String, Value>) -> bool {
    if !index_name.starts_with(APM_INDEX_PREFIX) {
        return false;
    }
    let major = mapping_body
        .get("_meta")
        .and_then(|meta| meta.get("version"))
        .and_then(Value::as_str)
        .and_then(|version| crate::cluster::parse_version(version))
        .map(|(major, _, _)| major);
    match major {
        Some(major) => major < APM_CURRENT_MAJOR,
        // No version marker at all: predates the versioned schema.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat_with_mappings(mappings: Value) -> FlatSettings {
        FlatSettings {
            settings: Default::default(),
            mappings: mappings.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn clean_index_has_no_warnings() {
        let flat = flat_with_mappings(json!({"properties": {"name": {"type": "keyword"}}}));
        assert!(detect("logs-2019", &flat).is_empty());
    }

    #[test]
    fn all_field_detected_through_type_wrapper() {
        let flat = flat_with_mappings(json!({"doc": {
            "_all": {"enabled": true},
            "properties": {"name": {"type": "keyword"}}
        }}));
        assert_eq!(detect("logs-2019", &flat), vec![ReindexWarning::AllField]);
    }

    #[test]
    fn disabled_all_field_is_not_flagged() {
        let flat = flat_with_mappings(json!({"_all": {"enabled": false}}));
        assert!(detect("logs-2019", &flat).is_empty());
    }

    #[test]
    fn boolean_fields_are_flagged() {
        let flat = flat_with_mappings(json!({"doc": {
            "properties": {"value": {"type": "boolean"}}
        }}));
        assert_eq!(detect("logs-2019", &flat), vec![ReindexWarning::BooleanFields]);
    }

    #[test]
    fn apm_index_with_old_meta_version_is_flagged() {
        let flat = flat_with_mappings(json!({
            "_meta": {"version": "6.5.0"},
            "properties": {"name": {"type": "keyword"}}
        }));
        assert_eq!(detect("apm-6.5.0-span", &flat), vec![ReindexWarning::ApmReindex]);

        // Same mapping under a non-APM name is fine.
        assert!(detect("logs-2019", &flat).is_empty());
    }

    #[test]
    fn apm_index_on_current_schema_is_not_flagged() {
        let flat = flat_with_mappings(json!({
            "_meta": {"version": "7.0.0"},
            "properties": {"name": {"type": "keyword"}}
        }));
        assert!(detect("apm-7.0.0-span", &flat).is_empty());
    }

    #[test]
    fn multiple_warnings_accumulate() {
        let flat = flat_with_mappings(json!({"doc": {
            "_all": {"enabled": true},
            "properties": {"sampled": {"type": "boolean"}}
        }}));
        let warnings = detect("apm-6.4.2-transaction", &flat);
        assert_eq!(
            warnings,
            vec![
                ReindexWarning::AllField,
                ReindexWarning::BooleanFields,
                ReindexWarning::ApmReindex,
            ]
        );
    }
}
