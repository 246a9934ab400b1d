//! Flattening of heterogeneous model payloads into dotted-path records.
//!
//! The model may wrap its answer under the object name, under some other
//! single key, or not at all. Everything past this module works on
//! [`NormalizedResult`]s only.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::ExtractionSchema;

/// Joins nested keys in a flattened path.
pub const PATH_SEPARATOR: char = '.';

/// Structured output of one extraction attempt, as returned by the model.
pub type RawResult = Value;

/// Flat, ordered mapping from dotted field path to leaf value.
///
/// Values are scalars, `null`, or arrays kept as opaque leaves. Objects never
/// appear as values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedResult {
    fields: IndexMap<String, Value>,
}

impl NormalizedResult {
    /// Flattens a map without any unwrapping.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            fields: flatten(map),
        }
    }

    /// Flattens a raw result without any unwrapping. Non-object payloads
    /// produce an empty result.
    #[must_use]
    pub fn from_raw(raw: &RawResult) -> Self {
        raw.as_object().map(Self::from_map).unwrap_or_default()
    }

    /// Builds a result from already-flat pairs, splitting any object values.
    #[must_use]
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut fields = IndexMap::new();
        for (key, value) in pairs {
            let key = key.into();
            match value {
                Value::Object(map) => flatten_into(&map, &key, &mut fields),
                leaf => {
                    fields.insert(key, leaf);
                }
            }
        }
        Self { fields }
    }

    /// Value at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    /// Whether some path lies below `path`, i.e. the model answered an
    /// object where a leaf was expected.
    #[must_use]
    pub fn has_nested(&self, path: &str) -> bool {
        self.fields.keys().any(|key| {
            key.strip_prefix(path)
                .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
        })
    }

    /// Iterates paths and values in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Number of leaf paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no leaf paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sets a leaf value.
    pub(crate) fn set(&mut self, path: String, value: Value) {
        self.fields.insert(path, value);
    }

    /// Rebuilds the nested mapping.
    #[must_use]
    pub fn to_nested(&self) -> Map<String, Value> {
        unflatten(&self.fields)
    }
}

/// Flattens nested maps into dotted paths. Arrays and scalars are leaves.
///
/// Empty nested maps have no leaves and therefore vanish.
#[must_use]
pub fn flatten(map: &Map<String, Value>) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    flatten_into(map, "", &mut out);
    out
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut IndexMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{PATH_SEPARATOR}{key}")
        };
        match value {
            Value::Object(child) => flatten_into(child, &path, out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

/// Inverse of [`flatten`] for trees whose keys do not contain the separator.
///
/// A path that is also a prefix of another path (`a` and `a.b`) cannot be
/// rebuilt losslessly: the later entry wins, so a scalar `a` followed by
/// `a.b` becomes `{"a": {"b": ..}}` and the reverse order keeps only `a`.
#[must_use]
pub fn unflatten(flat: &IndexMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (path, value) in flat {
        let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        insert_path(&mut root, &parts, value.clone());
    }
    root
}

fn insert_path(node: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let slot = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Schema-aware normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    schema: &'a ExtractionSchema,
}

impl<'a> Normalizer<'a> {
    /// Creates a normalizer for the given schema.
    #[must_use]
    pub const fn new(schema: &'a ExtractionSchema) -> Self {
        Self { schema }
    }

    /// Converts a raw result into one record per extracted object.
    ///
    /// Single-object schemas yield at most one record. Payloads that are not
    /// objects, or unwrap to a scalar, yield none.
    #[must_use]
    pub fn normalize(&self, raw: &RawResult) -> Vec<NormalizedResult> {
        let Value::Object(top) = raw else {
            return Vec::new();
        };

        let inner = match self.unwrap(top) {
            Some(inner) => inner,
            None => return vec![NormalizedResult::from_map(top)],
        };

        match inner {
            Value::Object(object) => vec![NormalizedResult::from_map(object)],
            Value::Array(items) => {
                let records = items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(NormalizedResult::from_map);
                if self.schema.is_array() {
                    records.collect()
                } else {
                    records.take(1).collect()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Selects the value holding the object: the configured object name
    /// first, then any lone non-field key. `None` means the payload carries
    /// the fields directly.
    fn unwrap<'v>(&self, top: &'v Map<String, Value>) -> Option<&'v Value> {
        let object_name = self.schema.object_name();
        if !self.schema.is_field(object_name) {
            if let Some(inner) = top.get(object_name) {
                return Some(inner);
            }
        }
        if top.len() == 1 {
            return top
                .iter()
                .next()
                .filter(|(key, _)| !self.schema.is_field(key))
                .map(|(_, inner)| inner);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested() {
        let raw = json!({"guarantee": {"terms": "bank", "type": "letter"}, "profit": 18});
        let flat = flatten(raw.as_object().unwrap());
        assert_eq!(flat["guarantee.terms"], "bank");
        assert_eq!(flat["guarantee.type"], "letter");
        assert_eq!(flat["profit"], 18);
    }

    #[test]
    fn test_lists_are_opaque() {
        let raw = json!({"tags": [{"a": 1}, "x"]});
        let flat = flatten(raw.as_object().unwrap());
        assert_eq!(flat.len(), 1);
        assert!(flat["tags"].is_array());
    }

    #[test]
    fn test_unflatten_round_trip() {
        let raw = json!({"a": {"b": {"c": 1}, "d": "x"}, "e": null});
        let map = raw.as_object().unwrap();
        assert_eq!(&unflatten(&flatten(map)), map);
    }

    #[test]
    fn test_unflatten_prefix_collision_later_wins() {
        let mut flat = IndexMap::new();
        flat.insert("a".to_string(), json!(1));
        flat.insert("a.b".to_string(), json!(2));
        assert_eq!(Value::Object(unflatten(&flat)), json!({"a": {"b": 2}}));

        let mut flat = IndexMap::new();
        flat.insert("a.b".to_string(), json!(2));
        flat.insert("a".to_string(), json!(1));
        assert_eq!(Value::Object(unflatten(&flat)), json!({"a": 1}));
    }

    #[test]
    fn test_has_nested() {
        let record = NormalizedResult::from_raw(&json!({"guarantee": {"terms": "bank"}, "g": 1}));
        assert!(record.has_nested("guarantee"));
        assert!(!record.has_nested("guarantee.terms"));
        assert!(!record.has_nested("guar"));
        assert!(!record.has_nested("g"));
    }

    fn schema(is_array: bool) -> ExtractionSchema {
        let config = crate::config::FieldConfig::from_json(&format!(
            r#"{{"function_name": "extract_project", "object_name": "project", "is_array": {is_array},
                "fields": {{"company_name": {{"type": "string"}}, "profit": {{"type": "string"}}}}}}"#
        ))
        .unwrap();
        ExtractionSchema::build(&config).unwrap()
    }

    #[test]
    fn test_normalize_unwraps_object_name() {
        let schema = schema(false);
        let raw = json!({"project": {"company_name": "Acme", "profit": "18%"}});
        let records = Normalizer::new(&schema).normalize(&raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("company_name"), Some(&json!("Acme")));
    }

    #[test]
    fn test_normalize_unwraps_unknown_single_key() {
        let schema = schema(false);
        let raw = json!({"data": {"company_name": "Acme"}});
        let records = Normalizer::new(&schema).normalize(&raw);
        assert_eq!(records[0].get("company_name"), Some(&json!("Acme")));
    }

    #[test]
    fn test_normalize_flat_payload_as_is() {
        let schema = schema(false);
        let raw = json!({"company_name": "Acme"});
        let records = Normalizer::new(&schema).normalize(&raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("company_name"), Some(&json!("Acme")));
    }

    #[test]
    fn test_normalize_array_records() {
        let schema = schema(true);
        let raw = json!({"project": [{"company_name": "A"}, "junk", {"company_name": "B"}]});
        let records = Normalizer::new(&schema).normalize(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("company_name"), Some(&json!("B")));
    }

    #[test]
    fn test_normalize_single_schema_takes_first_item() {
        let schema = schema(false);
        let raw = json!({"project": [{"company_name": "A"}, {"company_name": "B"}]});
        let records = Normalizer::new(&schema).normalize(&raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("company_name"), Some(&json!("A")));
    }

    #[test]
    fn test_normalize_non_object_is_empty() {
        let schema = schema(false);
        let normalizer = Normalizer::new(&schema);
        assert!(normalizer.normalize(&json!("text")).is_empty());
        assert!(normalizer.normalize(&json!({"project": 3})).is_empty());
    }

    #[test]
    fn test_from_pairs_splits_objects() {
        let result = NormalizedResult::from_pairs([("a", json!({"b": 1})), ("c", json!(2))]);
        assert_eq!(result.get("a.b"), Some(&json!(1)));
        assert_eq!(result.len(), 2);
    }
}
