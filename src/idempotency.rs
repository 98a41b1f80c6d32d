//! Compares an incoming submission against the existing transaction
//! sharing its id, to decide whether it is a retry of the same request,
//! a conflicting request reusing an id, or (defensively) unseen.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// Same request observed again; treat as a retry.
    Same,
    /// Conflicting request reusing the same id; reject.
    Conflict,
    /// Ids matched but nothing to compare against — should not occur
    /// in practice since the caller only consults this when a row with
    /// the same id already exists.
    New,
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub critical_fields: Vec<String>,
    pub ignored_fields: HashSet<String>,
    pub similarity_threshold_pct: u32,
    pub numeric_tolerance: f64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            critical_fields: vec![
                "amount".to_string(),
                "accountNumber".to_string(),
                "description".to_string(),
                "reference".to_string(),
            ],
            ignored_fields: ["timestamp", "clientIp", "deviceId"]
                .into_iter()
                .map(String::from)
                .collect(),
            similarity_threshold_pct: 80,
            numeric_tolerance: 1e-4,
        }
    }
}

/// Resolves the possibly-dotted path `field` against a flat payload map,
/// looking one level into nested object values.
fn lookup<'a>(payload: &'a HashMap<String, JsonValue>, field: &str) -> Option<&'a JsonValue> {
    let mut parts = field.split('.');
    let head = parts.next()?;
    let mut current = payload.get(head)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn values_match(a: &JsonValue, b: &JsonValue, tolerance: f64) -> bool {
    match (a, b) {
        (JsonValue::Number(an), JsonValue::Number(bn)) => match (an.as_f64(), bn.as_f64()) {
            (Some(af), Some(bf)) => (af - bf).abs() <= tolerance,
            _ => an == bn,
        },
        _ => a == b,
    }
}

/// Classifies an incoming request's payload against the existing
/// transaction's payload for the same id, per the configured critical
/// and ignored field sets.
pub fn classify(
    origin_system_existing: &str,
    origin_system_incoming: &str,
    existing_payload: &HashMap<String, JsonValue>,
    incoming_payload: &HashMap<String, JsonValue>,
    config: &IdempotencyConfig,
) -> IdempotencyOutcome {
    if origin_system_existing != origin_system_incoming {
        return IdempotencyOutcome::Conflict;
    }

    for field in &config.critical_fields {
        let existing_value = lookup(existing_payload, field);
        let incoming_value = lookup(incoming_payload, field);
        let matches = match (existing_value, incoming_value) {
            (None, None) => true,
            (Some(a), Some(b)) => values_match(a, b, config.numeric_tolerance),
            _ => false,
        };
        if !matches {
            return IdempotencyOutcome::Conflict;
        }
    }

    let similarity = similarity_pct(existing_payload, incoming_payload, config);
    if similarity < config.similarity_threshold_pct {
        IdempotencyOutcome::Conflict
    } else {
        IdempotencyOutcome::Same
    }
}

fn similarity_pct(
    existing_payload: &HashMap<String, JsonValue>,
    incoming_payload: &HashMap<String, JsonValue>,
    config: &IdempotencyConfig,
) -> u32 {
    let is_scored = |key: &String| {
        !config.ignored_fields.contains(key.as_str())
            && !config.critical_fields.iter().any(|c| c == key || key.starts_with(&format!("{c}.")))
    };

    let mut union_keys: HashSet<&String> = HashSet::new();
    union_keys.extend(existing_payload.keys().filter(|k| is_scored(k)));
    union_keys.extend(incoming_payload.keys().filter(|k| is_scored(k)));

    if union_keys.is_empty() {
        return 100;
    }

    let matches = union_keys
        .iter()
        .filter(|key| {
            match (existing_payload.get(**key), incoming_payload.get(**key)) {
                (Some(a), Some(b)) => values_match(a, b, config.numeric_tolerance),
                _ => false,
            }
        })
        .count();

    ((matches as f64 / union_keys.len() as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, JsonValue)]) -> HashMap<String, JsonValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn same_payload_classifies_as_same() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[("amount", json!(100.0)), ("reference", json!("r1"))]);
        let incoming = existing.clone();
        assert_eq!(
            classify("A", "A", &existing, &incoming, &config),
            IdempotencyOutcome::Same
        );
    }

    #[test]
    fn different_origin_system_is_conflict() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[("amount", json!(100.0))]);
        let incoming = existing.clone();
        assert_eq!(
            classify("A", "B", &existing, &incoming, &config),
            IdempotencyOutcome::Conflict
        );
    }

    #[test]
    fn critical_field_change_is_conflict_regardless_of_similarity() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[
            ("amount", json!(100.0)),
            ("a", json!(1)),
            ("b", json!(2)),
            ("c", json!(3)),
        ]);
        let mut incoming = existing.clone();
        incoming.insert("amount".to_string(), json!(250.0));
        assert_eq!(
            classify("A", "A", &existing, &incoming, &config),
            IdempotencyOutcome::Conflict
        );
    }

    #[test]
    fn ignored_field_difference_does_not_affect_similarity() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[
            ("amount", json!(100.0)),
            ("clientIp", json!("1.1.1.1")),
        ]);
        let mut incoming = existing.clone();
        incoming.insert("clientIp".to_string(), json!("2.2.2.2"));
        assert_eq!(
            classify("A", "A", &existing, &incoming, &config),
            IdempotencyOutcome::Same
        );
    }

    #[test]
    fn numeric_tolerance_is_honored_for_critical_field() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[("amount", json!(100.00001))]);
        let incoming = payload(&[("amount", json!(100.00002))]);
        assert_eq!(
            classify("A", "A", &existing, &incoming, &config),
            IdempotencyOutcome::Same
        );
    }

    #[test]
    fn low_similarity_among_non_critical_fields_is_conflict() {
        let config = IdempotencyConfig::default();
        let existing = payload(&[
            ("amount", json!(100.0)),
            ("x", json!(1)),
            ("y", json!(2)),
            ("z", json!(3)),
            ("w", json!(4)),
        ]);
        let mut incoming = existing.clone();
        incoming.insert("x".to_string(), json!(99));
        incoming.insert("y".to_string(), json!(98));
        incoming.insert("z".to_string(), json!(97));
        assert_eq!(
            classify("A", "A", &existing, &incoming, &config),
            IdempotencyOutcome::Conflict
        );
    }
}
