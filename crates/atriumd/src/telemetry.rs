//! Canonical-signal extraction from heterogeneous sensor payloads.
//!
//! Vendors disagree on key names, so normalization is an ordered list of
//! typed extraction steps rather than duck-typed probing. Absence of a
//! signal is never an error: a rule that needs a missing signal simply does
//! not apply to that event.

use serde_json::{Map, Value};

/// Opaque sensor payload as received from a gateway.
pub type PayloadMap = Map<String, Value>;

/// Motion keys checked in priority order. The first key that yields an
/// unambiguous boolean wins.
const MOTION_KEYS: &[&str] = &["motion", "state", "isOn", "ison"];

const TRUE_WORDS: &[&str] = &["1", "true", "on", "yes", "motion", "active"];
const FALSE_WORDS: &[&str] = &["0", "false", "off", "no", "idle", "inactive"];

/// Explicit Celsius field names, checked before any fuzzy matching.
const TEMPERATURE_KEYS: &[&str] = &[
    "temp",
    "temperature",
    "tempc",
    "temperaturec",
    "celsius",
    "temperature_c",
    "temp_c",
];

/// Nested containers worth one level of recursion.
const NESTED_KEYS: &[&str] = &["payload", "data", "sensor", "readings"];

/// Extract the canonical motion signal from a payload.
pub fn parse_motion(payload: &PayloadMap) -> Option<bool> {
    for key in MOTION_KEYS {
        if let Some(value) = lookup(payload, key) {
            if let Some(parsed) = boolean_like(value) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Extract the canonical temperature signal, in °C, from a payload.
///
/// Fahrenheit-flavored keys are excluded rather than converted: the
/// normalizer never guesses units.
pub fn parse_temperature(payload: &PayloadMap) -> Option<f64> {
    parse_temperature_at(payload, 0)
}

type TemperatureStep = fn(&PayloadMap) -> Option<f64>;

/// Ordered extraction rules for the temperature signal.
const TEMPERATURE_STEPS: &[TemperatureStep] = &[explicit_temperature, fuzzy_temperature];

fn parse_temperature_at(payload: &PayloadMap, depth: u8) -> Option<f64> {
    for step in TEMPERATURE_STEPS {
        if let Some(value) = step(payload) {
            return Some(value);
        }
    }
    if depth > 0 {
        return None;
    }
    for key in NESTED_KEYS {
        let nested = lookup(payload, key).and_then(Value::as_object);
        if let Some(nested) = nested {
            if let Some(value) = parse_temperature_at(nested, depth + 1) {
                return Some(value);
            }
        }
    }
    None
}

fn explicit_temperature(payload: &PayloadMap) -> Option<f64> {
    TEMPERATURE_KEYS
        .iter()
        .find_map(|key| lookup(payload, key).and_then(finite_number))
}

fn fuzzy_temperature(payload: &PayloadMap) -> Option<f64> {
    payload.iter().find_map(|(key, value)| {
        let key = key.to_ascii_lowercase();
        if !key.contains("temp") && !key.contains("celsius") {
            return None;
        }
        if key.contains("tempf") || key.contains("fahrenheit") {
            return None;
        }
        finite_number(value)
    })
}

fn lookup<'a>(payload: &'a PayloadMap, key: &str) -> Option<&'a Value> {
    payload
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn boolean_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => {
            let normalized = s.trim().to_ascii_lowercase();
            if TRUE_WORDS.contains(&normalized.as_str()) {
                Some(true)
            } else if FALSE_WORDS.contains(&normalized.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn finite_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> PayloadMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_temperature_plain_keys() {
        assert_eq!(parse_temperature(&map(json!({"temp": 21.5}))), Some(21.5));
        assert_eq!(
            parse_temperature(&map(json!({"Temperature": 21.5}))),
            Some(21.5)
        );
        assert_eq!(
            parse_temperature(&map(json!({"temperature_c": 19}))),
            Some(19.0)
        );
    }

    #[test]
    fn test_temperature_nested() {
        assert_eq!(
            parse_temperature(&map(json!({"sensor": {"temp": 21.5}}))),
            Some(21.5)
        );
        assert_eq!(
            parse_temperature(&map(json!({"payload": {"ambient_temp": "18.2"}}))),
            Some(18.2)
        );
    }

    #[test]
    fn test_temperature_recursion_is_one_level() {
        let payload = map(json!({"data": {"sensor": {"temp": 21.5}}}));
        assert_eq!(parse_temperature(&payload), None);
    }

    #[test]
    fn test_fahrenheit_excluded() {
        assert_eq!(parse_temperature(&map(json!({"tempF": 70}))), None);
        assert_eq!(parse_temperature(&map(json!({"fahrenheit": 70}))), None);
        // A Celsius key next to a Fahrenheit key still matches.
        assert_eq!(
            parse_temperature(&map(json!({"tempF": 70, "tempC": 21.0}))),
            Some(21.0)
        );
    }

    #[test]
    fn test_temperature_numeric_strings() {
        assert_eq!(parse_temperature(&map(json!({"temp": "21.5"}))), Some(21.5));
        assert_eq!(parse_temperature(&map(json!({"temp": "warm"}))), None);
    }

    #[test]
    fn test_motion_key_priority() {
        assert_eq!(parse_motion(&map(json!({"motion": true}))), Some(true));
        assert_eq!(
            parse_motion(&map(json!({"state": "off", "motion": "active"}))),
            Some(true)
        );
    }

    #[test]
    fn test_motion_value_words() {
        assert_eq!(parse_motion(&map(json!({"state": "ON"}))), Some(true));
        assert_eq!(parse_motion(&map(json!({"state": "idle"}))), Some(false));
        assert_eq!(parse_motion(&map(json!({"isOn": 1}))), Some(true));
        assert_eq!(parse_motion(&map(json!({"ison": 0}))), Some(false));
    }

    #[test]
    fn test_motion_ambiguous_value_falls_through() {
        // "open" is not a recognized boolean word, so the scan continues to
        // the next candidate key.
        assert_eq!(
            parse_motion(&map(json!({"state": "open", "isOn": false}))),
            Some(false)
        );
        assert_eq!(parse_motion(&map(json!({"state": "open"}))), None);
    }

    #[test]
    fn test_absent_signals() {
        assert_eq!(parse_motion(&map(json!({"battery": 80}))), None);
        assert_eq!(parse_temperature(&map(json!({"humidity": 45}))), None);
    }
}
