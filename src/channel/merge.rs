//! Partial config updates.
//!
//! Field rules:
//! - `vibration`, `sound`: overwritten when present, coerced to bool
//! - intensities and distances: overwritten when present and numeric, otherwise kept
//! - `alerts_enabled` (list) wins over the legacy `obstacles_enabled` toggle; with neither
//!   present the category set is unchanged
//!
//! Only a payload that is not a JSON object at all is an error. Everything else merges.

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::store::AlertConfig;
use crate::Category;

pub const INTENSITY_MIN: f64 = 0.0;
pub const INTENSITY_MAX: f64 = 100.0;

/// How an update changes the enabled category set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertsUpdate {
    ExplicitList(BTreeSet<Category>),
    /// `true` enables every default category, `false` disables all.
    LegacyToggle(bool),
    NoChange,
}

/// Parsed, coerced update document.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigUpdate {
    pub vibration: Option<bool>,
    pub sound: Option<bool>,
    pub vibration_intensity: Option<f64>,
    pub volume_intensity: Option<f64>,
    pub min_distance: Option<f64>,
    pub max_distance: Option<f64>,
    pub alerts: AlertsUpdate,
    /// Labels in an explicit list that are not known categories. Dropped from the set.
    pub unknown_categories: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub config: AlertConfig,
    pub enabled_now: Vec<Category>,
    pub disabled_now: Vec<Category>,
}

impl ConfigUpdate {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("decode config update")?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| anyhow!("config update must be a JSON object"))?;
        Ok(Self::from_fields(fields))
    }

    pub(crate) fn from_fields(fields: &Map<String, Value>) -> Self {
        let mut unknown_categories = Vec::new();
        let alerts = match fields.get("alerts_enabled") {
            Some(Value::Array(items)) => {
                let mut set = BTreeSet::new();
                for item in items {
                    let label = match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    match Category::from_label(&label) {
                        Some(category) => {
                            set.insert(category);
                        }
                        None => unknown_categories.push(label),
                    }
                }
                AlertsUpdate::ExplicitList(set)
            }
            _ => match fields.get("obstacles_enabled") {
                Some(flag) => AlertsUpdate::LegacyToggle(coerce_bool(flag)),
                None => AlertsUpdate::NoChange,
            },
        };

        let intensity = |key: &str| {
            fields
                .get(key)
                .and_then(coerce_f64)
                .map(|v| v.clamp(INTENSITY_MIN, INTENSITY_MAX))
        };
        let distance = |key: &str| fields.get(key).and_then(coerce_f64).filter(|v| *v > 0.0);

        Self {
            vibration: fields.get("vibration").map(coerce_bool),
            sound: fields.get("sound").map(coerce_bool),
            vibration_intensity: intensity("vibration_intensity"),
            volume_intensity: intensity("volume_intensity"),
            min_distance: distance("min_distance"),
            max_distance: distance("max_distance"),
            alerts,
            unknown_categories,
        }
    }

    pub fn apply(&self, current: &AlertConfig) -> MergeOutcome {
        let mut config = current.clone();
        if let Some(v) = self.vibration {
            config.vibration = v;
        }
        if let Some(v) = self.sound {
            config.sound = v;
        }
        if let Some(v) = self.vibration_intensity {
            config.vibration_intensity = v;
        }
        if let Some(v) = self.volume_intensity {
            config.volume_intensity = v;
        }
        if let Some(v) = self.min_distance {
            config.min_distance = v;
        }
        if let Some(v) = self.max_distance {
            config.max_distance = v;
        }
        match &self.alerts {
            AlertsUpdate::ExplicitList(set) => config.alerts_enabled = set.clone(),
            AlertsUpdate::LegacyToggle(true) => config.alerts_enabled = Category::defaults(),
            AlertsUpdate::LegacyToggle(false) => config.alerts_enabled.clear(),
            AlertsUpdate::NoChange => {}
        }

        let old = &current.alerts_enabled;
        let new = &config.alerts_enabled;
        let enabled_now = new.difference(old).copied().collect();
        let disabled_now = old.difference(new).copied().collect();
        MergeOutcome {
            config,
            enabled_now,
            disabled_now,
        }
    }
}

/// Merge a raw update document into `current`.
///
/// Returns an error only when `raw` is not a JSON object; `current` is never modified.
pub fn merge_update(raw: &str, current: &AlertConfig) -> Result<MergeOutcome> {
    let update = ConfigUpdate::parse(raw)?;
    if !update.unknown_categories.is_empty() {
        log::warn!(
            "Ignoring unknown alert categories: {}",
            update.unknown_categories.join(", ")
        );
    }
    let outcome = update.apply(current);
    if outcome.config.min_distance >= outcome.config.max_distance {
        log::warn!(
            "Config min_distance {} is not below max_distance {}",
            outcome.config.min_distance,
            outcome.config.max_distance
        );
    }
    Ok(outcome)
}

/// Truthiness with the usual string spellings of false.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Numbers, numeric strings and booleans. Non-finite values are rejected.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AlertConfig {
        AlertConfig::default()
    }

    #[test]
    fn string_booleans_are_coerced() {
        let out = merge_update(r#"{"vibration": "true", "sound": "off"}"#, &defaults()).unwrap();
        assert!(out.config.vibration);
        assert!(!out.config.sound);
    }

    #[test]
    fn unparsable_numbers_keep_previous_value() {
        let base = defaults();
        let out = merge_update(r#"{"volume_intensity": "abc"}"#, &base).unwrap();
        assert_eq!(out.config.volume_intensity, base.volume_intensity);
        assert_eq!(out.config, base);
    }

    #[test]
    fn numeric_strings_are_parsed_and_intensities_clamped() {
        let out = merge_update(
            r#"{"vibration_intensity": " 75.5 ", "volume_intensity": 140, "min_distance": "0.8"}"#,
            &defaults(),
        )
        .unwrap();
        assert_eq!(out.config.vibration_intensity, 75.5);
        assert_eq!(out.config.volume_intensity, 100.0);
        assert_eq!(out.config.min_distance, 0.8);
    }

    #[test]
    fn non_positive_or_non_finite_distances_are_ignored() {
        let base = defaults();
        let out = merge_update(r#"{"min_distance": -1, "max_distance": "inf"}"#, &base).unwrap();
        assert_eq!(out.config.min_distance, base.min_distance);
        assert_eq!(out.config.max_distance, base.max_distance);
    }

    #[test]
    fn explicit_list_reports_sorted_delta() {
        let out = merge_update(r#"{"alerts_enabled": ["person"]}"#, &defaults()).unwrap();
        assert!(out.enabled_now.is_empty());
        assert_eq!(
            out.disabled_now,
            vec![
                Category::Door,
                Category::Escalator,
                Category::Motorcycle,
                Category::Stairs,
                Category::TrafficLight,
            ]
        );
        assert_eq!(
            out.config.alerts_enabled.into_iter().collect::<Vec<_>>(),
            vec![Category::Person]
        );
    }

    #[test]
    fn explicit_list_beats_legacy_toggle() {
        let mut base = defaults();
        base.alerts_enabled.clear();
        let out = merge_update(
            r#"{"alerts_enabled": ["door", "car"], "obstacles_enabled": true}"#,
            &base,
        )
        .unwrap();
        assert_eq!(out.enabled_now, vec![Category::Door]);
        assert_eq!(out.config.alerts_enabled.len(), 1);
    }

    #[test]
    fn legacy_toggle_enables_or_clears_all() {
        let off = merge_update(r#"{"obstacles_enabled": 0}"#, &defaults()).unwrap();
        assert!(off.config.alerts_enabled.is_empty());
        assert_eq!(off.disabled_now.len(), 6);

        let on = merge_update(r#"{"obstacles_enabled": "yes"}"#, &off.config).unwrap();
        assert_eq!(on.config.alerts_enabled, Category::defaults());
        assert_eq!(on.enabled_now.len(), 6);
    }

    #[test]
    fn non_list_alerts_falls_back_to_previous_set() {
        let base = defaults();
        let out = merge_update(r#"{"alerts_enabled": "person"}"#, &base).unwrap();
        assert_eq!(out.config.alerts_enabled, base.alerts_enabled);
        assert!(out.enabled_now.is_empty() && out.disabled_now.is_empty());
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(merge_update("{not json", &defaults()).is_err());
        assert!(merge_update("[1, 2]", &defaults()).is_err());
        assert!(merge_update("", &defaults()).is_err());
    }

    #[test]
    fn empty_object_changes_nothing() {
        let base = defaults();
        let out = merge_update("{}", &base).unwrap();
        assert_eq!(out.config, base);
    }

    #[test]
    fn coercion_edges() {
        assert!(!coerce_bool(&Value::Null));
        assert!(coerce_bool(&serde_json::json!("enabled")));
        assert!(!coerce_bool(&serde_json::json!(0.0)));
        assert_eq!(coerce_f64(&serde_json::json!(true)), Some(1.0));
        assert_eq!(coerce_f64(&serde_json::json!("nan")), None);
        assert_eq!(coerce_f64(&serde_json::json!([1])), None);
    }
}
