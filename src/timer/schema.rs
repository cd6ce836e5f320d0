//! Field constraints for timer updates
//!
//! [`FIELDS`] is the one table every inbound field is checked against:
//! config patches go through [`validate_patch`], and control operations clamp
//! their values with the same limits.

use serde_json::{Map, Value};
use tracing::debug;

use super::model::TimerUpdate;

/// Longest configurable duration (24 hours)
pub const MAX_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Largest manual adjustment accepted in one call (1 hour)
pub const MAX_ADJUST_MS: i64 = 60 * 60 * 1000;

/// How far past zero a `negative` countdown may run before it is stopped
pub const MAX_NEGATIVE_MS: i64 = MAX_DURATION_MS;

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    /// One of a fixed set of strings
    OneOf(&'static [&'static str]),
    /// Number in an inclusive range, truncated to an integer
    Int { min: i64, max: i64 },
    /// Non-empty string no longer than `max_len` characters
    Text { max_len: usize },
    /// Boolean, also accepted as 0/1
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: Rule,
    /// Mode, duration and remaining carry time semantics
    pub timing: bool,
}

const fn field(name: &'static str, rule: Rule) -> FieldSpec {
    FieldSpec { name, rule, timing: false }
}

const fn timing(name: &'static str, rule: Rule) -> FieldSpec {
    FieldSpec { name, rule, timing: true }
}

const COLOR: Rule = Rule::Text { max_len: 50 };

pub const FIELDS: &[FieldSpec] = &[
    timing("mode", Rule::OneOf(&["countdown", "countup"])),
    timing("duration_ms", Rule::Int { min: 0, max: MAX_DURATION_MS }),
    timing("remaining_ms", Rule::Int { min: -MAX_DURATION_MS, max: MAX_DURATION_MS }),
    field("end_behavior", Rule::OneOf(&["stop", "negative", "hide", "confetti"])),
    field("format", Rule::OneOf(&["auto", "HH:MM:SS", "MM:SS", "SS"])),
    field("font_family", Rule::Text { max_len: 200 }),
    field("font_size", Rule::Int { min: 8, max: 500 }),
    field("font_weight", Rule::Int { min: 100, max: 900 }),
    field("text_color", COLOR),
    field("shadow_enabled", Rule::Flag),
    field("shadow_color", COLOR),
    field("shadow_blur", Rule::Int { min: 0, max: 100 }),
    field("shadow_offset_x", Rule::Int { min: -50, max: 50 }),
    field("shadow_offset_y", Rule::Int { min: -50, max: 50 }),
    field("stroke_enabled", Rule::Flag),
    field("stroke_color", COLOR),
    field("stroke_width", Rule::Int { min: 0, max: 20 }),
];

/// A value that passed its rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Flag(bool),
}

impl Rule {
    pub fn check(&self, value: &Value) -> Option<FieldValue> {
        match *self {
            Rule::OneOf(choices) => value
                .as_str()
                .filter(|s| choices.iter().any(|choice| choice == s))
                .map(|s| FieldValue::Text(s.to_string())),
            Rule::Int { min, max } => {
                let number = value
                    .as_i64()
                    .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))?;
                (min..=max).contains(&number).then_some(FieldValue::Int(number))
            }
            Rule::Text { max_len } => value
                .as_str()
                .filter(|s| !s.is_empty() && s.chars().count() <= max_len)
                .map(|s| FieldValue::Text(s.to_string())),
            Rule::Flag => match value {
                Value::Bool(flag) => Some(FieldValue::Flag(*flag)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(FieldValue::Flag(false)),
                    Some(1) => Some(FieldValue::Flag(true)),
                    _ => None,
                },
                _ => None,
            },
        }
    }

    /// Clamp an integer into this rule's range; other rules pass it through
    pub fn clamp(&self, value: i64) -> i64 {
        match *self {
            Rule::Int { min, max } => value.clamp(min, max),
            _ => value,
        }
    }
}

pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Clamp a control-op duration (reset/set) into the `duration_ms` range
pub fn clamp_duration(ms: i64) -> i64 {
    lookup("duration_ms").map_or(ms, |f| f.rule.clamp(ms))
}

/// Clamp a manual adjustment to the per-call limit
pub fn clamp_delta(ms: i64) -> i64 {
    ms.clamp(-MAX_ADJUST_MS, MAX_ADJUST_MS)
}

/// Validate a raw patch field by field.
///
/// Unknown keys and values that break their rule are dropped; everything
/// else lands in the returned update. One bad field never blocks another.
pub fn validate_patch(patch: &Map<String, Value>) -> TimerUpdate {
    let mut update = TimerUpdate::default();

    for (key, raw) in patch {
        let Some(spec) = lookup(key) else {
            debug!(field = %key, "Ignoring unknown config field");
            continue;
        };
        match spec.rule.check(raw) {
            Some(value) => assign(&mut update, spec.name, value),
            None => debug!(field = %key, value = %raw, "Dropping invalid config field"),
        }
    }

    update
}

fn assign(update: &mut TimerUpdate, name: &str, value: FieldValue) {
    match (name, value) {
        ("mode", FieldValue::Text(s)) => update.mode = s.parse().ok(),
        ("end_behavior", FieldValue::Text(s)) => update.end_behavior = s.parse().ok(),
        ("format", FieldValue::Text(s)) => update.format = s.parse().ok(),
        ("font_family", FieldValue::Text(s)) => update.font_family = Some(s),
        ("text_color", FieldValue::Text(s)) => update.text_color = Some(s),
        ("shadow_color", FieldValue::Text(s)) => update.shadow_color = Some(s),
        ("stroke_color", FieldValue::Text(s)) => update.stroke_color = Some(s),
        ("duration_ms", FieldValue::Int(n)) => update.duration_ms = Some(n),
        ("remaining_ms", FieldValue::Int(n)) => update.remaining_ms = Some(n),
        ("font_size", FieldValue::Int(n)) => update.font_size = Some(n),
        ("font_weight", FieldValue::Int(n)) => update.font_weight = Some(n),
        ("shadow_blur", FieldValue::Int(n)) => update.shadow_blur = Some(n),
        ("shadow_offset_x", FieldValue::Int(n)) => update.shadow_offset_x = Some(n),
        ("shadow_offset_y", FieldValue::Int(n)) => update.shadow_offset_y = Some(n),
        ("stroke_width", FieldValue::Int(n)) => update.stroke_width = Some(n),
        ("shadow_enabled", FieldValue::Flag(b)) => update.shadow_enabled = Some(b),
        ("stroke_enabled", FieldValue::Flag(b)) => update.stroke_enabled = Some(b),
        (name, value) => debug!(field = name, ?value, "No slot for validated field"),
    }
}
