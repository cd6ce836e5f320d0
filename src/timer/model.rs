//! Timer record, enums and the derived snapshot

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::format_time;

/// Default configured duration for a freshly created channel (5 minutes)
pub const DEFAULT_DURATION_MS: i64 = 5 * 60 * 1000;

/// Counting direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Countdown,
    Countup,
}

impl TimerMode {
    /// Base value a stopped timer returns to in this mode
    pub fn start_value(self, duration_ms: i64) -> i64 {
        match self {
            Self::Countdown => duration_ms,
            Self::Countup => 0,
        }
    }

    /// Live value from a base and the time elapsed since the anchor
    pub fn project(self, base_ms: i64, elapsed_ms: i64) -> i64 {
        match self {
            Self::Countdown => base_ms - elapsed_ms,
            Self::Countup => base_ms + elapsed_ms,
        }
    }
}

/// What happens when a countdown reaches zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndBehavior {
    Stop,
    Negative,
    Hide,
    Confetti,
}

/// Display format for the rendered value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "HH:MM:SS")]
    HoursMinutesSeconds,
    #[serde(rename = "MM:SS")]
    MinutesSeconds,
    #[serde(rename = "SS")]
    Seconds,
}

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    ($ty:ty, $kind:literal, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($variant => $text),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(TimerMode, "mode", {
    TimerMode::Countdown => "countdown",
    TimerMode::Countup => "countup",
});

string_enum!(EndBehavior, "end behavior", {
    EndBehavior::Stop => "stop",
    EndBehavior::Negative => "negative",
    EndBehavior::Hide => "hide",
    EndBehavior::Confetti => "confetti",
});

string_enum!(TimeFormat, "format", {
    TimeFormat::Auto => "auto",
    TimeFormat::HoursMinutesSeconds => "HH:MM:SS",
    TimeFormat::MinutesSeconds => "MM:SS",
    TimeFormat::Seconds => "SS",
});

/// Overlay styling. Passed through untouched by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStyle {
    pub font_family: String,
    pub font_size: i64,
    pub font_weight: i64,
    pub text_color: String,
    pub shadow_enabled: bool,
    pub shadow_color: String,
    pub shadow_blur: i64,
    pub shadow_offset_x: i64,
    pub shadow_offset_y: i64,
    pub stroke_enabled: bool,
    pub stroke_color: String,
    pub stroke_width: i64,
}

impl Default for TimerStyle {
    fn default() -> Self {
        Self {
            font_family: "'Roboto Mono', monospace".to_string(),
            font_size: 72,
            font_weight: 600,
            text_color: "#FFFFFF".to_string(),
            shadow_enabled: true,
            shadow_color: "rgba(0,0,0,0.8)".to_string(),
            shadow_blur: 4,
            shadow_offset_x: 2,
            shadow_offset_y: 2,
            stroke_enabled: true,
            stroke_color: "#000000".to_string(),
            stroke_width: 2,
        }
    }
}

/// Persisted per-channel timer record.
///
/// `remaining_ms` is only authoritative while stopped. While running, the
/// live value is derived from `remaining_ms`, `started_at` and the clock
/// (see [`Timer::live_remaining`]). `started_at` is set iff `is_running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub channel: String,
    pub mode: TimerMode,
    pub duration_ms: i64,
    pub remaining_ms: i64,
    pub is_running: bool,
    pub started_at: Option<i64>,
    pub end_behavior: EndBehavior,
    pub format: TimeFormat,
    #[serde(flatten)]
    pub style: TimerStyle,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Timer {
    /// A new channel record with engine defaults
    pub fn new(channel: impl Into<String>, now_ms: i64) -> Self {
        Self {
            channel: channel.into(),
            mode: TimerMode::Countdown,
            duration_ms: DEFAULT_DURATION_MS,
            remaining_ms: DEFAULT_DURATION_MS,
            is_running: false,
            started_at: None,
            end_behavior: EndBehavior::Stop,
            format: TimeFormat::Auto,
            style: TimerStyle::default(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Remaining (or elapsed, for countup) time at `now_ms`
    pub fn live_remaining(&self, now_ms: i64) -> i64 {
        match (self.is_running, self.started_at) {
            (true, Some(anchor)) => self.mode.project(self.remaining_ms, now_ms - anchor),
            _ => self.remaining_ms,
        }
    }

    /// Copy of this record with the live value folded in
    pub fn snapshot(&self, now_ms: i64) -> Snapshot {
        let mut timer = self.clone();
        timer.remaining_ms = self.live_remaining(now_ms);
        let formatted = format_time(timer.remaining_ms, timer.format);
        Snapshot { timer, formatted }
    }
}

/// Immutable point-in-time view sent to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub timer: Timer,
    pub formatted: String,
}

impl Snapshot {
    pub fn channel(&self) -> &str {
        &self.timer.channel
    }

    pub fn remaining_ms(&self) -> i64 {
        self.timer.remaining_ms
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running
    }

    /// A running countdown that has reached or passed zero
    pub fn has_expired(&self) -> bool {
        self.timer.is_running
            && self.timer.mode == TimerMode::Countdown
            && self.timer.remaining_ms <= 0
    }
}

/// Partial update of a timer record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerUpdate {
    pub mode: Option<TimerMode>,
    pub duration_ms: Option<i64>,
    pub remaining_ms: Option<i64>,
    pub is_running: Option<bool>,
    pub started_at: Option<Option<i64>>,
    pub end_behavior: Option<EndBehavior>,
    pub format: Option<TimeFormat>,
    pub font_family: Option<String>,
    pub font_size: Option<i64>,
    pub font_weight: Option<i64>,
    pub text_color: Option<String>,
    pub shadow_enabled: Option<bool>,
    pub shadow_color: Option<String>,
    pub shadow_blur: Option<i64>,
    pub shadow_offset_x: Option<i64>,
    pub shadow_offset_y: Option<i64>,
    pub stroke_enabled: Option<bool>,
    pub stroke_color: Option<String>,
    pub stroke_width: Option<i64>,
}

impl TimerUpdate {
    /// Transition into the stopped state at the given base value
    pub fn halted(remaining_ms: i64) -> Self {
        Self {
            remaining_ms: Some(remaining_ms),
            is_running: Some(false),
            started_at: Some(None),
            ..Self::default()
        }
    }

    /// Transition into (or re-anchor) the running state
    pub fn anchored(remaining_ms: Option<i64>, now_ms: i64) -> Self {
        Self {
            remaining_ms,
            is_running: Some(true),
            started_at: Some(Some(now_ms)),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any field with time semantics is present
    pub fn touches_timing(&self) -> bool {
        self.mode.is_some() || self.duration_ms.is_some() || self.remaining_ms.is_some()
    }

    /// Drop mode/duration/remaining, keeping display fields
    pub fn without_timing(self) -> Self {
        Self {
            mode: None,
            duration_ms: None,
            remaining_ms: None,
            ..self
        }
    }

    pub fn apply_to(&self, timer: &mut Timer) {
        fn put<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        put(&mut timer.mode, &self.mode);
        put(&mut timer.duration_ms, &self.duration_ms);
        put(&mut timer.remaining_ms, &self.remaining_ms);
        put(&mut timer.is_running, &self.is_running);
        put(&mut timer.started_at, &self.started_at);
        put(&mut timer.end_behavior, &self.end_behavior);
        put(&mut timer.format, &self.format);

        let style = &mut timer.style;
        put(&mut style.font_family, &self.font_family);
        put(&mut style.font_size, &self.font_size);
        put(&mut style.font_weight, &self.font_weight);
        put(&mut style.text_color, &self.text_color);
        put(&mut style.shadow_enabled, &self.shadow_enabled);
        put(&mut style.shadow_color, &self.shadow_color);
        put(&mut style.shadow_blur, &self.shadow_blur);
        put(&mut style.shadow_offset_x, &self.shadow_offset_x);
        put(&mut style.shadow_offset_y, &self.shadow_offset_y);
        put(&mut style.stroke_enabled, &self.stroke_enabled);
        put(&mut style.stroke_color, &self.stroke_color);
        put(&mut style.stroke_width, &self.stroke_width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_remaining_follows_mode() {
        let mut timer = Timer::new("lobby", 0);
        timer.remaining_ms = 10_000;
        assert_eq!(timer.live_remaining(99_999), 10_000);

        timer.is_running = true;
        timer.started_at = Some(1_000);
        assert_eq!(timer.live_remaining(4_000), 7_000);

        timer.mode = TimerMode::Countup;
        assert_eq!(timer.live_remaining(4_000), 13_000);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let snapshot = Timer::new("lobby", 42).snapshot(42);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["channel"], "lobby");
        assert_eq!(json["mode"], "countdown");
        assert_eq!(json["format"], "auto");
        assert_eq!(json["font_size"], 72);
        assert_eq!(json["formatted"], "05:00");
        assert!(json["started_at"].is_null());

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn enum_text_round_trips_through_from_str() {
        assert_eq!("HH:MM:SS".parse::<TimeFormat>().unwrap(), TimeFormat::HoursMinutesSeconds);
        assert_eq!("confetti".parse::<EndBehavior>().unwrap(), EndBehavior::Confetti);
        assert!("sideways".parse::<TimerMode>().is_err());
    }

    #[test]
    fn update_leaves_absent_fields_alone() {
        let mut timer = Timer::new("lobby", 0);
        let update = TimerUpdate {
            font_size: Some(96),
            started_at: Some(Some(5)),
            ..TimerUpdate::default()
        };
        update.apply_to(&mut timer);
        assert_eq!(timer.style.font_size, 96);
        assert_eq!(timer.started_at, Some(5));
        assert_eq!(timer.style.font_weight, 600);
        assert_eq!(timer.remaining_ms, DEFAULT_DURATION_MS);
    }
}
