//! Rendering milliseconds as clock text, and parsing duration text

use super::model::TimeFormat;

/// Render a (possibly negative) millisecond value in the given format.
///
/// Components are taken from the absolute value, truncated toward zero, and a
/// leading `-` marks negative values.
pub fn format_time(ms: i64, format: TimeFormat) -> String {
    let prefix = if ms < 0 { "-" } else { "" };
    let abs = ms.unsigned_abs();

    let hours = abs / 3_600_000;
    let minutes = (abs % 3_600_000) / 60_000;
    let seconds = (abs % 60_000) / 1_000;

    match format {
        TimeFormat::HoursMinutesSeconds => {
            format!("{prefix}{hours:02}:{minutes:02}:{seconds:02}")
        }
        TimeFormat::MinutesSeconds => {
            let total_minutes = hours * 60 + minutes;
            format!("{prefix}{total_minutes:02}:{seconds:02}")
        }
        TimeFormat::Seconds => format!("{prefix}{}", abs / 1_000),
        TimeFormat::Auto if hours > 0 => {
            format!("{prefix}{hours:02}:{minutes:02}:{seconds:02}")
        }
        TimeFormat::Auto if minutes > 0 => format!("{prefix}{minutes:02}:{seconds:02}"),
        TimeFormat::Auto => format!("{prefix}{seconds:02}"),
    }
}

/// Parse duration text into milliseconds.
///
/// Accepted forms, optionally preceded by `-` or `+`:
/// - `H:MM:SS` or `MM:SS`
/// - unit tokens `1h30m`, `1h 30m`, `5min`, `90 sec` (each unit at most
///   once, any order)
/// - a bare integer, read as seconds
///
/// Returns `None` for anything else. Raw millisecond integers arrive as JSON
/// numbers and never go through here.
pub fn parse_duration(input: &str) -> Option<i64> {
    let text = input.trim().to_ascii_lowercase();
    let (sign, body) = match text.as_bytes().first()? {
        b'-' => (-1, &text[1..]),
        b'+' => (1, &text[1..]),
        _ => (1, text.as_str()),
    };

    let seconds = if body.contains(':') {
        parse_clock(body)?
    } else if body.contains(|c: char| matches!(c, 'h' | 'm' | 's')) {
        parse_units(body)?
    } else {
        parse_number(body)?
    };

    seconds.checked_mul(1_000)?.checked_mul(sign)
}

fn parse_number(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_clock(body: &str) -> Option<i64> {
    let parts = body
        .split(':')
        .map(parse_number)
        .collect::<Option<Vec<i64>>>()?;

    match parts.as_slice() {
        [h, m, s] => h.checked_mul(3_600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s),
        [m, s] => m.checked_mul(60)?.checked_add(*s),
        _ => None,
    }
}

fn parse_units(body: &str) -> Option<i64> {
    let mut seen = [false; 3];
    let mut total: i64 = 0;
    let mut rest = body.trim_start();

    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        let value = parse_number(&rest[..digits_end])?;
        let after = rest[digits_end..].trim_start();
        let unit_end = after
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let (slot, scale) = unit(&after[..unit_end])?;
        if std::mem::replace(&mut seen[slot], true) {
            return None;
        }
        total = total.checked_add(value.checked_mul(scale)?)?;
        rest = after[unit_end..].trim_start();
    }

    Some(total)
}

/// Slot and scale in seconds for a unit word
fn unit(word: &str) -> Option<(usize, i64)> {
    match word {
        "h" | "hr" | "hrs" | "hour" | "hours" => Some((0, 3_600)),
        "m" | "min" | "mins" | "minute" | "minutes" => Some((1, 60)),
        "s" | "sec" | "secs" | "second" | "seconds" => Some((2, 1)),
        _ => None,
    }
}
