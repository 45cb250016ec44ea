//! Time expression parsing
//!
//! Turns the leading part of a command argument ("10m", "1h 30m", "18:00",
//! "завтра 9:30", "2026-12-31 23:00", "через 2 часа") into an absolute UTC
//! instant and hands back the remaining text.

use crate::config::{MAX_HORIZON_DAYS, MAX_UTC_OFFSET_MINUTES, MIN_REPEAT_SECS};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use lazy_regex::lazy_regex;
use thiserror::Error;

static RE_TOKEN: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\S+");
static RE_COMPACT: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^(?:\d+\p{L}+)+$");
static RE_COMPACT_PART: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(\d+)(\p{L}+)");
static RE_CLOCK: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^([01]?\d|2[0-3]):([0-5]\d)$");
static RE_ISO_DATE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^(\d{4})-(\d{1,2})-(\d{1,2})$");
static RE_DOT_DATE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^(\d{1,2})\.(\d{1,2})(?:\.(\d{4}))?$");
static RE_OFFSET: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^([+-])?(\d{1,2})(?::?(\d{2}))?$");

/// Clock time used when a date is given without one
const DEFAULT_HOUR: u32 = 9;

const SECS_PER_DAY: i64 = 86_400;

/// Errors produced while reading a time expression
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WhenError {
    /// Nothing to parse
    #[error("time expression is empty")]
    Empty,
    /// The leading token is not a recognised time expression
    #[error("unrecognized time expression: {0}")]
    Unrecognized(String),
    /// A relative duration of zero
    #[error("duration must be greater than zero")]
    ZeroDuration,
    /// An absolute time that has already passed
    #[error("{0} is already in the past")]
    InPast(String),
    /// Beyond the scheduling horizon
    #[error("time is more than {max} days ahead", max = MAX_HORIZON_DAYS)]
    TooFar,
    /// `/every` interval below the minimum
    #[error("repeat interval must be at least {min} seconds", min = MIN_REPEAT_SECS)]
    IntervalTooShort,
    /// Malformed or out-of-range UTC offset
    #[error("invalid UTC offset: {0}")]
    BadOffset(String),
}

/// A parsed due time plus whatever text followed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct When {
    /// Absolute due time
    pub due_at: DateTime<Utc>,
    /// Remaining input after the time expression, trimmed
    pub rest: String,
}

/// A parsed `/every` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Every {
    /// First occurrence and the reminder text
    pub when: When,
    /// Repeat interval in seconds
    pub interval_secs: u64,
}

#[derive(Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    end: usize,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    RE_TOKEN
        .find_iter(input)
        .map(|m| Token {
            text: m.as_str(),
            end: m.end(),
        })
        .collect()
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let secs = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" | "с" | "сек" | "секунд" | "секунду"
        | "секунды" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" | "м" | "мин" | "минут" | "минуту"
        | "минуты" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" | "ч" | "час" | "часа" | "часов" => 3600,
        "d" | "day" | "days" | "д" | "день" | "дня" | "дней" => SECS_PER_DAY,
        "w" | "week" | "weeks" | "н" | "нед" | "неделю" | "недели" | "недель" => 7 * SECS_PER_DAY,
        _ => return None,
    };
    Some(secs)
}

fn checked_amount(count: &str, unit: i64) -> Result<i64, WhenError> {
    count
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or(WhenError::TooFar)
}

/// `1h30m`-style token. `None` when the token is not shaped like one.
fn parse_compact(word: &str) -> Option<Result<i64, WhenError>> {
    if !RE_COMPACT.is_match(word) {
        return None;
    }
    let mut total: i64 = 0;
    for caps in RE_COMPACT_PART.captures_iter(word) {
        let unit = unit_seconds(&caps[2])?;
        let amount = match checked_amount(&caps[1], unit) {
            Ok(amount) => amount,
            Err(e) => return Some(Err(e)),
        };
        total = match total.checked_add(amount) {
            Some(total) => total,
            None => return Some(Err(WhenError::TooFar)),
        };
    }
    Some(Ok(total))
}

/// Reads consecutive duration tokens ("1h", "30", "min", "2ч30м").
/// Returns total seconds and the number of tokens consumed.
fn parse_duration_tokens(
    tokens: &[Token<'_>],
    allow_bare_unit: bool,
) -> Result<(i64, usize), WhenError> {
    let mut total: i64 = 0;
    let mut used = 0;

    while let Some(token) = tokens.get(used) {
        let word = token.text.to_lowercase();

        let amount = if let Some(compact) = parse_compact(&word) {
            used += 1;
            compact?
        } else if word.chars().all(|c| c.is_ascii_digit()) {
            let Some(unit) = tokens
                .get(used + 1)
                .and_then(|t| unit_seconds(&t.text.to_lowercase()))
            else {
                break;
            };
            used += 2;
            checked_amount(&word, unit)?
        } else if used == 0 && allow_bare_unit && word.chars().count() > 2 {
            // "через час", "every day"
            let Some(unit) = unit_seconds(&word) else {
                break;
            };
            used += 1;
            unit
        } else {
            break;
        };

        total = total.checked_add(amount).ok_or(WhenError::TooFar)?;
    }

    Ok((total, used))
}

fn parse_clock(word: &str) -> Option<NaiveTime> {
    let caps = RE_CLOCK.captures(word)?;
    let hour = caps[1].parse().ok()?;
    let minute = caps[2].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parses a date token; the flag tells whether the year was explicit.
fn parse_date(word: &str, today: NaiveDate) -> Option<Result<(NaiveDate, bool), WhenError>> {
    let unrecognized = || WhenError::Unrecognized(word.to_string());

    if let Some(caps) = RE_ISO_DATE.captures(word) {
        let date = (|| {
            NaiveDate::from_ymd_opt(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            )
        })();
        return Some(date.map(|d| (d, true)).ok_or_else(unrecognized));
    }

    let caps = RE_DOT_DATE.captures(word)?;
    let explicit_year = caps.get(3).is_some();
    let year = match caps.get(3) {
        Some(y) => y.as_str().parse().ok(),
        None => Some(today.year()),
    };
    let date =
        (|| NaiveDate::from_ymd_opt(year?, caps[2].parse().ok()?, caps[1].parse().ok()?))();
    Some(date.map(|d| (d, explicit_year)).ok_or_else(unrecognized))
}

fn to_utc(local: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<Utc>, WhenError> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| WhenError::Unrecognized(local.to_string()))
}

fn in_past(due_at: DateTime<Utc>, offset: FixedOffset) -> WhenError {
    WhenError::InPast(format_local(due_at, offset))
}

/// Next occurrence of a wall-clock time: today if still ahead, else tomorrow
fn next_clock(
    time: NaiveTime,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, WhenError> {
    let local_now = now.with_timezone(&offset).naive_local();
    let mut candidate = local_now.date().and_time(time);
    if candidate <= local_now {
        candidate += Duration::days(1);
    }
    to_utc(candidate, offset)
}

fn parse_relative(
    tokens: &[Token<'_>],
    now: DateTime<Utc>,
    allow_bare_unit: bool,
) -> Result<Option<(DateTime<Utc>, usize)>, WhenError> {
    let (secs, used) = parse_duration_tokens(tokens, allow_bare_unit)?;
    if used == 0 {
        return Ok(None);
    }
    if secs == 0 {
        return Err(WhenError::ZeroDuration);
    }
    if secs > MAX_HORIZON_DAYS * SECS_PER_DAY {
        return Err(WhenError::TooFar);
    }
    Ok(Some((now + Duration::seconds(secs), used)))
}

fn is_at_word(word: &str) -> bool {
    matches!(word.to_lowercase().as_str(), "at" | "в" | "во")
}

/// Clock following a date word, with an optional "at"/"в" in between.
/// Returns the time and the number of tokens it took.
fn clock_after_date(tokens: &[Token<'_>]) -> Option<(NaiveTime, usize)> {
    let next = tokens.get(1)?;
    if let Some(time) = parse_clock(next.text) {
        return Some((time, 1));
    }
    if !is_at_word(next.text) {
        return None;
    }
    tokens
        .get(2)
        .and_then(|t| parse_clock(t.text))
        .map(|time| (time, 2))
}

fn parse_absolute(
    tokens: &[Token<'_>],
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Option<(DateTime<Utc>, usize)>, WhenError> {
    let Some(first) = tokens.first() else {
        return Ok(None);
    };
    let head = first.text.to_lowercase();
    let local_now = now.with_timezone(&offset).naive_local();
    let clock_after = clock_after_date(tokens);
    let default_time = NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0).unwrap_or_default();
    let (time, used) = clock_after.map_or((default_time, 1), |(t, n)| (t, n + 1));

    match head.as_str() {
        "tomorrow" | "завтра" => {
            let date = local_now.date() + Duration::days(1);
            let due_at = to_utc(date.and_time(time), offset)?;
            return Ok(Some((due_at, used)));
        }
        "today" | "сегодня" => {
            if clock_after.is_none() {
                return Err(WhenError::Unrecognized(first.text.to_string()));
            }
            let due_at = to_utc(local_now.date().and_time(time), offset)?;
            if due_at <= now {
                return Err(in_past(due_at, offset));
            }
            return Ok(Some((due_at, used)));
        }
        _ => {}
    }

    if let Some(time) = parse_clock(&head) {
        return Ok(Some((next_clock(time, now, offset)?, 1)));
    }

    let Some(parsed) = parse_date(&head, local_now.date()) else {
        return Ok(None);
    };
    let (mut date, explicit_year) = parsed?;

    if !explicit_year && date.and_time(time) <= local_now {
        date = date
            .with_year(date.year() + 1)
            .ok_or_else(|| WhenError::Unrecognized(first.text.to_string()))?;
    }

    let due_at = to_utc(date.and_time(time), offset)?;
    if due_at <= now {
        return Err(in_past(due_at, offset));
    }
    Ok(Some((due_at, used)))
}

fn check_horizon(due_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), WhenError> {
    if due_at - now > Duration::days(MAX_HORIZON_DAYS) {
        return Err(WhenError::TooFar);
    }
    Ok(())
}

fn rest_after(input: &str, last: Token<'_>) -> String {
    input[last.end..].trim().to_string()
}

/// Parse a leading time expression.
///
/// # Examples
///
/// ```
/// use chrono::{FixedOffset, TimeZone, Utc};
/// use tg_reminder_bot::reminder::when::parse_when;
///
/// let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
/// let utc = FixedOffset::east_opt(0).unwrap();
/// let when = parse_when("1h30m stretch", now, utc).unwrap();
/// assert_eq!(when.rest, "stretch");
/// assert_eq!((when.due_at - now).num_minutes(), 90);
/// ```
///
/// # Errors
///
/// Returns a [`WhenError`] if the input does not start with a usable time.
pub fn parse_when(
    input: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<When, WhenError> {
    let input = input.trim();
    let tokens = tokenize(input);
    let Some(first) = tokens.first() else {
        return Err(WhenError::Empty);
    };

    let lead = first.text.to_lowercase();
    let relative_hint = matches!(lead.as_str(), "in" | "через");
    let skip = usize::from(relative_hint || matches!(lead.as_str(), "at" | "on" | "в" | "во"));
    let tokens = &tokens[skip..];
    let Some(head) = tokens.first() else {
        return Err(WhenError::Unrecognized(input.to_string()));
    };

    let found = match parse_relative(tokens, now, relative_hint)? {
        Some(found) => Some(found),
        None => parse_absolute(tokens, now, offset)?,
    };
    let Some((due_at, used)) = found else {
        return Err(WhenError::Unrecognized(head.text.to_string()));
    };
    check_horizon(due_at, now)?;

    Ok(When {
        due_at,
        rest: rest_after(input, tokens[used - 1]),
    })
}

/// Parse `/every` arguments: `<interval> [[at] HH:MM] <text>`.
///
/// Without a clock the first occurrence is one interval from `now`.
///
/// # Errors
///
/// Returns a [`WhenError`] for a missing, too short or too long interval.
pub fn parse_every(
    input: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Every, WhenError> {
    let input = input.trim();
    let tokens = tokenize(input);
    let Some(first) = tokens.first() else {
        return Err(WhenError::Empty);
    };

    let (secs, mut used) = parse_duration_tokens(&tokens, true)?;
    if used == 0 {
        return Err(WhenError::Unrecognized(first.text.to_string()));
    }
    let interval_secs = u64::try_from(secs).map_err(|_| WhenError::TooFar)?;
    if interval_secs < MIN_REPEAT_SECS {
        return Err(WhenError::IntervalTooShort);
    }
    if secs > MAX_HORIZON_DAYS * SECS_PER_DAY {
        return Err(WhenError::TooFar);
    }

    let mut due_at = now + Duration::seconds(secs);
    let mut clock_at = used;
    if tokens.get(clock_at).is_some_and(|t| is_at_word(t.text)) {
        clock_at += 1;
    }
    if let Some(time) = tokens.get(clock_at).and_then(|t| parse_clock(t.text)) {
        due_at = next_clock(time, now, offset)?;
        used = clock_at + 1;
    }

    Ok(Every {
        when: When {
            due_at,
            rest: rest_after(input, tokens[used - 1]),
        },
        interval_secs,
    })
}

/// Parse a UTC offset such as `+3`, `-4:30`, `UTC+05:45` into minutes.
///
/// # Errors
///
/// Returns [`WhenError::BadOffset`] for malformed or out-of-range values.
pub fn parse_offset(input: &str) -> Result<i32, WhenError> {
    let bad = || WhenError::BadOffset(input.trim().to_string());
    let lower = input.trim().to_lowercase();
    let body = lower
        .strip_prefix("utc")
        .or_else(|| lower.strip_prefix("gmt"))
        .unwrap_or(&lower)
        .trim();

    if body.is_empty() {
        return Ok(0);
    }

    let caps = RE_OFFSET.captures(body).ok_or_else(bad)?;
    let hours: i32 = caps[2].parse().map_err(|_| bad())?;
    let minutes: i32 = match caps.get(3) {
        Some(m) => m.as_str().parse().map_err(|_| bad())?,
        None => 0,
    };
    if minutes >= 60 {
        return Err(bad());
    }

    let total = hours * 60 + minutes;
    if total > MAX_UTC_OFFSET_MINUTES {
        return Err(bad());
    }
    Ok(if caps.get(1).is_some_and(|s| s.as_str() == "-") {
        -total
    } else {
        total
    })
}

/// Builds a `FixedOffset` from minutes, falling back to UTC when out of range
#[must_use]
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Formats an instant as local `YYYY-MM-DD HH:MM`
#[must_use]
pub fn format_local(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

/// Formats an offset in minutes as `UTC+03:00`
#[must_use]
pub fn format_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.abs();
    format!("UTC{sign}{:02}:{:02}", abs / 60, abs % 60)
}

/// Formats a repeat interval compactly, e.g. `1д 2ч 30м`
#[must_use]
pub fn format_interval(secs: u64) -> String {
    const UNITS: [(u64, &str); 5] = [
        (604_800, "н"),
        (86_400, "д"),
        (3600, "ч"),
        (60, "м"),
        (1, "с"),
    ];

    let mut left = secs;
    let mut parts = Vec::new();
    for (size, label) in UNITS {
        if left >= size {
            parts.push(format!("{}{label}", left / size));
            left %= size;
        }
    }
    if parts.is_empty() {
        return "0с".to_string();
    }
    parts.join(" ")
}
