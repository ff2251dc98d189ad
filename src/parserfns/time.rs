//! Date and time parser functions: `#time`, `#dateformat`, and the
//! `CURRENT*` variables.

use crate::{Processor, common::error_marker, expand::ArgExpander};
use regex::Regex;
use std::sync::LazyLock;
use time::{Date, Month, OffsetDateTime, Time, UtcOffset};

/// Full English month names, indexed by month number - 1.
const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December",
];

/// Abbreviated English month names.
const MONTH_ABBREVS: [&str; 12] =
    ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

/// Full English weekday names, Monday first.
const DAY_NAMES: [&str; 7] =
    ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];

/// Abbreviated English weekday names, Monday first.
const DAY_ABBREVS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Looks up a month by its English name or abbreviation (with or without a
/// trailing period).
fn month_by_name(token: &str) -> Option<Month> {
    let token = token.strip_suffix('.').unwrap_or(token);
    MONTH_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .or_else(|| MONTH_ABBREVS.iter().position(|abbrev| abbrev.eq_ignore_ascii_case(token)))
        .and_then(|index| Month::try_from(index as u8 + 1).ok())
}

/// Permissively parses a date/time string. Returns `None` when nothing
/// date-like can be recognized.
pub(crate) fn parse_date(text: &str, now: OffsetDateTime) -> Option<OffsetDateTime> {
    static TIME_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap());
    static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{1,2}):(\d{2})(?::(\d{2}))?)?$")
            .unwrap()
    });
    static STAMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{14}$").unwrap());

    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("now") {
        return Some(now);
    }

    // Unix timestamp syntax
    if let Some(stamp) = text.strip_prefix('@') {
        let seconds = stamp.trim().parse::<f64>().ok()?;
        return OffsetDateTime::from_unix_timestamp(seconds as i64).ok();
    }

    // ISO 8601 date, with optional time
    if let Some(caps) = ISO_RE.captures(text) {
        let date = Date::from_calendar_date(
            caps[1].parse().ok()?,
            Month::try_from(caps[2].parse::<u8>().ok()?).ok()?,
            caps[3].parse().ok()?,
        )
        .ok()?;
        let time = match caps.get(4) {
            Some(hour) => Time::from_hms(
                hour.as_str().parse().ok()?,
                caps[5].parse().ok()?,
                caps.get(6).map_or(Ok(0), |s| s.as_str().parse()).ok()?,
            )
            .ok()?,
            None => Time::MIDNIGHT,
        };
        return Some(date.with_time(time).assume_utc());
    }

    // MediaWiki database timestamp, YYYYMMDDHHMMSS
    if STAMP_RE.is_match(text) {
        let date = Date::from_calendar_date(
            text[0..4].parse().ok()?,
            Month::try_from(text[4..6].parse::<u8>().ok()?).ok()?,
            text[6..8].parse().ok()?,
        )
        .ok()?;
        let time = Time::from_hms(
            text[8..10].parse().ok()?,
            text[10..12].parse().ok()?,
            text[12..14].parse().ok()?,
        )
        .ok()?;
        return Some(date.with_time(time).assume_utc());
    }

    // Free-form token scan: "January 3, 1999", "3 Jan 1999 12:30", etc.
    let mut year: Option<i32> = None;
    let mut month: Option<Month> = None;
    let mut day: Option<u8> = None;
    let mut time_of_day: Option<Time> = None;
    let mut saw_anything = false;

    for token in text.split([' ', '\t', ',']).filter(|token| !token.is_empty()) {
        if token.eq_ignore_ascii_case("utc") || token.eq_ignore_ascii_case("gmt") {
            continue;
        }
        if let Some(m) = month_by_name(token) {
            month = Some(m);
            saw_anything = true;
            continue;
        }
        if let Some(caps) = TIME_RE.captures(token) {
            time_of_day = Time::from_hms(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps.get(3).map_or(Ok(0), |s| s.as_str().parse()).ok()?,
            )
            .ok();
            saw_anything = true;
            continue;
        }
        if let Ok(number) = token.parse::<i32>() {
            saw_anything = true;
            if token.len() >= 4 || number > 31 {
                year = Some(number);
            } else if day.is_none() {
                day = Some(u8::try_from(number).ok()?);
            } else {
                year = Some(number);
            }
            continue;
        }
        return None;
    }

    if !saw_anything {
        return None;
    }

    let date = Date::from_calendar_date(
        year.unwrap_or(now.year()),
        month.unwrap_or(Month::January),
        day.unwrap_or(1),
    )
    .ok()?;
    Some(date.with_time(time_of_day.unwrap_or(Time::MIDNIGHT)).assume_utc())
}

/// Formats a date according to a MediaWiki PHP-style format string.
/// Double-quoted runs inside the format are literals; unknown characters
/// pass through unchanged.
pub(crate) fn format_time(fmt: &str, t: OffsetDateTime) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut iter = fmt.chars().peekable();
    let month_index = usize::from(u8::from(t.month())) - 1;
    let weekday_index = usize::from(t.weekday().number_from_monday()) - 1;
    let (iso_year, iso_week, _) = t.to_iso_week_date();

    while let Some(c) = iter.next() {
        match c {
            '"' => {
                let mut literal = String::new();
                let mut closed = false;
                for c in iter.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    literal.push(c);
                }
                if closed {
                    out += &literal;
                } else {
                    out.push('"');
                    out += &literal;
                }
            }
            'x' => {
                if iter.peek() == Some(&'g') {
                    iter.next();
                    // Should be the genitive month name; English has none
                    out += MONTH_NAMES[month_index];
                } else {
                    out.push('x');
                }
            }
            'Y' => out += &format!("{:04}", t.year()),
            'y' => out += &format!("{:02}", t.year().rem_euclid(100)),
            'L' => out += if time::util::is_leap_year(t.year()) { "1" } else { "0" },
            'o' => out += &format!("{iso_year:04}"),
            'n' => out += &u8::from(t.month()).to_string(),
            'm' => out += &format!("{:02}", u8::from(t.month())),
            'M' => out += MONTH_ABBREVS[month_index],
            'F' => out += MONTH_NAMES[month_index],
            'j' => out += &t.day().to_string(),
            'd' => out += &format!("{:02}", t.day()),
            'z' => out += &(t.ordinal() - 1).to_string(),
            'W' => out += &format!("{iso_week:02}"),
            'N' => out += &t.weekday().number_from_monday().to_string(),
            'w' => out += &t.weekday().number_days_from_sunday().to_string(),
            'D' => out += DAY_ABBREVS[weekday_index],
            'l' => out += DAY_NAMES[weekday_index],
            'a' => out += if t.hour() < 12 { "am" } else { "pm" },
            'A' => out += if t.hour() < 12 { "AM" } else { "PM" },
            'g' => out += &hour12(t.hour()).to_string(),
            'h' => out += &format!("{:02}", hour12(t.hour())),
            'G' => out += &t.hour().to_string(),
            'H' => out += &format!("{:02}", t.hour()),
            'i' => out += &format!("{:02}", t.minute()),
            's' => out += &format!("{:02}", t.second()),
            'U' => out += &t.unix_timestamp().to_string(),
            'e' | 'T' => out += "UTC",
            'I' => out += "0",
            'O' => out += "+0000",
            'P' => out += "+00:00",
            'Z' => out += &t.offset().whole_seconds().to_string(),
            't' => out += &time::util::days_in_year_month(t.year(), t.month()).to_string(),
            'c' => {
                out += &format!(
                    "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}+00:00",
                    t.year(),
                    u8::from(t.month()),
                    t.day(),
                    t.hour(),
                    t.minute(),
                    t.second()
                );
            }
            'r' => {
                out += &format!(
                    "{}, {:02} {} {:04} {:02}:{:02}:{:02} +0000",
                    DAY_ABBREVS[weekday_index],
                    t.day(),
                    MONTH_ABBREVS[month_index],
                    t.year(),
                    t.hour(),
                    t.minute(),
                    t.second()
                );
            }
            c => out.push(c),
        }
    }
    out
}

/// Converts a 24-hour hour to 12-hour clock form.
fn hour12(hour: u8) -> u8 {
    match hour % 12 {
        0 => 12,
        h => h,
    }
}

/// The current time, in the local zone when `local` is truthy and UTC
/// otherwise.
fn current_time(local: bool) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    if local {
        UtcOffset::current_local_offset().map_or(now, |offset| now.to_offset(offset))
    } else {
        now
    }
}

/// `#time:fmt|date|lang|local` — formats a date.
pub(crate) fn time_fn(
    ctx: &mut Processor,
    _: &str,
    args: &[String],
    exp: &ArgExpander<'_>,
) -> String {
    let fmt = args.first().map_or_else(String::new, |a| exp.expand(ctx, a).trim().to_string());
    let date = args.get(1).map_or_else(String::new, |a| exp.expand(ctx, a).trim().to_string());
    // The language argument is accepted but only English is rendered.
    let _lang = args.get(2).map_or_else(String::new, |a| exp.expand(ctx, a).trim().to_string());
    let local = args.get(3).is_some_and(|a| {
        let local = exp.expand(ctx, a);
        let local = local.trim();
        !local.is_empty() && local != "0"
    });

    let now = current_time(local);
    match parse_date(&date, now) {
        Some(t) => format_time(&fmt, t),
        None => {
            ctx.warning(format!("bad time syntax in #time: {date:?}"), None);
            error_marker(format!("Bad time syntax: {}", html_escape::encode_text(&date)))
        }
    }
}

/// `#dateformat` / `#formatdate`: reformats a date per a display
/// preference; invalid dates pass through unchanged.
pub(crate) fn dateformat_fn(
    ctx: &mut Processor,
    _: &str,
    args: &[String],
    exp: &ArgExpander<'_>,
) -> String {
    static HAS_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{3}").unwrap());
    /// Marker year standing in for "no year given".
    const NO_YEAR: i32 = 3333;

    let date = args.first().map_or_else(String::new, |a| exp.expand(ctx, a));
    let fmt = args.get(1).map_or_else(|| "ISO 8601".to_string(), |a| exp.expand(ctx, a));

    let mut probe = date.clone();
    if !HAS_YEAR.is_match(&probe) {
        probe += " 3333";
    }
    let Some(t) = parse_date(&probe, OffsetDateTime::now_utc()) else {
        // Invalid dates are returned as-is
        return date;
    };

    let fmt = if matches!(fmt.as_str(), "ISO 8601" | "ISO8601") && t.year() == NO_YEAR {
        "mdy".to_string()
    } else {
        fmt
    };
    let date_only = t.hour() == 0 && t.minute() == 0 && t.second() == 0;
    let dateless = t.year() == NO_YEAR;

    match fmt.as_str() {
        "mdy" => match (date_only, dateless) {
            (true, true) => format_time("M d", t),
            (true, false) => format_time("M d, Y", t),
            (false, _) => format_time("M d, Y H:i:s", t),
        },
        "dmy" => match (date_only, dateless) {
            (true, true) => format_time("d M", t),
            (true, false) => format_time("d M Y", t),
            (false, _) => format_time("d M Y H:i:s", t),
        },
        "ymd" => match (date_only, dateless) {
            (true, true) => format_time("M d", t),
            (true, false) => format_time("Y M d", t),
            (false, _) => format_time("Y M d H:i:s", t),
        },
        _ => {
            if date_only {
                format_time("Y-m-d", t)
            } else {
                format_time("c", t)
            }
        }
    }
}

/// `CURRENTYEAR`.
pub(crate) fn currentyear_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    OffsetDateTime::now_utc().year().to_string()
}

/// `CURRENTMONTH`: zero-padded.
pub(crate) fn currentmonth_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    format!("{:02}", u8::from(OffsetDateTime::now_utc().month()))
}

/// `CURRENTMONTH1`: unpadded.
pub(crate) fn currentmonth1_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    u8::from(OffsetDateTime::now_utc().month()).to_string()
}

/// `CURRENTMONTHNAME`.
pub(crate) fn currentmonthname_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    MONTH_NAMES[usize::from(u8::from(OffsetDateTime::now_utc().month())) - 1].to_string()
}

/// `CURRENTMONTHABBREV`.
pub(crate) fn currentmonthabbrev_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    MONTH_ABBREVS[usize::from(u8::from(OffsetDateTime::now_utc().month())) - 1].to_string()
}

/// `CURRENTDAY`: unpadded.
pub(crate) fn currentday_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    OffsetDateTime::now_utc().day().to_string()
}

/// `CURRENTDAY2`: zero-padded.
pub(crate) fn currentday2_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    format!("{:02}", OffsetDateTime::now_utc().day())
}

/// `CURRENTDOW`: day of week, Monday = 0.
pub(crate) fn currentdow_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    (OffsetDateTime::now_utc().weekday().number_from_monday() - 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parse_dates() {
        let now = datetime!(2020-06-15 12:00 UTC);
        let t = parse_date("January 3, 1999", now).unwrap();
        assert_eq!((t.year(), u8::from(t.month()), t.day()), (1999, 1, 3));
        let t = parse_date("7 February 2007", now).unwrap();
        assert_eq!((t.year(), u8::from(t.month()), t.day()), (2007, 2, 7));
        let t = parse_date("2007-02-07 13:05", now).unwrap();
        assert_eq!((t.hour(), t.minute()), (13, 5));
        let t = parse_date("20070207130501", now).unwrap();
        assert_eq!((t.day(), t.second()), (7, 1));
        let t = parse_date("@1000000000", now).unwrap();
        assert_eq!(t.year(), 2001);
        assert_eq!(parse_date("now", now).unwrap(), now);
        assert_eq!(parse_date("", now).unwrap(), now);
        assert!(parse_date("total nonsense", now).is_none());
    }

    #[test]
    fn format_chars() {
        let t = datetime!(2007-02-04 00:00 UTC);
        assert_eq!(format_time("Y", t), "2007");
        assert_eq!(format_time("y", t), "07");
        assert_eq!(format_time("n", t), "2");
        assert_eq!(format_time("m", t), "02");
        assert_eq!(format_time("j", t), "4");
        assert_eq!(format_time("d", t), "04");
        assert_eq!(format_time("M", t), "Feb");
        assert_eq!(format_time("F", t), "February");
        assert_eq!(format_time("N", t), "7");
        assert_eq!(format_time("w", t), "0");
        assert_eq!(format_time("D", t), "Sun");
        assert_eq!(format_time("l", t), "Sunday");
        assert_eq!(format_time("L", datetime!(2004-01-03 00:00 UTC)), "1");
        assert_eq!(format_time("L", datetime!(2100-01-03 00:00 UTC)), "0");
        assert_eq!(format_time("o", datetime!(2000-01-01 00:00 UTC)), "1999");
        assert_eq!(format_time("o", datetime!(2000-01-10 00:00 UTC)), "2000");
        assert_eq!(format_time("z", datetime!(2007-01-06 00:00 UTC)), "5");
        assert_eq!(format_time("W", datetime!(2007-01-02 00:00 UTC)), "01");
        assert_eq!(format_time("W", datetime!(2007-02-02 00:00 UTC)), "05");
        assert_eq!(
            format_time("Yxgd \"(foo)\"", datetime!(2007-02-07 00:00 UTC)),
            "2007February07 (foo)"
        );
    }
}
