//! A module to parse ICal files

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;

use crate::event::{midnight_utc, Event, EventSource, RecurrenceRule};
use crate::recurrence::exceptions::{ExceptionSet, RecurrenceException};
use super::{ICAL_DATE, ICAL_DATE_TIME_LOCAL};


/// Parse an iCal file into the events it contains.
///
/// This never fails: invalid content is logged and produces no event at all.
/// Components without a UID are dropped, since they could neither be deduplicated nor updated later.
/// Components other than `VEVENT` are ignored.
pub fn parse(content: &str, source: EventSource) -> Vec<Event> {
    let mut events = Vec::new();
    let reader = ical::IcalParser::new(content.trim().as_bytes());

    for calendar in reader {
        let calendar = match calendar {
            Err(err) => {
                log::warn!("Unable to parse iCal data: {}. Ignoring it", err);
                return Vec::new();
            },
            Ok(cal) => cal,
        };

        for ical_event in &calendar.events {
            if let Some(event) = parse_event(ical_event, source) {
                events.push(event);
            }
        }
    }

    events
}

fn parse_event(ical_event: &IcalEvent, source: EventSource) -> Option<Event> {
    let uid = match find_value(&ical_event.properties, "UID").map(str::trim) {
        Some(uid) if uid.is_empty() == false => uid,
        _ => {
            log::debug!("Dropping a VEVENT without UID");
            return None;
        },
    };
    // Overrides of single instances share the UID of their series. Only the series is kept
    if find_property(&ical_event.properties, "RECURRENCE-ID").is_some() {
        log::debug!("Ignoring an overridden instance of {}", uid);
        return None;
    }

    let mut event = Event::new_remote(uid, source);

    let title = find_value(&ical_event.properties, "SUMMARY").map(unescape_text).unwrap_or_default();
    let description = find_value(&ical_event.properties, "DESCRIPTION").map(unescape_text);
    let location = find_value(&ical_event.properties, "LOCATION").map(unescape_text);
    event.set_contents(title, description, location);

    let start = find_property(&ical_event.properties, "DTSTART").and_then(parse_time);
    let end = find_property(&ical_event.properties, "DTEND").and_then(parse_time)
        .or_else(|| {
            let start = start.as_ref()?;
            let duration = find_value(&ical_event.properties, "DURATION").and_then(parse_duration)?;
            Some(ParsedTime { instant: start.instant + duration, is_date: start.is_date })
        });
    match start {
        None => event.set_schedule(None, end.map(|t| t.instant), false),
        Some(start) if start.is_date => {
            // The end of all-day events is exclusive in iCal files, but inclusive in our model
            let last_day = match end {
                Some(end) if end.instant > start.instant => end.instant - Duration::days(1),
                _ => start.instant,
            };
            event.set_schedule(Some(start.instant), Some(last_day), true);
        },
        Some(start) => event.set_schedule(Some(start.instant), end.map(|t| t.instant), false),
    }

    let last_modified = find_property(&ical_event.properties, "LAST-MODIFIED")
        .or_else(|| find_property(&ical_event.properties, "DTSTAMP"))
        .and_then(parse_time);
    if let Some(lm) = last_modified {
        event.set_last_modified(lm.instant);
    }

    if let Some(sequence) = find_value(&ical_event.properties, "SEQUENCE").and_then(|s| u32::from_str(s.trim()).ok()) {
        event.set_sequence(sequence);
    }

    let (recurrence, truncation) = match find_value(&ical_event.properties, "RRULE") {
        None => (RecurrenceRule::None, None),
        Some(rrule) => parse_rrule(rrule),
    };
    let mut exceptions: ExceptionSet = ical_event.properties.iter()
        .filter(|prop| prop.name == "EXDATE")
        .flat_map(parse_exdates)
        .map(RecurrenceException::Single)
        .collect();
    if let Some(date) = truncation {
        exceptions.insert(RecurrenceException::From(date));
    }
    event.set_repetition(recurrence, exceptions);

    Some(event)
}

fn find_property<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties.iter().find(|prop| prop.name == name)
}

fn find_value<'a>(properties: &'a [Property], name: &str) -> Option<&'a str> {
    find_property(properties, name).and_then(|prop| prop.value.as_deref())
}

fn find_param<'a>(property: &'a Property, name: &str) -> Option<&'a str> {
    property.params.as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|value| value.as_str())
}


/// A parsed `DTSTART`-like value
struct ParsedTime {
    instant: DateTime<Utc>,
    is_date: bool,
}

fn parse_time(property: &Property) -> Option<ParsedTime> {
    let value = property.value.as_deref()?.trim();
    let tzid = find_param(property, "TZID");
    let date_only = find_param(property, "VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false);
    parse_time_value(value, tzid, date_only)
}

fn parse_time_value(value: &str, tzid: Option<&str>, date_only: bool) -> Option<ParsedTime> {
    if date_only || value.len() == 8 {
        return match NaiveDate::parse_from_str(value, ICAL_DATE) {
            Err(err) => {
                log::debug!("Invalid iCal date {:?}: {}", value, err);
                None
            },
            Ok(date) => Some(ParsedTime { instant: midnight_utc(date), is_date: true }),
        };
    }

    if let Some(utc_value) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc_value, ICAL_DATE_TIME_LOCAL).ok()?;
        return Some(ParsedTime { instant: Utc.from_utc_datetime(&naive), is_date: false });
    }

    let naive = match NaiveDateTime::parse_from_str(value, ICAL_DATE_TIME_LOCAL) {
        Err(err) => {
            log::debug!("Invalid iCal date-time {:?}: {}", value, err);
            return None;
        },
        Ok(naive) => naive,
    };

    let instant = match tzid.map(chrono_tz::Tz::from_str) {
        Some(Ok(tz)) => tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        Some(Err(_)) => {
            log::debug!("Unknown time zone {:?}, considering {} as UTC", tzid, value);
            Utc.from_utc_datetime(&naive)
        },
        None => Utc.from_utc_datetime(&naive),
    };
    Some(ParsedTime { instant, is_date: false })
}

/// Parse a `DURATION` value, such as `PT1H30M` or `P2D`. Negative durations are not supported
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let value = value.strip_prefix('+').unwrap_or(value);
    let duration = match iso8601::duration(value) {
        Err(err) => {
            log::debug!("Invalid iCal duration {:?}: {}", value, err);
            return None;
        },
        Ok(d) => d,
    };
    Duration::from_std(std::time::Duration::from(duration)).ok()
}

/// Map an RRULE onto the supported recurrence rules.
/// Also returns the first cancelled date, derived from `UNTIL`
fn parse_rrule(rrule: &str) -> (RecurrenceRule, Option<NaiveDate>) {
    let mut freq = None;
    let mut interval = 1;
    let mut until = None;

    for part in rrule.split(';') {
        let (key, value) = match part.split_once('=') {
            None => continue,
            Some(kv) => kv,
        };
        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => freq = Some(value.trim().to_ascii_uppercase()),
            "INTERVAL" => interval = value.trim().parse().unwrap_or(1),
            "UNTIL" => until = parse_time_value(value.trim(), None, false),
            "COUNT" => log::debug!("RRULE COUNT is not supported, ignoring it in {:?}", rrule),
            _ => (),
        }
    }

    let rule = match (freq.as_deref(), interval) {
        (Some("DAILY"), 1) => RecurrenceRule::Daily,
        (Some("WEEKLY"), 1) => RecurrenceRule::Weekly,
        (Some("WEEKLY"), 2) => RecurrenceRule::Biweekly,
        (Some("MONTHLY"), 1) => RecurrenceRule::Monthly,
        _ => {
            log::debug!("Unsupported RRULE {:?}, considering this event as non-recurring", rrule);
            return (RecurrenceRule::None, None);
        },
    };

    // UNTIL is inclusive: the series is cancelled from the day after
    let truncation = until.and_then(|u| u.instant.date_naive().succ_opt());
    (rule, truncation)
}

fn parse_exdates(property: &Property) -> Vec<NaiveDate> {
    let value = match property.value.as_deref() {
        None => return Vec::new(),
        Some(v) => v,
    };
    let tzid = find_param(property, "TZID");
    let date_only = find_param(property, "VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false);

    value.split(',')
        .filter_map(|v| parse_time_value(v.trim(), tzid, date_only))
        .map(|t| t.instant.date_naive())
        .collect()
}

/// Reverse the TEXT escaping of RFC 5545 (section 3.3.11)
fn unescape_text(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(escaped @ ('\\' | ';' | ',')) => result.push(escaped),
            Some(other) => {
                result.push('\\');
                result.push(other);
            },
            None => result.push('\\'),
        }
    }
    result
}


#[cfg(test)]
mod test {
    const EXAMPLE_ICAL: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Nextcloud calendar v3.5.0
BEGIN:VEVENT
UID:0633de27-8c32-42be-bcb8-63bc879c6185
CREATED:20210321T001600Z
LAST-MODIFIED:20210322T101500Z
DTSTAMP:20210322T101500Z
SEQUENCE:4
SUMMARY:Dinner at Mom's\, bring a gift
DESCRIPTION:Address:\n12 Main street\; 2nd floor
LOCATION:Springfield
DTSTART;TZID=Europe/Paris:20210325T193000
DTEND;TZID=Europe/Paris:20210325T223000
END:VEVENT
END:VCALENDAR
"#;

    const EXAMPLE_ALL_DAY: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Example//EN
BEGIN:VEVENT
UID:holidays-2024
DTSTAMP:20240101T000000Z
SUMMARY:Holidays
DTSTART;VALUE=DATE:20240701
DTEND;VALUE=DATE:20240704
END:VEVENT
BEGIN:VEVENT
DTSTAMP:20240101T000000Z
SUMMARY:This one has no UID
DTSTART;VALUE=DATE:20240710
END:VEVENT
BEGIN:VTODO
UID:some-task
SUMMARY:Tasks are not events
END:VTODO
END:VCALENDAR
"#;

    const EXAMPLE_RECURRING: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Example//EN
BEGIN:VEVENT
UID:standup
DTSTAMP:20240101T000000Z
SUMMARY:Standup
DTSTART:20240101T090000Z
DTEND:20240101T091500Z
RRULE:FREQ=WEEKLY;INTERVAL=2;UNTIL=20240311T235959Z
EXDATE:20240115T090000Z,20240129T090000Z
END:VEVENT
BEGIN:VEVENT
UID:yearly
DTSTAMP:20240101T000000Z
SUMMARY:Birthday
DTSTART;VALUE=DATE:20240212
RRULE:FREQ=YEARLY
END:VEVENT
END:VCALENDAR
"#;

    const EXAMPLE_OVERRIDE: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Example//EN
BEGIN:VEVENT
UID:standup
DTSTAMP:20240101T000000Z
RECURRENCE-ID:20240108T090000Z
SUMMARY:Moved standup
DTSTART:20240108T110000Z
DTEND:20240108T111500Z
END:VEVENT
BEGIN:VEVENT
UID:standup
DTSTAMP:20240101T000000Z
SUMMARY:Standup
DTSTART:20240101T090000Z
DTEND:20240101T091500Z
RRULE:FREQ=WEEKLY
END:VEVENT
END:VCALENDAR
"#;

    const EXAMPLE_DURATIONS: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Example//EN
BEGIN:VEVENT
UID:workshop
DTSTAMP:20240101T000000Z
SUMMARY:Workshop
DTSTART:20240305T133000Z
DURATION:PT1H30M
END:VEVENT
BEGIN:VEVENT
UID:conference
DTSTAMP:20240101T000000Z
SUMMARY:Conference
DTSTART;VALUE=DATE:20240410
DURATION:P3D
END:VEVENT
END:VCALENDAR
"#;

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ical_parsing() {
        let events = parse(EXAMPLE_ICAL, EventSource::CalDav);
        assert_eq!(events.len(), 1);
        let event = &events[0];

        assert_eq!(event.uid(), Some("0633de27-8c32-42be-bcb8-63bc879c6185"));
        assert_eq!(event.source(), EventSource::CalDav);
        assert_eq!(event.title(), "Dinner at Mom's, bring a gift");
        assert_eq!(event.description(), Some("Address:\n12 Main street; 2nd floor"));
        assert_eq!(event.location(), Some("Springfield"));
        assert_eq!(event.sequence(), 4);
        assert!(event.is_all_day() == false);
        // Paris is UTC+1 in March (before the DST switch)
        assert_eq!(event.start(), Some(Utc.with_ymd_and_hms(2021, 3, 25, 18, 30, 0).unwrap()));
        assert_eq!(event.end(), Some(Utc.with_ymd_and_hms(2021, 3, 25, 21, 30, 0).unwrap()));
        assert_eq!(event.last_modified(), &Utc.with_ymd_and_hms(2021, 3, 22, 10, 15, 0).unwrap());
        assert_eq!(event.recurrence(), RecurrenceRule::None);
    }

    #[test]
    fn test_all_day_and_dropped_components() {
        let events = parse(EXAMPLE_ALL_DAY, EventSource::CalDav);
        assert_eq!(events.len(), 1);
        let event = &events[0];

        assert!(event.is_all_day());
        assert_eq!(event.start().unwrap().date_naive(), NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        // DTEND is exclusive on the wire
        assert_eq!(event.end().unwrap().date_naive(), NaiveDate::from_ymd_opt(2024, 7, 3).unwrap());
    }

    #[test]
    fn test_recurrence_parsing() {
        let events = parse(EXAMPLE_RECURRING, EventSource::CalDav);
        assert_eq!(events.len(), 2);

        let standup = &events[0];
        assert_eq!(standup.recurrence(), RecurrenceRule::Biweekly);
        assert_eq!(standup.exceptions().to_string(), "2024-01-15,2024-01-29,>=2024-03-12");

        let birthday = &events[1];
        assert_eq!(birthday.recurrence(), RecurrenceRule::None);
        assert!(birthday.exceptions().is_empty());
    }

    #[test]
    fn test_overridden_instances_keep_the_series() {
        let events = parse(EXAMPLE_OVERRIDE, EventSource::CalDav);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title(), "Standup");
        assert_eq!(events[0].recurrence(), RecurrenceRule::Weekly);
        assert_eq!(events[0].start(), Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
    }

    #[test]
    fn test_durations() {
        let events = parse(EXAMPLE_DURATIONS, EventSource::CalDav);
        assert_eq!(events.len(), 2);

        let workshop = &events[0];
        assert_eq!(workshop.end(), Some(Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()));

        // Like DTEND, the end given by a duration is exclusive for all-day events
        let conference = &events[1];
        assert!(conference.is_all_day());
        assert_eq!(conference.end().unwrap().date_naive(), NaiveDate::from_ymd_opt(2024, 4, 12).unwrap());

        assert_eq!(parse_duration("P1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("PT15M"), Some(Duration::minutes(15)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_invalid_content_yields_nothing() {
        assert!(parse("this is not an iCal file", EventSource::CalDav).is_empty());
        assert!(parse("", EventSource::CalDav).is_empty());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_text(r"a\\b\;c\,d\ne\Nf"), "a\\b;c,d\ne\nf");
        assert_eq!(unescape_text(r"trailing\"), "trailing\\");
        assert_eq!(unescape_text(r"\x"), "\\x");
    }
}
