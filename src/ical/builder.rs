//! A module to build ICal files

use std::error::Error;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use ics::properties::{Description, DtEnd, DtStart, ExDate, LastModified, Location, RRule, Sequence, Summary};
use ics::components::Parameter;
use ics::{escape_text, ICalendar};

use crate::event::{Event, RecurrenceRule};
use super::{default_prod_id, ICAL_DATE, ICAL_DATE_TIME_UTC};

/// Timed events that do not end after they start are given this duration
fn minimum_duration() -> Duration {
    Duration::hours(1)
}

/// Create an iCal file from an [`Event`]
///
/// The event must have a UID and a start.
/// Modification time and `SEQUENCE` are stamped at build time, so that the server always sees a fresher revision.
pub fn build_from(event: &Event) -> Result<String, Box<dyn Error + Send + Sync>> {
    let uid = match event.uid() {
        None => return Err(format!("Event {} has no UID, it cannot be serialized", event.id()).into()),
        Some(uid) => uid,
    };
    let start = match event.start() {
        None => return Err(format!("Event {} has no start date, it cannot be serialized", event.id()).into()),
        Some(start) => start,
    };

    let s_now = format_date_time(&Utc::now());
    let mut ical_event = ics::Event::new(uid, s_now.clone());
    ical_event.push(LastModified::new(s_now));
    ical_event.push(Sequence::new(event.sequence().saturating_add(1).to_string()));
    ical_event.push(Summary::new(escape_text(event.title())));
    if let Some(description) = event.description() {
        ical_event.push(Description::new(escape_text(description)));
    }
    if let Some(location) = event.location() {
        ical_event.push(Location::new(escape_text(location)));
    }

    if event.is_all_day() {
        let first_day = start.date_naive();
        let last_day = event.end().map(|end| end.date_naive()).filter(|last| *last >= first_day).unwrap_or(first_day);
        // DTEND is exclusive for dates
        let end_day = last_day.succ_opt().ok_or("Invalid all-day end date")?;

        let mut dtstart = DtStart::new(format_date(&first_day));
        dtstart.add(Parameter::new("VALUE", "DATE"));
        ical_event.push(dtstart);
        let mut dtend = DtEnd::new(format_date(&end_day));
        dtend.add(Parameter::new("VALUE", "DATE"));
        ical_event.push(dtend);
    } else {
        let end = event.end().filter(|end| *end > start).unwrap_or_else(|| start + minimum_duration());
        ical_event.push(DtStart::new(format_date_time(&start)));
        ical_event.push(DtEnd::new(format_date_time(&end)));
    }

    if let Some(rrule) = build_rrule(event) {
        ical_event.push(RRule::new(rrule));
        for date in event.exceptions().single_dates() {
            ical_event.push(build_exdate(event, &start, date));
        }
    }

    let mut calendar = ICalendar::new("2.0", default_prod_id());
    calendar.add_event(ical_event);

    Ok(calendar.to_string())
}

fn build_rrule(event: &Event) -> Option<String> {
    let freq = match event.recurrence() {
        RecurrenceRule::None => return None,
        RecurrenceRule::Daily => "FREQ=DAILY",
        RecurrenceRule::Weekly => "FREQ=WEEKLY",
        RecurrenceRule::Biweekly => "FREQ=WEEKLY;INTERVAL=2",
        RecurrenceRule::Monthly => "FREQ=MONTHLY",
    };

    // UNTIL is inclusive, so the series ends the day before the truncation
    let until = event.exceptions().truncation().and_then(|date| date.pred_opt());
    let rrule = match until {
        None => freq.to_string(),
        Some(last_day) if event.is_all_day() => format!("{};UNTIL={}", freq, format_date(&last_day)),
        Some(last_day) => {
            let end_of_day = last_day.and_hms_opt(23, 59, 59)?.and_utc();
            format!("{};UNTIL={}", freq, format_date_time(&end_of_day))
        },
    };
    Some(rrule)
}

/// EXDATE values must have the same type (and time of day) as DTSTART
fn build_exdate(event: &Event, start: &DateTime<Utc>, date: NaiveDate) -> ExDate<'static> {
    if event.is_all_day() {
        let mut exdate = ExDate::new(format_date(&date));
        exdate.add(Parameter::new("VALUE", "DATE"));
        exdate
    } else {
        let instant = date.and_time(start.time()).and_utc();
        ExDate::new(format_date_time(&instant))
    }
}

fn format_date(date: &NaiveDate) -> String {
    date.format(ICAL_DATE).to_string()
}

fn format_date_time(dt: &DateTime<Utc>) -> String {
    dt.format(ICAL_DATE_TIME_UTC).to_string()
}
