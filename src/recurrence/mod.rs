//! Expansion of recurring events into concrete occurrences
//!
//! This is a pure computation: nothing here touches the network or the local store,
//! so it can be called concurrently from anywhere.

pub mod exceptions;

use chrono::{DateTime, Duration, Months, Utc};

use crate::event::{DateWindow, Event, RecurrenceRule};

/// One concrete instance of an event, produced for display or query purposes.
/// Occurrences are never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Occurrence<'a> {
    event: &'a Event,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl<'a> Occurrence<'a> {
    /// The event this occurrence is an instance of
    pub fn event(&self) -> &'a Event { self.event }
    /// The start of this occurrence. Only non-recurring events that have no start produce occurrences without a start
    pub fn start(&self) -> Option<DateTime<Utc>> { self.start }
    pub fn end(&self) -> Option<DateTime<Utc>> { self.end }
}

/// Turn events into the occurrences that fall inside `window`.
///
/// Non-recurring events are passed through unchanged.
/// Recurring events are stepped forward from their start, honoring their exceptions.
pub fn expand<'a>(events: &'a [Event], window: &DateWindow) -> Vec<Occurrence<'a>> {
    let mut occurrences = Vec::new();
    for event in events {
        expand_event(event, window, &mut occurrences);
    }
    occurrences
}

/// Expand a single event, appending its occurrences to `out`
pub fn expand_event<'a>(event: &'a Event, window: &DateWindow, out: &mut Vec<Occurrence<'a>>) {
    let rule = event.recurrence();
    if rule == RecurrenceRule::None {
        out.push(Occurrence { event, start: event.start(), end: event.end() });
        return;
    }

    let anchor = match event.start() {
        None => {
            log::debug!("Recurring event {} has no start, it has no occurrence", event.id());
            return;
        },
        Some(start) => start,
    };
    let duration = event.duration();

    let mut index = first_index(rule, anchor, window.start());
    while let Some(start) = nth_occurrence(rule, anchor, index) {
        if start > window.end() {
            break;
        }
        index += 1;

        let day = start.date_naive();
        if event.exceptions().is_truncated_at(day) {
            break;
        }
        if event.exceptions().suppresses(day) {
            continue;
        }

        out.push(Occurrence {
            event,
            start: Some(start),
            end: duration.map(|d| start + d),
        });
    }
}

/// The start of the n-th occurrence (the anchor being the 0-th one)
fn nth_occurrence(rule: RecurrenceRule, anchor: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
    if let Some(step) = rule.fixed_interval() {
        return anchor.checked_add_signed(Duration::days(step.num_days() * i64::from(n)));
    }

    match rule {
        // chrono clamps to the last day of shorter months.
        // Months are always counted from the anchor, so that a clamp does not shift the following occurrences
        RecurrenceRule::Monthly => anchor.checked_add_months(Months::new(n)),
        _ => None,
    }
}

/// The index of the first occurrence that starts at or after `window_start`
fn first_index(rule: RecurrenceRule, anchor: DateTime<Utc>, window_start: DateTime<Utc>) -> u32 {
    if anchor >= window_start {
        return 0;
    }

    if let Some(step) = rule.fixed_interval() {
        let elapsed = (window_start - anchor).num_seconds();
        let step = step.num_seconds();
        // Skip in bulk, rounding up
        let skipped = (elapsed + step - 1) / step;
        return u32::try_from(skipped).unwrap_or(u32::MAX);
    }

    // Jump close to the window using calendar months, then adjust for day-of-month and time of day
    let months_between = (window_start.year_month_index() - anchor.year_month_index()).max(1) - 1;
    let mut index = u32::try_from(months_between).unwrap_or(u32::MAX);
    while let Some(start) = nth_occurrence(rule, anchor, index) {
        if start >= window_start {
            break;
        }
        index += 1;
    }
    index
}

trait YearMonthIndex {
    fn year_month_index(&self) -> i64;
}

impl YearMonthIndex for DateTime<Utc> {
    fn year_month_index(&self) -> i64 {
        use chrono::Datelike;
        i64::from(self.year()) * 12 + i64::from(self.month0())
    }
}

/// Convenience for callers that hold bare bounds instead of a [`DateWindow`]
pub fn expand_between<'a>(events: &'a [Event], window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Vec<Occurrence<'a>> {
    expand(events, &DateWindow::new(window_start, window_end))
}
