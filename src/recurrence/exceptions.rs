//! Recurrence exceptions
//!
//! They are stored as a comma-separated list of tokens, each one being either
//! * `YYYY-MM-DD`: this single occurrence is cancelled
//! * `>=YYYY-MM-DD`: this occurrence and every later one are cancelled (i.e. the series is truncated)
//!
//! Parsing is lenient: empty tokens and surrounding whitespace are ignored, and so are tokens that are not valid dates.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TRUNCATION_PREFIX: &str = ">=";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecurrenceException {
    /// Cancels the occurrence that happens on this day
    Single(NaiveDate),
    /// Cancels the occurrence that happens on this day, and every later one
    From(NaiveDate),
}

impl RecurrenceException {
    /// Parse a single token. Returns `None` for empty or invalid tokens
    pub fn parse_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let (is_truncation, date_part) = match token.strip_prefix(TRUNCATION_PREFIX) {
            Some(rest) => (true, rest.trim()),
            None => (false, token),
        };

        match NaiveDate::parse_from_str(date_part, DATE_FORMAT) {
            Err(err) => {
                log::debug!("Ignoring invalid recurrence exception token {:?}: {}", token, err);
                None
            },
            Ok(date) if is_truncation => Some(RecurrenceException::From(date)),
            Ok(date) => Some(RecurrenceException::Single(date)),
        }
    }
}

impl Display for RecurrenceException {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecurrenceException::Single(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            RecurrenceException::From(date) => write!(f, "{}{}", TRUNCATION_PREFIX, date.format(DATE_FORMAT)),
        }
    }
}


/// The set of exceptions of a recurring event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionSet {
    tokens: Vec<RecurrenceException>,
}

impl ExceptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecurrenceException> {
        self.tokens.iter()
    }

    /// Add an exception, unless it is already there
    pub fn insert(&mut self, exception: RecurrenceException) {
        if self.tokens.contains(&exception) == false {
            self.tokens.push(exception);
        }
    }

    /// The earliest truncation date, if any
    pub fn truncation(&self) -> Option<NaiveDate> {
        self.tokens.iter()
            .filter_map(|exc| match exc {
                RecurrenceException::From(date) => Some(*date),
                RecurrenceException::Single(_) => None,
            })
            .min()
    }

    /// The dates of single cancelled occurrences
    pub fn single_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.tokens.iter()
            .filter_map(|exc| match exc {
                RecurrenceException::Single(date) => Some(*date),
                RecurrenceException::From(_) => None,
            })
    }

    /// Whether the occurrence that happens on `date` is cancelled
    pub fn suppresses(&self, date: NaiveDate) -> bool {
        self.tokens.iter().any(|exc| match exc {
            RecurrenceException::Single(d) => *d == date,
            RecurrenceException::From(d) => *d <= date,
        })
    }

    /// Whether the occurrence on `date` and every later one are cancelled
    pub fn is_truncated_at(&self, date: NaiveDate) -> bool {
        self.truncation().map(|trunc| trunc <= date).unwrap_or(false)
    }
}

impl FromStr for ExceptionSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = ExceptionSet::new();
        for exception in s.split(',').filter_map(RecurrenceException::parse_token) {
            set.insert(exception);
        }
        Ok(set)
    }
}

impl Display for ExceptionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for exception in &self.tokens {
            if first == false {
                write!(f, ",")?;
            }
            write!(f, "{}", exception)?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<RecurrenceException> for ExceptionSet {
    fn from_iter<I: IntoIterator<Item = RecurrenceException>>(iter: I) -> Self {
        let mut set = ExceptionSet::new();
        for exception in iter {
            set.insert(exception);
        }
        set
    }
}

/// Used to support serde: the set is stored using its token representation
impl Serialize for ExceptionSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
/// Used to support serde
impl<'de> Deserialize<'de> for ExceptionSet {
    fn deserialize<D>(deserializer: D) -> Result<ExceptionSet, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Parsing is infallible
        Ok(s.parse().unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parsing_ignores_empty_and_whitespace_tokens() {
        let set: ExceptionSet = " 2024-01-08, ,,>=2024-02-05 ,".parse().unwrap();
        assert_eq!(set.iter().count(), 2);
        assert!(set.suppresses(date(2024, 1, 8)));
        assert_eq!(set.truncation(), Some(date(2024, 2, 5)));
        assert_eq!(set.to_string(), "2024-01-08,>=2024-02-05");
    }

    #[test]
    fn parsing_skips_invalid_tokens() {
        let set: ExceptionSet = "yesterday,2024-13-01,>=,2024-03-01".parse().unwrap();
        assert_eq!(set.to_string(), "2024-03-01");

        let empty: ExceptionSet = "".parse().unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "");
    }

    #[test]
    fn truncation_suppresses_later_dates() {
        let set: ExceptionSet = ">=2024-03-10,>=2024-03-20".parse().unwrap();
        assert_eq!(set.truncation(), Some(date(2024, 3, 10)));
        assert!(set.suppresses(date(2024, 3, 9)) == false);
        assert!(set.suppresses(date(2024, 3, 10)));
        assert!(set.suppresses(date(2025, 1, 1)));
        assert!(set.is_truncated_at(date(2024, 3, 15)));
    }

    #[test]
    fn duplicates_are_merged() {
        let set: ExceptionSet = "2024-01-08,2024-01-08".parse().unwrap();
        assert_eq!(set.to_string(), "2024-01-08");
    }

    #[test]
    fn serde_uses_the_token_grammar() {
        let set: ExceptionSet = "2024-01-08,>=2024-02-05".parse().unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#""2024-01-08,>=2024-02-05""#);
        let back: ExceptionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
