//! This module handles conversion between iCal files and internal representations
//!
//! It is a wrapper around different Rust third-party libraries, since I haven't find any complete library that is able to parse _and_ generate iCal files

mod parser;
pub use parser::parse;
mod builder;
pub use builder::build_from;

use crate::config::{ORG_NAME, PRODUCT_NAME};

/// Date format of `VALUE=DATE` properties
const ICAL_DATE: &str = "%Y%m%d";
/// Date-time format of UTC properties
const ICAL_DATE_TIME_UTC: &str = "%Y%m%dT%H%M%SZ";
/// Date-time format of floating or TZID-qualified properties
const ICAL_DATE_TIME_LOCAL: &str = "%Y%m%dT%H%M%S";

pub fn default_prod_id() -> String {
    let org = ORG_NAME.lock().map(|s| s.clone()).unwrap_or_else(|poisoned| poisoned.into_inner().clone());
    let product = PRODUCT_NAME.lock().map(|s| s.clone()).unwrap_or_else(|poisoned| poisoned.into_inner().clone());
    format!("-//{}//{}//EN", org, product)
}
