//! Calendar collections, as discovered on a CalDAV server

pub mod remote_calendar;

use std::convert::TryFrom;
use std::error::Error;

use bitflags::bitflags;
use minidom::Element;

use crate::utils::{find_elem, find_elems, is_success_status_line};

bitflags! {
    pub struct SupportedComponents: u8 {
        /// An event, such as a calendar meeting
        const EVENT = 1;
        /// A to-do item, such as a reminder
        const TODO = 2;
        /// A journal entry
        const JOURNAL = 4;
    }
}

impl TryFrom<&Element> for SupportedComponents {
    type Error = Box<dyn Error + Send + Sync>;

    /// Create an instance from an XML <supported-calendar-component-set> element
    fn try_from(element: &Element) -> Result<Self, Self::Error> {
        if element.name() != "supported-calendar-component-set" {
            return Err("Element must be a <supported-calendar-component-set>".into());
        }

        let mut flags = Self::empty();
        for child in element.children() {
            match child.attr("name") {
                None => continue,
                Some("VEVENT") => flags.insert(Self::EVENT),
                Some("VTODO") => flags.insert(Self::TODO),
                Some("VJOURNAL") => flags.insert(Self::JOURNAL),
                Some(other) => {
                    log::debug!("Unimplemented supported component type: {:?}. Ignoring it", other);
                    continue
                },
            };
        }

        Ok(flags)
    }
}


/// Privileges (RFC 3744) that allow creating or modifying resources in a collection
const WRITE_PRIVILEGES: [&str; 4] = ["write", "write-content", "all", "bind"];

/// Whether a `<current-user-privilege-set>` grants write access.
///
/// Calendars that do not report their privileges are considered read-only.
pub fn has_write_privilege(privilege_set: Option<&Element>) -> bool {
    let privilege_set = match privilege_set {
        None => return false,
        Some(set) => set,
    };

    find_elems(privilege_set, "privilege")
        .iter()
        .flat_map(|privilege| privilege.children())
        .any(|granted| WRITE_PRIVILEGES.contains(&granted.name()))
}

/// The `<prop>` elements of a `<response>` whose `<propstat>` status is successful.
///
/// Servers report unknown properties in a separate 404 propstat, that must not be mistaken for an empty value.
pub fn successful_props(response: &Element) -> Vec<&Element> {
    find_elems(response, "propstat")
        .into_iter()
        .filter(|propstat| {
            find_elem(propstat, "status")
                .map(|status| is_success_status_line(&status.text()))
                .unwrap_or(true)
        })
        .filter_map(|propstat| find_elem(propstat, "prop"))
        .collect()
}

/// Look for a property among the successful ones of a `<response>`
pub fn find_prop<'a>(props: &[&'a Element], name: &str) -> Option<&'a Element> {
    props.iter().find_map(|prop| find_elem(prop, name))
}
