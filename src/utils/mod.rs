///! Some utility functions

use minidom::Element;

use crate::recurrence::Occurrence;

/// Walks an XML tree and returns every element that has the given name
pub fn find_elems<S: AsRef<str>>(root: &Element, searched_name: S) -> Vec<&Element> {
    let searched_name = searched_name.as_ref();
    let mut elems: Vec<&Element> = Vec::new();

    for el in root.children() {
        if el.name() == searched_name {
            elems.push(el);
        } else {
            let ret = find_elems(el, searched_name);
            elems.extend(ret);
        }
    }
    elems
}

/// Walks an XML tree until it finds an elements with the given name
pub fn find_elem<S: AsRef<str>>(root: &Element, searched_name: S) -> Option<&Element> {
    let searched_name = searched_name.as_ref();
    if root.name() == searched_name {
        return Some(root);
    }

    for el in root.children() {
        if el.name() == searched_name {
            return Some(el);
        } else {
            let ret = find_elem(el, searched_name);
            if ret.is_some() {
                return ret;
            }
        }
    }
    None
}

/// Follows a path of element names, and returns the trimmed text of the last one
pub fn find_text_at(root: &Element, path: &[&str]) -> Option<String> {
    let mut current = root;
    for name in path {
        current = find_elem(current, name)?;
    }
    let text = current.text();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Whether a 2xx `<status>` line such as `HTTP/1.1 200 OK` is present
pub fn is_success_status_line(status: &str) -> bool {
    status.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .map(|code| (200..300).contains(&code))
        .unwrap_or(false)
}


/// A debug utility that pretty-prints occurrences
pub fn print_occurrences(occurrences: &[Occurrence<'_>]) {
    for occurrence in occurrences {
        let event = occurrence.event();
        let start = occurrence.start().map(|s| s.to_rfc3339()).unwrap_or_else(|| "(unscheduled)".to_string());
        let remote = if event.is_remote_owned() { "=" } else { "." };
        println!("    {} {}\t{}\t{}", remote, start, event.title(), event.id());
    }
}
