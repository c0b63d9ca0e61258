// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::slice::Iter;

use smol_str::SmolStr;

/// Compact header forms (RFC 3261 §7.3.3) and the canonical names they expand to.
const COMPACT_FORMS: &[(&str, &str)] = &[
    ("i", "Call-ID"),
    ("v", "Via"),
    ("f", "From"),
    ("t", "To"),
    ("l", "Content-Length"),
    ("m", "Contact"),
    ("c", "Content-Type"),
    ("k", "Supported"),
    ("s", "Subject"),
    ("e", "Content-Encoding"),
];

/// Well-known names rewritten to their canonical spelling on insert.
const CANONICAL_NAMES: &[&str] = &[
    "Via",
    "From",
    "To",
    "Call-ID",
    "CSeq",
    "Contact",
    "Max-Forwards",
    "Route",
    "Record-Route",
    "Content-Length",
    "Content-Type",
    "User-Agent",
    "Server",
];

/// Expands a compact header name and normalises well-known spellings.
pub fn canonical_name(name: &str) -> SmolStr {
    let name = name.trim();
    if let Some((_, full)) = COMPACT_FORMS
        .iter()
        .find(|(short, _)| short.eq_ignore_ascii_case(name))
    {
        return SmolStr::new(full);
    }
    CANONICAL_NAMES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
        .map(|known| SmolStr::new(known))
        .unwrap_or_else(|| SmolStr::new(name))
}

/// A single SIP header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Ordered header collection. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, expanding compact names.
    pub fn push(&mut self, name: impl AsRef<str>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: canonical_name(name.as_ref()),
            value: value.into(),
        });
    }

    /// Inserts a header before every other header of the collection.
    pub fn push_front(&mut self, name: impl AsRef<str>, value: impl Into<SmolStr>) {
        self.0.insert(
            0,
            Header {
                name: canonical_name(name.as_ref()),
                value: value.into(),
            },
        );
    }

    /// Replaces the first header with this name, or appends one.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<SmolStr>) {
        let name = name.as_ref();
        let value = value.into();
        match self.0.iter_mut().find(|h| h.name.eq_ignore_ascii_case(name)) {
            Some(header) => header.value = value,
            None => self.push(name, value),
        }
    }

    /// Removes every header with this name, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// All values for `name`, in message order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Copies every `name` header of `other` onto the end of this collection.
    pub fn copy_from(&mut self, other: &Headers, name: &str) {
        for value in other.get_all(name) {
            self.push(name, value.clone());
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Extracts `name=value` from a `;`-separated parameter list, ignoring case.
///
/// Flag parameters without a value (such as `;lr`) yield an empty string.
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let params = match value.rfind('>') {
        Some(end) => &value[end + 1..],
        None => value,
    };
    params.split(';').skip(1).find_map(|part| {
        let mut split = part.splitn(2, '=');
        let key = split.next()?.trim();
        if key.eq_ignore_ascii_case(name) {
            Some(split.next().map(str::trim).unwrap_or(""))
        } else {
            None
        }
    })
}
