// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! SVG structural validation

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Smallest plausible SVG document
pub const MIN_SVG_BYTES: usize = 32;

const SHAPE_ELEMENTS: &[&[u8]] = &[
    b"path",
    b"polygon",
    b"polyline",
    b"line",
    b"rect",
    b"circle",
    b"ellipse",
];

/// What validation found
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvgSummary {
    pub shapes: usize,
    /// Width and height from `viewBox`, else from the `width`/`height` attributes
    pub extent: Option<(f64, f64)>,
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Leading numeric part of a length such as `"100mm"`
fn parse_length(value: &str) -> Option<f64> {
    let end = value
        .trim()
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(value.trim().len());
    value.trim()[..end].parse().ok()
}

fn extent_of(root: &BytesStart<'_>) -> Option<(f64, f64)> {
    if let Some(view_box) = attribute(root, b"viewBox") {
        let parts: Vec<f64> = view_box
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() == 4 {
            return Some((parts[2], parts[3]));
        }
    }
    let width = attribute(root, b"width").and_then(|w| parse_length(&w))?;
    let height = attribute(root, b"height").and_then(|h| parse_length(&h))?;
    Some((width, height))
}

fn is_drawable(element: &BytesStart<'_>) -> bool {
    let name = element.local_name();
    if !SHAPE_ELEMENTS.contains(&name.as_ref()) {
        return false;
    }
    match name.as_ref() {
        b"path" => attribute(element, b"d").is_some_and(|d| !d.trim().is_empty()),
        b"polygon" | b"polyline" => {
            attribute(element, b"points").is_some_and(|p| !p.trim().is_empty())
        }
        _ => true,
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidOutput {
        format: "svg".to_string(),
        message: message.into(),
    }
}

fn empty(message: impl Into<String>) -> Error {
    Error::EmptyOutput {
        format: "svg".to_string(),
        message: message.into(),
    }
}

/// Check length, `svg` root, at least one shape and a non-degenerate extent
pub fn validate(text: &str) -> Result<SvgSummary> {
    if text.trim().len() < MIN_SVG_BYTES {
        return Err(empty(format!("output is only {} bytes", text.trim().len())));
    }

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut root_seen = false;
    let mut extent = None;
    let mut shapes = 0;

    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => {
                if !root_seen {
                    if element.local_name().as_ref() != b"svg" {
                        return Err(invalid("root element is not <svg>"));
                    }
                    root_seen = true;
                    extent = extent_of(&element);
                } else if is_drawable(&element) {
                    shapes += 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(invalid("no <svg> element"));
    }
    if shapes == 0 {
        return Err(empty("drawing contains no shapes"));
    }
    if let Some((width, height)) = extent {
        if !(width > 0.0 && height > 0.0) {
            return Err(invalid(format!(
                "degenerate extent {}x{}; the projection may be edge-on",
                width, height
            )));
        }
    }

    Ok(SvgSummary { shapes, extent })
}
