// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! DXF validation and repair
//!
//! The engine writes `LWPOLYLINE` entities under an `AC1009` (R12) version
//! tag, a combination most consumers reject. Changing the version tag alone
//! does not help. Instead every polyline is re-expressed as individual
//! `LINE` entities and the file is rebuilt around a minimal R12 header.

use crate::error::{Error, Result};
use crate::utils::encoding::format_number;

/// Subclass markers, not valid in R12
const SUBCLASS_MARKER: i32 = 100;

/// Entity types that count as drawable geometry
const GEOMETRIC_ENTITIES: &[&str] = &[
    "LINE",
    "LWPOLYLINE",
    "POLYLINE",
    "CIRCLE",
    "ARC",
    "ELLIPSE",
    "SPLINE",
    "POINT",
    "SOLID",
    "3DFACE",
];

/// Smallest plausible DXF document
pub const MIN_DXF_BYTES: usize = 64;

/// One group-code / value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub code: i32,
    pub value: String,
}

impl Pair {
    pub fn new(code: i32, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    fn is(&self, code: i32, value: &str) -> bool {
        self.code == code && self.value == value
    }
}

/// Parse alternating code/value lines
pub fn parse_pairs(text: &str) -> Result<Vec<Pair>> {
    let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));
    let mut pairs = Vec::new();
    let mut line_no = 0usize;

    while let Some(code_line) = lines.next() {
        line_no += 1;
        let code_text = code_line.trim();
        if code_text.is_empty() {
            // Trailing blank lines after EOF
            continue;
        }
        let code = code_text
            .parse::<i32>()
            .map_err(|_| Error::Dxf(format!("line {}: invalid group code '{}'", line_no, code_text)))?;
        let value = lines
            .next()
            .ok_or_else(|| Error::Dxf(format!("line {}: group code {} has no value", line_no, code)))?;
        line_no += 1;
        pairs.push(Pair::new(code, value.trim()));
    }

    Ok(pairs)
}

/// Write pairs with right-justified three-column group codes
pub fn write_pairs(pairs: &[Pair]) -> String {
    let mut out = String::with_capacity(pairs.len() * 12);
    for pair in pairs {
        out.push_str(&format!("{:>3}\n{}\n", pair.code, pair.value));
    }
    out
}

/// A named `SECTION ... ENDSEC` block, body only
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub body: Vec<Pair>,
}

/// Locate sections by their start/end markers
pub fn sections(pairs: &[Pair]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut i = 0;

    while i < pairs.len() {
        if !pairs[i].is(0, "SECTION") {
            i += 1;
            continue;
        }
        let name = match pairs.get(i + 1) {
            Some(pair) if pair.code == 2 => pair.value.clone(),
            _ => {
                i += 1;
                continue;
            }
        };
        let start = i + 2;
        let end = pairs[start..]
            .iter()
            .position(|pair| pair.is(0, "ENDSEC"))
            .map(|offset| start + offset)
            .unwrap_or(pairs.len());

        sections.push(Section {
            name,
            body: pairs[start..end].to_vec(),
        });
        i = end + 1;
    }

    sections
}

/// Drawing extents from `$EXTMIN` / `$EXTMAX`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub min: (f64, f64),
    pub max: (f64, f64),
}

impl Extents {
    pub fn is_degenerate(&self) -> bool {
        !(self.max.0 > self.min.0 || self.max.1 > self.min.1)
    }
}

fn header_point(header: &[Pair], variable: &str) -> Option<(f64, f64)> {
    let start = header.iter().position(|pair| pair.is(9, variable))?;
    let mut x = None;
    let mut y = None;
    for pair in &header[start + 1..] {
        match pair.code {
            10 => x = pair.value.parse().ok(),
            20 => y = pair.value.parse().ok(),
            9 => break,
            _ => {}
        }
    }
    Some((x?, y?))
}

/// Extents declared in a header section, if complete
pub fn header_extents(header: &[Pair]) -> Option<Extents> {
    Some(Extents {
        min: header_point(header, "$EXTMIN")?,
        max: header_point(header, "$EXTMAX")?,
    })
}

/// Split an entities section body into per-entity runs
pub fn split_entities(body: &[Pair]) -> Vec<&[Pair]> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, pair) in body.iter().enumerate() {
        if pair.code == 0 {
            if let Some(s) = start {
                runs.push(&body[s..i]);
            }
            start = Some(i);
        }
    }
    if let Some(s) = start {
        runs.push(&body[s..]);
    }
    runs
}

/// A lightweight polyline reduced to what line segments need
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub layer: String,
    pub closed: bool,
    pub vertices: Vec<(f64, f64)>,
}

impl Polyline {
    /// Parse an `LWPOLYLINE` entity run
    pub fn parse(entity: &[Pair]) -> Result<Self> {
        let mut layer = "0".to_string();
        let mut closed = false;
        let mut vertices: Vec<(f64, f64)> = Vec::new();

        for pair in entity.iter().skip(1) {
            match pair.code {
                8 => layer = pair.value.clone(),
                70 => {
                    let flags: i64 = pair
                        .value
                        .parse()
                        .map_err(|_| Error::Dxf(format!("invalid polyline flags '{}'", pair.value)))?;
                    closed = flags & 1 == 1;
                }
                10 => vertices.push((parse_coord(&pair.value)?, 0.0)),
                20 => {
                    let y = parse_coord(&pair.value)?;
                    match vertices.last_mut() {
                        Some(vertex) => vertex.1 = y,
                        None => return Err(Error::Dxf("polyline Y before any X".to_string())),
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            layer,
            closed,
            vertices,
        })
    }

    /// `closed ? n : n - 1` segments, vertex `i` to `(i + 1) mod n`
    pub fn segments(&self) -> Vec<((f64, f64), (f64, f64))> {
        let n = self.vertices.len();
        if n < 2 {
            return Vec::new();
        }
        let count = if self.closed { n } else { n - 1 };
        (0..count)
            .map(|i| (self.vertices[i], self.vertices[(i + 1) % n]))
            .collect()
    }

    /// Equivalent `LINE` entities
    pub fn to_lines(&self) -> Vec<Pair> {
        let mut pairs = Vec::new();
        for (start, end) in self.segments() {
            pairs.push(Pair::new(0, "LINE"));
            pairs.push(Pair::new(8, self.layer.clone()));
            pairs.push(Pair::new(10, format_number(start.0)));
            pairs.push(Pair::new(20, format_number(start.1)));
            pairs.push(Pair::new(30, "0"));
            pairs.push(Pair::new(11, format_number(end.0)));
            pairs.push(Pair::new(21, format_number(end.1)));
            pairs.push(Pair::new(31, "0"));
        }
        pairs
    }
}

fn parse_coord(value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::Dxf(format!("invalid coordinate '{}'", value)))
}

fn entity_type(entity: &[Pair]) -> &str {
    entity.first().map(|pair| pair.value.as_str()).unwrap_or("")
}

fn without_subclass_markers(pairs: &[Pair]) -> impl Iterator<Item = &Pair> {
    pairs.iter().filter(|pair| pair.code != SUBCLASS_MARKER)
}

/// Result of a repair pass
#[derive(Debug, Clone)]
pub struct DxfRepair {
    pub text: String,
    pub polylines_replaced: usize,
    pub lines_emitted: usize,
    /// Entities in the rebuilt entities section
    pub entity_count: usize,
    pub extents: Option<Extents>,
}

/// Rebuild a DXF document as plain R12
pub fn repair(text: &str) -> Result<DxfRepair> {
    let pairs = parse_pairs(text)?;
    let sections = sections(&pairs);

    let extents = sections
        .iter()
        .find(|section| section.name == "HEADER")
        .and_then(|section| header_extents(&section.body));
    let entities = sections
        .iter()
        .find(|section| section.name == "ENTITIES")
        .ok_or_else(|| Error::Dxf("no ENTITIES section".to_string()))?;

    let mut out = Vec::with_capacity(pairs.len());

    out.push(Pair::new(0, "SECTION"));
    out.push(Pair::new(2, "HEADER"));
    out.push(Pair::new(9, "$ACADVER"));
    out.push(Pair::new(1, "AC1009"));
    if let Some(extents) = extents {
        out.push(Pair::new(9, "$EXTMIN"));
        out.push(Pair::new(10, format_number(extents.min.0)));
        out.push(Pair::new(20, format_number(extents.min.1)));
        out.push(Pair::new(9, "$EXTMAX"));
        out.push(Pair::new(10, format_number(extents.max.0)));
        out.push(Pair::new(20, format_number(extents.max.1)));
    }
    out.push(Pair::new(0, "ENDSEC"));

    if let Some(tables) = sections.iter().find(|section| section.name == "TABLES") {
        out.push(Pair::new(0, "SECTION"));
        out.push(Pair::new(2, "TABLES"));
        out.extend(without_subclass_markers(&tables.body).cloned());
        out.push(Pair::new(0, "ENDSEC"));
    }

    let mut polylines_replaced = 0;
    let mut lines_emitted = 0;
    let mut entity_count = 0;

    out.push(Pair::new(0, "SECTION"));
    out.push(Pair::new(2, "ENTITIES"));
    for entity in split_entities(&entities.body) {
        if entity_type(entity) == "LWPOLYLINE" {
            let polyline = Polyline::parse(entity)?;
            let lines = polyline.to_lines();
            let count = polyline.segments().len();
            polylines_replaced += 1;
            lines_emitted += count;
            entity_count += count;
            out.extend(lines);
        } else {
            // VERTEX and SEQEND belong to their POLYLINE
            if !matches!(entity_type(entity), "VERTEX" | "SEQEND") {
                entity_count += 1;
            }
            out.extend(without_subclass_markers(entity).cloned());
        }
    }
    out.push(Pair::new(0, "ENDSEC"));
    out.push(Pair::new(0, "EOF"));

    tracing::debug!(
        "DXF repair: {} polylines -> {} lines",
        polylines_replaced,
        lines_emitted
    );

    Ok(DxfRepair {
        text: write_pairs(&out),
        polylines_replaced,
        lines_emitted,
        entity_count,
        extents,
    })
}

/// Structural checks run before repair.
///
/// Returns the number of geometric entities found.
pub fn validate(text: &str) -> Result<usize> {
    if text.trim().len() < MIN_DXF_BYTES {
        return Err(Error::EmptyOutput {
            format: "dxf".to_string(),
            message: format!("output is only {} bytes", text.trim().len()),
        });
    }

    let pairs = parse_pairs(text)?;
    let sections = sections(&pairs);
    let entities = sections
        .iter()
        .find(|section| section.name == "ENTITIES")
        .ok_or_else(|| Error::InvalidOutput {
            format: "dxf".to_string(),
            message: "missing ENTITIES section".to_string(),
        })?;

    let geometric = split_entities(&entities.body)
        .into_iter()
        .filter(|entity| GEOMETRIC_ENTITIES.contains(&entity_type(entity)))
        .count();
    if geometric == 0 {
        return Err(Error::EmptyOutput {
            format: "dxf".to_string(),
            message: "drawing contains no geometric entities".to_string(),
        });
    }

    Ok(geometric)
}
