// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Primitive counts for mesh exports

use crate::error::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Opaque header before the triangle count
pub const STL_HEADER_BYTES: usize = 80;
/// Normal + three vertices (12 x f32) + attribute word
pub const STL_TRIANGLE_BYTES: usize = 50;
const STL_PREAMBLE_BYTES: usize = STL_HEADER_BYTES + 4;

/// Triangle count of a binary STL, reconciled against the payload size.
///
/// Some engine builds write a header count that disagrees with the data that
/// follows. If the two differ by more than one triangle's worth of bytes the
/// count is recomputed from the size.
pub fn binary_stl_triangles(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < STL_PREAMBLE_BYTES {
        return Err(Error::InvalidOutput {
            format: "stl".to_string(),
            message: format!("binary STL truncated at {} bytes", bytes.len()),
        });
    }

    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[STL_HEADER_BYTES..STL_PREAMBLE_BYTES]);
    let declared = u32::from_le_bytes(count) as u64;

    let payload = (bytes.len() - STL_PREAMBLE_BYTES) as u64;
    let expected = declared * STL_TRIANGLE_BYTES as u64;
    if expected.abs_diff(payload) > STL_TRIANGLE_BYTES as u64 {
        let actual = payload / STL_TRIANGLE_BYTES as u64;
        tracing::warn!(
            "STL header declares {} triangles but payload holds {}; using payload size",
            declared,
            actual
        );
        return Ok(actual);
    }

    Ok(declared)
}

/// ASCII STL starts with `solid` and contains `facet` records.
/// Binary files may also start with `solid`, so the facet check matters.
pub fn is_ascii_stl(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    text.trim_start().starts_with("solid")
        && (text.contains("facet") || text.contains("endsolid"))
        && std::str::from_utf8(bytes).is_ok()
}

/// Triangle count of an STL in either encoding
pub fn stl_triangles(bytes: &[u8]) -> Result<u64> {
    if is_ascii_stl(bytes) {
        let mut cursor = Cursor::new(bytes);
        let mesh = stl_io::read_stl(&mut cursor).map_err(|e| Error::InvalidOutput {
            format: "stl".to_string(),
            message: format!("unreadable ASCII STL: {}", e),
        })?;
        Ok(mesh.faces.len() as u64)
    } else {
        binary_stl_triangles(bytes)
    }
}

/// Face count from the OFF counts line
pub fn off_faces(text: &str) -> Result<u64> {
    let mut lines = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty());

    let header = lines.next().unwrap_or("");
    let counts_line = if header == "OFF" {
        lines.next().unwrap_or("")
    } else if let Some(rest) = header.strip_prefix("OFF") {
        // Counts may share the header line
        rest.trim()
    } else {
        return Err(Error::InvalidOutput {
            format: "off".to_string(),
            message: "missing OFF header".to_string(),
        });
    };

    counts_line
        .split_whitespace()
        .nth(1)
        .and_then(|faces| faces.parse().ok())
        .ok_or_else(|| Error::InvalidOutput {
            format: "off".to_string(),
            message: format!("invalid counts line '{}'", counts_line),
        })
}

/// Number of `f` records
pub fn obj_faces(text: &str) -> u64 {
    text.lines()
        .filter(|line| line.trim_start().starts_with("f "))
        .count() as u64
}

/// Count `<triangle>` elements in an XML mesh document
pub fn xml_triangles(xml: &str) -> Result<u64> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut count = 0;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"triangle" => {
                count += 1
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(count)
}

/// Triangle count of a 3MF package (`3D/3dmodel.model` inside the zip)
pub fn three_mf_triangles(bytes: &[u8]) -> Result<u64> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut total = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.name().to_ascii_lowercase().ends_with(".model") {
            continue;
        }
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        total += xml_triangles(&xml)?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_stl(declared: u32, actual: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; STL_HEADER_BYTES];
        bytes.extend_from_slice(&declared.to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(actual * STL_TRIANGLE_BYTES));
        bytes
    }

    #[test]
    fn test_binary_count_within_tolerance() {
        assert_eq!(binary_stl_triangles(&binary_stl(12, 12)).unwrap(), 12);
        // A few trailing bytes do not trigger a recount
        let mut bytes = binary_stl(12, 12);
        bytes.extend_from_slice(&[0u8; 10]);
        assert_eq!(binary_stl_triangles(&bytes).unwrap(), 12);
    }

    #[test]
    fn test_truncated_binary() {
        assert!(binary_stl_triangles(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_ascii_stl() {
        let stl = "solid t\n facet normal 0 0 1\n  outer loop\n   vertex 0 0 0\n   vertex 1 0 0\n   vertex 0 1 0\n  endloop\n endfacet\nendsolid t\n";
        assert!(is_ascii_stl(stl.as_bytes()));
        assert_eq!(stl_triangles(stl.as_bytes()).unwrap(), 1);
    }

    #[test]
    fn test_binary_starting_with_solid() {
        let mut bytes = binary_stl(2, 2);
        bytes[..5].copy_from_slice(b"solid");
        assert!(!is_ascii_stl(&bytes));
        assert_eq!(stl_triangles(&bytes).unwrap(), 2);
    }

    #[test]
    fn test_off_and_obj() {
        assert_eq!(off_faces("OFF\n# comment\n8 12 0\n0 0 0\n").unwrap(), 12);
        assert_eq!(off_faces("OFF 4 2 0\n").unwrap(), 2);
        assert!(off_faces("PLY\n").is_err());
        assert_eq!(obj_faces("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\nf 3 2 1\n"), 2);
    }

    #[test]
    fn test_amf_triangles() {
        let amf = r#"<?xml version="1.0"?><amf><object id="0"><mesh><volume>
            <triangle><v1>0</v1><v2>1</v2><v3>2</v3></triangle>
            <triangle><v1>0</v1><v2>2</v2><v3>3</v3></triangle>
        </volume></mesh></object></amf>"#;
        assert_eq!(xml_triangles(amf).unwrap(), 2);
    }
}
