// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Output validation, repair and statistics

pub mod dxf;
pub mod mesh;
pub mod svg;

use crate::error::{Error, Result};
use crate::job::{JobStats, OutputFormat};

/// Output ready to hand back to the host
#[derive(Debug, Clone)]
pub struct FinalOutput {
    pub bytes: Vec<u8>,
    pub stats: JobStats,
    /// The payload was rewritten (DXF repair)
    pub repaired: bool,
}

fn utf8(format: OutputFormat, bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::InvalidOutput {
        format: format.to_string(),
        message: "output is not valid UTF-8 text".to_string(),
    })
}

/// Validate an export, repair it where needed and derive its statistics
pub fn finalize(format: OutputFormat, bytes: Vec<u8>) -> Result<FinalOutput> {
    if bytes.is_empty() {
        return Err(Error::EmptyOutput {
            format: format.to_string(),
            message: "engine produced an empty file".to_string(),
        });
    }

    let (bytes, primitive_count, repaired) = match format {
        OutputFormat::Dxf => {
            let text = utf8(format, &bytes)?;
            dxf::validate(text)?;
            let repair = dxf::repair(text)?;
            if repair.extents.is_some_and(|extents| extents.is_degenerate()) {
                tracing::warn!("DXF extents are degenerate");
            }
            let count = repair.entity_count as u64;
            (repair.text.into_bytes(), count, true)
        }
        OutputFormat::Svg => {
            let summary = svg::validate(utf8(format, &bytes)?)?;
            (bytes, summary.shapes as u64, false)
        }
        OutputFormat::Stl => {
            let count = mesh::stl_triangles(&bytes)?;
            (bytes, count, false)
        }
        OutputFormat::Off => {
            let count = mesh::off_faces(utf8(format, &bytes)?)?;
            (bytes, count, false)
        }
        OutputFormat::Obj => {
            let count = mesh::obj_faces(utf8(format, &bytes)?);
            (bytes, count, false)
        }
        OutputFormat::Amf => {
            let count = mesh::xml_triangles(utf8(format, &bytes)?)?;
            (bytes, count, false)
        }
        OutputFormat::ThreeMf => {
            let count = mesh::three_mf_triangles(&bytes)?;
            (bytes, count, false)
        }
    };

    let stats = JobStats {
        primitive_count,
        byte_size: bytes.len() as u64,
    };
    tracing::debug!(
        "Finalized {} output: {} primitives, {} bytes",
        format,
        stats.primitive_count,
        stats.byte_size
    );

    Ok(FinalOutput {
        bytes,
        stats,
        repaired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_rejected() {
        assert!(matches!(
            finalize(OutputFormat::Stl, Vec::new()),
            Err(Error::EmptyOutput { .. })
        ));
    }

    #[test]
    fn test_binary_dxf_rejected() {
        let err = finalize(OutputFormat::Dxf, vec![0xff; 128]).unwrap_err();
        assert!(matches!(err, Error::InvalidOutput { .. }));
    }

    #[test]
    fn test_obj_stats() {
        let obj = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec();
        let out = finalize(OutputFormat::Obj, obj).unwrap();
        assert_eq!(out.stats.primitive_count, 1);
        assert_eq!(out.stats.byte_size, 32);
        assert!(!out.repaired);
    }
}
