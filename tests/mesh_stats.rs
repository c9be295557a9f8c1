// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Primitive counts derived from mesh exports

mod common;

use anyhow::Result;
use common::binary_stl;
use polyframe_render::job::OutputFormat;
use polyframe_render::output::{self, mesh};

#[test]
fn test_header_agrees_with_payload() -> Result<()> {
    assert_eq!(mesh::binary_stl_triangles(&binary_stl(100))?, 100);
    Ok(())
}

#[test]
fn test_header_overstates_payload() -> Result<()> {
    // Header claims 100 triangles but only 40 follow
    let mut bytes = binary_stl(40);
    bytes[80..84].copy_from_slice(&100u32.to_le_bytes());
    assert_eq!(mesh::binary_stl_triangles(&bytes)?, 40);
    Ok(())
}

#[test]
fn test_one_triangle_of_slack_trusts_header() -> Result<()> {
    let mut bytes = binary_stl(10);
    bytes.truncate(bytes.len() - 20);
    assert_eq!(mesh::binary_stl_triangles(&bytes)?, 10);
    Ok(())
}

#[test]
fn test_finalize_stl_stats() -> Result<()> {
    let finalized = output::finalize(OutputFormat::Stl, binary_stl(12))?;
    assert!(!finalized.repaired);
    assert_eq!(finalized.stats.primitive_count, 12);
    assert_eq!(finalized.stats.byte_size, 84 + 12 * 50);
    Ok(())
}

#[test]
fn test_empty_export_is_empty_output() {
    let err = output::finalize(OutputFormat::Stl, Vec::new()).unwrap_err();
    assert!(matches!(err, polyframe_render::Error::EmptyOutput { .. }));
}
