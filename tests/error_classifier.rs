// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Table-driven classifier tests

use polyframe_render::classify::{self, classify, ErrorCode, GENERIC_MESSAGE};

#[test]
fn test_every_rule_matches_its_example() {
    for rule in classify::rules() {
        let classification = classify(rule.example);
        assert_eq!(
            classification.code, rule.code,
            "example {:?} classified as {}",
            rule.example, classification.code
        );
        assert_eq!(classification.message, rule.message);
        assert_eq!(classification.needs_restart, rule.code.needs_restart());
    }
}

#[test]
fn test_restart_codes() {
    let restart: Vec<ErrorCode> = classify::rules()
        .iter()
        .map(|rule| rule.code)
        .filter(|code| code.needs_restart())
        .collect();
    assert_eq!(
        restart,
        vec![
            ErrorCode::SandboxAbort,
            ErrorCode::SandboxUnreachable,
            ErrorCode::SandboxOutOfBounds,
            ErrorCode::InternalError,
        ]
    );
    assert!(!ErrorCode::SyntaxError.needs_restart());
    assert!(!ErrorCode::Timeout.needs_restart());
}

#[test]
fn test_fallback_generic_for_useless_text() {
    for raw in ["", "abc", "4096", "  12345678  "] {
        let classification = classify(raw);
        assert_eq!(classification.code, ErrorCode::RenderFailed, "raw {:?}", raw);
        assert_eq!(classification.message, GENERIC_MESSAGE);
        assert!(!classification.needs_restart);
    }
}

#[test]
fn test_fallback_surfaces_cleaned_text() {
    let classification = classify("Something odd in /tmp/sandbox/work/part.scad, line 12: frobnicated");
    assert_eq!(classification.code, ErrorCode::RenderFailed);
    assert!(classification.message.starts_with("Render error:"));
    assert!(!classification.message.contains("/tmp/sandbox/"));
    assert!(classification.raw.contains("/tmp/sandbox/"));
}

#[test]
fn test_diagnostic_text_prefers_error_lines() {
    let transcript = vec![
        "Compiling design (CSG Tree generation)...".to_string(),
        "ERROR: Parser error in file \"/input.scad\", line 1: syntax error".to_string(),
        "Execution aborted".to_string(),
    ];
    let text = classify::diagnostic_text(&transcript);
    assert!(text.contains("Parser error"));
    assert!(!text.contains("Compiling design"));
}
