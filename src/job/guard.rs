// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Pre-flight scan for constructs known to crash or exhaust the engine.
//!
//! Advisory only: some uses succeed, so a hit never blocks the job.

use regex::Regex;
use std::sync::OnceLock;

/// `$fn` above this is flagged
pub const MAX_SAFE_FN: f64 = 256.0;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardConstruct {
    Minkowski { count: usize },
    HighResolution { fn_value: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardWarning {
    pub construct: GuardConstruct,
    pub message: String,
}

fn minkowski_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bminkowski\s*\(").expect("valid regex"))
}

fn fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$fn\s*=\s*(\d+(?:\.\d+)?)").expect("valid regex"))
}

/// Remove `//` and `/* */` comments, leaving string literals intact
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Scan source text and report risky constructs
pub fn scan(source: &str) -> Vec<GuardWarning> {
    let code = strip_comments(source);
    let mut warnings = Vec::new();

    let minkowski = minkowski_re().find_iter(&code).count();
    if minkowski > 0 {
        warnings.push(GuardWarning {
            construct: GuardConstruct::Minkowski { count: minkowski },
            message: format!(
                "minkowski() used {} time(s); it can exhaust engine memory on complex shapes",
                minkowski
            ),
        });
    }

    let highest = fn_re()
        .captures_iter(&code)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .fold(None, |max: Option<f64>, value| {
            Some(max.map_or(value, |m| m.max(value)))
        });
    if let Some(fn_value) = highest.filter(|&v| v > MAX_SAFE_FN) {
        warnings.push(GuardWarning {
            construct: GuardConstruct::HighResolution { fn_value },
            message: format!(
                "$fn = {} is above {}; rendering may be very slow or run out of memory",
                fn_value, MAX_SAFE_FN
            ),
        });
    }

    for warning in &warnings {
        tracing::warn!("Guard scan: {}", warning.message);
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_minkowski_and_high_fn() {
        let source = "$fn = 512;\nminkowski() { cube(10); sphere(1, $fn=32); }";
        let warnings = scan(source);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].construct, GuardConstruct::Minkowski { count: 1 });
        assert_eq!(
            warnings[1].construct,
            GuardConstruct::HighResolution { fn_value: 512.0 }
        );
    }

    #[test]
    fn test_comments_are_ignored() {
        let source = "// minkowski() is too slow\n/* $fn = 1000; */ cube(1, $fn = 64);";
        assert!(scan(source).is_empty());
    }

    #[test]
    fn test_strings_survive_comment_stripping() {
        let source = r#"echo("http://example.com"); minkowski() cube(1);"#;
        let stripped = strip_comments(source);
        assert!(stripped.contains("http://example.com"));
        assert_eq!(scan(source).len(), 1);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(scan("$fn = 256;").is_empty());
        assert_eq!(scan("$fn=257;").len(), 1);
    }
}
