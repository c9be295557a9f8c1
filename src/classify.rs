// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error classification
//!
//! The engine has no structured error API. Its diagnostics are matched
//! against an ordered rule table; the first matching rule decides the code
//! and the message shown to the user.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Closed taxonomy of job failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SyntaxError,
    Timeout,
    OutOfMemory,
    UnknownModule,
    UnknownFunction,
    UndefinedVariable,
    NonManifoldWarning,
    NoGeometry,
    EmptyGeometry,
    #[serde(rename = "MODEL_NOT_2D")]
    ModelNot2d,
    #[serde(rename = "MODEL_IS_2D")]
    ModelIs2d,
    UnsupportedConfig,
    FileNotFound,
    Recursion,
    SandboxAssertion,
    SandboxAbort,
    SandboxUnreachable,
    SandboxOutOfBounds,
    InternalError,
    RenderFailed,
    Cancelled,
    MountFailed,
    LibraryMountFailed,
}

impl ErrorCode {
    /// Whether this failure leaves the engine in an untrustworthy state
    pub fn needs_restart(self) -> bool {
        matches!(
            self,
            ErrorCode::InternalError
                | ErrorCode::SandboxAbort
                | ErrorCode::SandboxUnreachable
                | ErrorCode::SandboxOutOfBounds
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SyntaxError => "SYNTAX_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::UnknownModule => "UNKNOWN_MODULE",
            ErrorCode::UnknownFunction => "UNKNOWN_FUNCTION",
            ErrorCode::UndefinedVariable => "UNDEFINED_VARIABLE",
            ErrorCode::NonManifoldWarning => "NON_MANIFOLD_WARNING",
            ErrorCode::NoGeometry => "NO_GEOMETRY",
            ErrorCode::EmptyGeometry => "EMPTY_GEOMETRY",
            ErrorCode::ModelNot2d => "MODEL_NOT_2D",
            ErrorCode::ModelIs2d => "MODEL_IS_2D",
            ErrorCode::UnsupportedConfig => "UNSUPPORTED_CONFIG",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::Recursion => "RECURSION",
            ErrorCode::SandboxAssertion => "SANDBOX_ASSERTION",
            ErrorCode::SandboxAbort => "SANDBOX_ABORT",
            ErrorCode::SandboxUnreachable => "SANDBOX_UNREACHABLE",
            ErrorCode::SandboxOutOfBounds => "SANDBOX_OUT_OF_BOUNDS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::MountFailed => "MOUNT_FAILED",
            ErrorCode::LibraryMountFailed => "LIBRARY_MOUNT_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub code: ErrorCode,
    /// User-facing, actionable message
    pub message: String,
    /// Diagnostic text the classification was derived from
    pub raw: String,
    pub needs_restart: bool,
}

impl ErrorClassification {
    /// Classification for a known code with its canned message
    pub fn for_code(code: ErrorCode, raw: impl Into<String>) -> Self {
        let message = rules()
            .iter()
            .find(|rule| rule.code == code)
            .map(|rule| rule.message)
            .unwrap_or_else(|| default_message(code));
        Self {
            code,
            message: message.to_string(),
            raw: raw.into(),
            needs_restart: code.needs_restart(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Message used when no pattern matched and the text is useless
pub const GENERIC_MESSAGE: &str = "Render failed. Check your code for syntax errors.";

fn default_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Timeout => "Rendering timed out. Reduce $fn or model complexity and try again.",
        ErrorCode::Cancelled => "Rendering was cancelled.",
        ErrorCode::MountFailed => "Project files could not be prepared for rendering.",
        ErrorCode::LibraryMountFailed => "A required library could not be loaded.",
        ErrorCode::InternalError => {
            "The geometry engine hit an internal error. It will be restarted before the next render."
        }
        _ => GENERIC_MESSAGE,
    }
}

/// One row of the classification table
pub struct Rule {
    pub code: ErrorCode,
    pub pattern: &'static str,
    pub message: &'static str,
    /// Representative diagnostic, used by tests and benches
    pub example: &'static str,
}

/// Ordered rule table. First match wins.
pub const RULES: &[Rule] = &[
    Rule {
        code: ErrorCode::SyntaxError,
        pattern: r"(?i)parser error|syntax error",
        message: "Syntax error in your code. Check for missing semicolons, brackets or parentheses.",
        example: "ERROR: Parser error in file \"/input.scad\", line 3: syntax error",
    },
    Rule {
        code: ErrorCode::Timeout,
        pattern: r"(?i)\btimed? ?out\b|render(?:ing)? (?:was )?cancell?ed",
        message: "Rendering timed out. Reduce $fn or model complexity and try again.",
        example: "Render timed out after 60000ms",
    },
    Rule {
        code: ErrorCode::OutOfMemory,
        pattern: r"(?i)out of memory|bad_alloc|cannot enlarge memory|memory allocation failed",
        message: "The model ran out of memory. Lower $fn, avoid minkowski(), or simplify the geometry.",
        example: "Aborted(Cannot enlarge memory arrays to size 2147483648 bytes (OOM))",
    },
    Rule {
        code: ErrorCode::UnknownModule,
        pattern: r"(?i)unknown module",
        message: "Your code calls a module that does not exist. Check the spelling or include the library that defines it.",
        example: "WARNING: Ignoring unknown module 'cubee' in file input.scad, line 1",
    },
    Rule {
        code: ErrorCode::UnknownFunction,
        pattern: r"(?i)unknown function",
        message: "Your code calls a function that does not exist. Check the spelling or include the library that defines it.",
        example: "WARNING: Ignoring unknown function 'lenght' in file input.scad, line 4",
    },
    Rule {
        code: ErrorCode::UndefinedVariable,
        pattern: r"(?i)unknown variable|undefined variable",
        message: "Your code uses a variable that was never defined.",
        example: "WARNING: Ignoring unknown variable 'widht' in file input.scad, line 2",
    },
    Rule {
        code: ErrorCode::NonManifoldWarning,
        pattern: r"(?i)not a valid 2-manifold|non-manifold",
        message: "The geometry is not manifold and may not print correctly. Check for touching or zero-thickness faces.",
        example: "WARNING: Object may not be a valid 2-manifold and may need repair!",
    },
    Rule {
        code: ErrorCode::NoGeometry,
        pattern: r"(?i)no top[- ]level geometry|nothing to render",
        message: "The code produced no geometry. Make sure at least one shape is created at the top level.",
        example: "WARNING: No top level geometry to render",
    },
    Rule {
        code: ErrorCode::EmptyGeometry,
        pattern: r"(?i)object is empty",
        message: "The result is empty. Check that difference() or intersection() operations leave something behind.",
        example: "Current top level object is empty.",
    },
    Rule {
        code: ErrorCode::ModelNot2d,
        pattern: r"(?i)not a 2D object|top level object is a 3D object",
        message: "This model is 3D but the selected format is 2D. Use projection() to flatten it, or export as STL, OFF, OBJ, AMF or 3MF.",
        example: "Current top level object is not a 2D object.",
    },
    Rule {
        code: ErrorCode::ModelIs2d,
        pattern: r"(?i)not a 3D object|is a 2D object",
        message: "This model is 2D but the selected format is 3D. Use linear_extrude() to give it depth, or export as SVG or DXF.",
        example: "Current top level object is not a 3D object.",
    },
    Rule {
        code: ErrorCode::UnsupportedConfig,
        pattern: r"(?i)is not supported",
        message: "The requested engine option is not supported by this build.",
        example: "Feature 'lazy-union' is not supported",
    },
    Rule {
        code: ErrorCode::FileNotFound,
        pattern: r"(?i)can't open (?:include |library |import )?file|file not found|no such file",
        message: "A referenced file could not be found. Check include/use/import paths and that the file was uploaded.",
        example: "WARNING: Can't open library 'gears.scad'. Can't open include file 'gears.scad'.",
    },
    Rule {
        code: ErrorCode::Recursion,
        pattern: r"(?i)recursion detected|maximum recursion|stack overflow|too much recursion|call stack size exceeded",
        message: "Infinite recursion detected. Check that recursive functions and modules have a terminating condition.",
        example: "ERROR: Recursion detected calling function 'f'",
    },
    Rule {
        code: ErrorCode::SandboxAssertion,
        pattern: r"(?i)CGAL ERROR: assertion violation|assertion `[^']*' failed|manifold assertion",
        message: "The geometry library hit an internal assertion. Try the other backend or simplify overlapping geometry.",
        example: "CGAL ERROR: assertion violation! Expr: itl != it->second.end()",
    },
    Rule {
        code: ErrorCode::SandboxAbort,
        pattern: r"(?i)\baborted\(|RuntimeError: abort|\babort\(\)",
        message: "The geometry engine aborted. It will be restarted before the next render.",
        example: "RuntimeError: Aborted(). Build with -sASSERTIONS for more info.",
    },
    Rule {
        code: ErrorCode::SandboxUnreachable,
        pattern: r"(?i)\bunreachable\b",
        message: "The geometry engine crashed. It will be restarted before the next render.",
        example: "RuntimeError: unreachable executed",
    },
    Rule {
        code: ErrorCode::SandboxOutOfBounds,
        pattern: r"(?i)memory access out of bounds|out of bounds memory access",
        message: "The geometry engine crashed with a memory error. It will be restarted before the next render.",
        example: "RuntimeError: memory access out of bounds",
    },
    Rule {
        code: ErrorCode::InternalError,
        pattern: r"(?i)\b(?:error|exception|code|abort(?:ed)?)\W{0,3}-?\d{5,}\b",
        message: "The geometry engine hit an internal error. It will be restarted before the next render.",
        example: "Uncaught exception 1163376",
    },
];

fn compiled() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("valid classifier pattern"))
            .collect()
    })
}

/// The rule table
pub fn rules() -> &'static [Rule] {
    RULES
}

/// Whether the rule for `code` matches `text`, regardless of rule order
pub fn matches_rule(code: ErrorCode, text: &str) -> bool {
    RULES
        .iter()
        .zip(compiled())
        .any(|(rule, re)| rule.code == code && re.is_match(text))
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:[A-Za-z]:)?(?:[/\\][\w.\-]+)+[/\\]").expect("valid regex"))
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\s*in file\s+"?[^",]*"?,?|,?\s*line\s+\d+:?|:\d+(?::\d+)?\b"#)
            .expect("valid regex")
    })
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:error|warning|trace)\s*:\s*").expect("valid regex"))
}

/// Strip internal paths, source locations and severity prefixes
pub fn clean_diagnostic(raw: &str) -> String {
    let without_paths = path_re().replace_all(raw, "");
    let without_locations = location_re().replace_all(&without_paths, "");
    let lines: Vec<String> = without_locations
        .lines()
        .map(|line| prefix_re().replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    lines.join(" ")
}

const MAX_SURFACED_CHARS: usize = 300;

/// Classify raw diagnostic text
pub fn classify(raw: &str) -> ErrorClassification {
    if let Some(index) = compiled().iter().position(|re| re.is_match(raw)) {
        let rule = &RULES[index];
        return ErrorClassification {
            code: rule.code,
            message: rule.message.to_string(),
            raw: raw.to_string(),
            needs_restart: rule.code.needs_restart(),
        };
    }

    let cleaned = clean_diagnostic(raw);
    let numeric = !cleaned.is_empty()
        && cleaned
            .trim_start_matches('-')
            .chars()
            .all(|c| c.is_ascii_digit());

    let message = if cleaned.chars().count() < 5 || numeric {
        GENERIC_MESSAGE.to_string()
    } else {
        let surfaced: String = cleaned.chars().take(MAX_SURFACED_CHARS).collect();
        format!("Render error: {}", surfaced)
    };

    ErrorClassification {
        code: ErrorCode::RenderFailed,
        message,
        raw: raw.to_string(),
        needs_restart: false,
    }
}

/// Pick the lines worth classifying out of a full transcript.
///
/// Errors take precedence over warnings, so a harmless warning printed
/// before the fatal error does not decide the classification.
pub fn diagnostic_text(transcript: &[String]) -> String {
    let errors: Vec<&str> = transcript
        .iter()
        .map(String::as_str)
        .filter(|line| {
            let upper = line.trim_start().to_ascii_uppercase();
            upper.starts_with("ERROR")
                || upper.contains("RUNTIMEERROR")
                || upper.contains("ABORTED(")
                || upper.starts_with("CGAL ERROR")
        })
        .collect();

    if errors.is_empty() {
        transcript.join("\n")
    } else {
        errors.join("\n")
    }
}
