// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Parameter defines and the engine command line

use super::{Backend, OutputFormat, ParamType, ParamValue, RenderRequest};
use crate::engine::EngineCapabilities;
use crate::utils::encoding::format_number;

/// Quote a string literal for the engine's language
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` into 0..=255 components (alpha dropped)
pub fn parse_hex_color(text: &str) -> Option<[u8; 3]> {
    let hex = text.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let digit = channel(&c.to_string())?;
                rgb[i] = digit * 17;
            }
            Some(rgb)
        }
        6 | 8 => Some([channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?]),
        _ => None,
    }
}

fn color_vector(rgb: [u8; 3]) -> String {
    let parts: Vec<String> = rgb
        .iter()
        .map(|&c| format_number((c as f64 / 255.0 * 10_000.0).round() / 10_000.0))
        .collect();
    format!("[{}]", parts.join(", "))
}

fn coerce_boolean(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

/// Serialize one value to the engine's literal syntax.
///
/// String values only change shape when the declared type asks for it: a
/// dropdown whose value reads "yes" stays the string `"yes"` unless the
/// parameter is declared boolean.
pub fn serialize_value(value: &ParamValue, ty: Option<ParamType>) -> String {
    match value {
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Number(n) => format_number(*n),
        ParamValue::Text(text) => match ty {
            Some(ParamType::Color) => match parse_hex_color(text) {
                Some(rgb) => color_vector(rgb),
                None => quote(text),
            },
            Some(ParamType::Boolean) => match coerce_boolean(text) {
                Some(b) => b.to_string(),
                None => quote(text),
            },
            Some(ParamType::Number) => match text.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => format_number(n),
                _ => quote(text),
            },
            _ => quote(text),
        },
        ParamValue::List(items) => {
            let inner: Vec<String> = items.iter().map(|item| serialize_value(item, ty)).collect();
            format!("[{}]", inner.join(", "))
        }
        ParamValue::File { name } => quote(name),
    }
}

/// `name=value` define for one parameter
pub fn define(name: &str, value: &ParamValue, ty: Option<ParamType>) -> String {
    format!("{}={}", name, serialize_value(value, ty))
}

/// Backend flag for the request, if the engine supports what was asked
pub fn backend_flag(backend: Backend, capabilities: &EngineCapabilities) -> Option<&'static str> {
    match backend {
        Backend::Cgal => None,
        Backend::Auto | Backend::Manifold => {
            if capabilities.alternate_backend {
                Some("--backend=manifold")
            } else if capabilities.fast_csg {
                Some("--enable=fast-csg")
            } else {
                None
            }
        }
    }
}

/// Assemble the full argument list for one call
pub fn build_invocation(
    input: &str,
    output: &str,
    request: &RenderRequest,
    capabilities: &EngineCapabilities,
) -> Vec<String> {
    let mut args = vec![input.to_string(), "-o".to_string(), output.to_string()];

    for (name, value) in &request.parameters {
        let ty = request.param_types.get(name).copied();
        args.push("-D".to_string());
        args.push(define(name, value, ty));
    }

    if let Some(flag) = backend_flag(request.render_options.backend, capabilities) {
        args.push(flag.to_string());
    }

    if request.render_options.lazy_union && capabilities.lazy_union {
        args.push("--enable=lazy-union".to_string());
    }

    if request.output_format == OutputFormat::Stl && capabilities.binary_stl {
        args.push("--export-format=binstl".to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(alternate: bool, fast_csg: bool, lazy: bool, binary: bool) -> EngineCapabilities {
        EngineCapabilities {
            alternate_backend: alternate,
            fast_csg,
            lazy_union: lazy,
            binary_stl: binary,
            version: None,
            detected_at: String::new(),
        }
    }

    fn text(s: &str) -> ParamValue {
        ParamValue::Text(s.to_string())
    }

    #[test]
    fn test_dropdown_yes_stays_string() {
        assert_eq!(serialize_value(&text("yes"), Some(ParamType::String)), "\"yes\"");
        assert_eq!(serialize_value(&text("no"), None), "\"no\"");
        assert_eq!(serialize_value(&text("yes"), Some(ParamType::Boolean)), "true");
        assert_eq!(serialize_value(&text("off"), Some(ParamType::Boolean)), "false");
        assert_eq!(serialize_value(&text("maybe"), Some(ParamType::Boolean)), "\"maybe\"");
    }

    #[test]
    fn test_colors() {
        assert_eq!(serialize_value(&text("#ff0000"), Some(ParamType::Color)), "[1, 0, 0]");
        assert_eq!(serialize_value(&text("#0f0"), Some(ParamType::Color)), "[0, 1, 0]");
        assert_eq!(
            serialize_value(&text("#80808080"), Some(ParamType::Color)),
            "[0.502, 0.502, 0.502]"
        );
        // Untyped hex strings are just strings
        assert_eq!(serialize_value(&text("#ff0000"), None), "\"#ff0000\"");
        assert_eq!(serialize_value(&text("red"), Some(ParamType::Color)), "\"red\"");
    }

    #[test]
    fn test_numbers_and_lists() {
        assert_eq!(serialize_value(&ParamValue::Number(10.0), None), "10");
        assert_eq!(serialize_value(&ParamValue::Number(2.5), None), "2.5");
        assert_eq!(serialize_value(&ParamValue::Number(f64::NAN), None), "undef");
        assert_eq!(serialize_value(&text(" 3.5 "), Some(ParamType::Number)), "3.5");
        assert_eq!(serialize_value(&text("wide"), Some(ParamType::Number)), "\"wide\"");

        let nested = ParamValue::List(vec![
            ParamValue::List(vec![ParamValue::Number(1.0), ParamValue::Number(2.0)]),
            ParamValue::List(vec![ParamValue::Bool(true), text("a\"b")]),
        ]);
        assert_eq!(serialize_value(&nested, None), "[[1, 2], [true, \"a\\\"b\"]]");
    }

    #[test]
    fn test_file_param_is_filename() {
        let value = ParamValue::File {
            name: "logo.svg".to_string(),
        };
        assert_eq!(define("logo", &value, Some(ParamType::File)), "logo=\"logo.svg\"");
    }

    #[test]
    fn test_invocation_flags_need_support() {
        let mut request = RenderRequest::new("r", "cube(1);")
            .with_param("size", ParamValue::Number(4.0), None);
        request.render_options.lazy_union = true;

        let args = build_invocation("/input.scad", "/output.stl", &request, &caps(true, false, true, true));
        assert_eq!(
            args,
            vec![
                "/input.scad",
                "-o",
                "/output.stl",
                "-D",
                "size=4",
                "--backend=manifold",
                "--enable=lazy-union",
                "--export-format=binstl"
            ]
        );

        let args = build_invocation("/input.scad", "/output.stl", &request, &caps(false, true, false, false));
        assert!(args.contains(&"--enable=fast-csg".to_string()));
        assert!(!args.iter().any(|a| a.contains("lazy-union") || a.contains("binstl")));

        request.render_options.backend = Backend::Cgal;
        let args = build_invocation("/input.scad", "/output.svg", &request.with_format(OutputFormat::Svg), &caps(true, true, true, true));
        assert!(!args.iter().any(|a| a.starts_with("--backend") || a.contains("fast-csg") || a.contains("binstl")));
    }
}
