//! Recursive `${VAR}` environment-variable interpolation for config
//! values. Missing variables expand to the empty string, which lets the
//! loader detect "token not configured" instead of failing hard.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern"))
}

/// Replace every `${VAR}` reference in a string with the value of the
/// `VAR` environment variable (empty string when unset).
pub fn interpolate_str(input: &str) -> String {
    var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Recursively interpolate `${VAR}` references in every string found
/// inside a JSON value tree (maps and sequences included).
pub fn resolve_env_vars(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = interpolate_str(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_env_vars(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_env_vars(v);
            }
        }
        _ => {}
    }
}

/// Extract the first `${VAR}` name referenced by a string, if any.
/// Used to hint which variable is missing when a token resolves empty.
pub fn first_var_reference(input: &str) -> Option<String> {
    var_pattern()
        .captures(input)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_variable() {
        std::env::set_var("MB_TEST_TOKEN", "12345:abc");
        assert_eq!(interpolate_str("${MB_TEST_TOKEN}"), "12345:abc");
        assert_eq!(
            interpolate_str("prefix-${MB_TEST_TOKEN}-suffix"),
            "prefix-12345:abc-suffix"
        );
    }

    #[test]
    fn missing_variable_becomes_empty() {
        std::env::remove_var("MB_TEST_UNSET");
        assert_eq!(interpolate_str("${MB_TEST_UNSET}"), "");
    }

    #[test]
    fn plain_strings_untouched() {
        assert_eq!(interpolate_str("no references here"), "no references here");
    }

    #[test]
    fn resolves_nested_values() {
        std::env::set_var("MB_TEST_NESTED", "deep");
        let mut value = serde_json::json!({
            "top": "${MB_TEST_NESTED}",
            "map": { "inner": "${MB_TEST_NESTED}" },
            "list": ["${MB_TEST_NESTED}", 42, true],
        });
        resolve_env_vars(&mut value);
        assert_eq!(value["top"], "deep");
        assert_eq!(value["map"]["inner"], "deep");
        assert_eq!(value["list"][0], "deep");
        assert_eq!(value["list"][1], 42);
    }

    #[test]
    fn first_reference_extracted() {
        assert_eq!(
            first_var_reference("${BOT_A_TOKEN}").as_deref(),
            Some("BOT_A_TOKEN")
        );
        assert_eq!(first_var_reference("literal"), None);
    }
}
