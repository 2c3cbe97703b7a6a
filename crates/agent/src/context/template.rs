//! `{name}` placeholder substitution.
//!
//! `{{` and `}}` render as literal braces. A placeholder with no value is
//! left in the output as written, so a typo shows up in the prompt instead of
//! silently vanishing.

use std::collections::HashMap;
use tracing::debug;

pub fn render(template: &str, values: &HashMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else {
            match placeholder(&tail[1..]) {
                Some(name) => {
                    match values.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            debug!(placeholder = name, "No value for template placeholder");
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &tail[name.len() + 2..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
    }

    out.push_str(rest);
    out
}

/// The identifier before the closing brace, if `s` starts with `ident}`.
fn placeholder(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let name = &s[..end];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

/// Placeholder names used in `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            rest = after;
            continue;
        }
        match placeholder(&tail[1..]) {
            Some(name) => {
                if !names.contains(&name) {
                    names.push(name);
                }
                rest = &tail[name.len() + 2..];
            }
            None => rest = &tail[1..],
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(pairs: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn substitutes_fields() {
        let out = render(
            "Hello {name}, you asked: {query}",
            &values(&[("name", "Ada"), ("query", "why?")]),
        );
        assert_eq!(out, "Hello Ada, you asked: why?");
    }

    #[test]
    fn double_braces_are_literal() {
        let out = render(r#"Call it as {{"city": "{city}"}}"#, &values(&[("city", "Dhaka")]));
        assert_eq!(out, r#"Call it as {"city": "Dhaka"}"#);
    }

    #[test]
    fn unknown_placeholder_is_kept() {
        let out = render("{known} and {unknown}", &values(&[("known", "k")]));
        assert_eq!(out, "k and {unknown}");
    }

    #[test]
    fn stray_braces_pass_through() {
        let out = render("a { b } c {not a name} {x", &values(&[("x", "1")]));
        assert_eq!(out, "a { b } c {not a name} {x");
    }

    #[test]
    fn values_are_not_rescanned() {
        let out = render("{a}", &values(&[("a", "{b}"), ("b", "nope")]));
        assert_eq!(out, "{b}");
    }

    #[test]
    fn lists_placeholders_once() {
        assert_eq!(
            placeholders("{a} {{b}} {c} {a}"),
            vec!["a", "c"]
        );
    }
}
