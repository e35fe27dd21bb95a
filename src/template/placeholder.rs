//! `#{name}` placeholder extraction and substitution.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::injection::{self, InjectionDetected};
use crate::params::ParameterBag;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\{\s*([^{}\s]+)\s*\}").unwrap());

/// Final SQL text plus the values that were bound into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStatement {
    pub sql: String,
    /// `(name, value)` in placeholder order; unresolved names are absent.
    pub bound: Vec<(String, String)>,
}

/// Return each distinct placeholder name in first-appearance order.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Bind `bag` into `template`.
///
/// Substitution is a single pass, so a value that itself looks like a
/// placeholder is inserted literally. Names that are absent from the bag or
/// bound to null are left as their `#{name}` marker.
pub fn render(
    template: &str,
    bag: &ParameterBag,
    screen_injection: bool,
) -> Result<RenderedStatement, InjectionDetected> {
    let names = extract_placeholders(template);
    if names.is_empty() {
        return Ok(RenderedStatement {
            sql: template.to_string(),
            bound: Vec::new(),
        });
    }

    let mut bound = Vec::with_capacity(names.len());
    for name in names {
        if let Some(value) = bag.get(&name) {
            if screen_injection {
                injection::screen(&name, value)?;
            }
            bound.push((name, value.to_string()));
        }
    }

    tracing::debug!(placeholders = ?bound, params = ?bag, "Binding template placeholders");

    let sql = PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            bound
                .iter()
                .find(|(name, _)| name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.clone())
        })
        .into_owned();

    Ok(RenderedStatement { sql, bound })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::injection::Signature;

    fn bag(pairs: &[(&str, &str)]) -> ParameterBag {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_extract_distinct_in_order() {
        let names =
            extract_placeholders("SELECT * FROM t WHERE b=#{b} AND a=#{a} OR b=#{ b }");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_render_simple_binding() {
        let out = render("SELECT * FROM t WHERE id=#{id}", &bag(&[("id", "5")]), false).unwrap();
        assert_eq!(out.sql, "SELECT * FROM t WHERE id=5");
        assert_eq!(out.bound, vec![("id".to_string(), "5".to_string())]);
    }

    #[test]
    fn test_duplicate_placeholders_bind_same_value() {
        let out = render("#{x} + #{x} = #{y}", &bag(&[("x", "2"), ("y", "4")]), false).unwrap();
        assert_eq!(out.sql, "2 + 2 = 4");
    }

    #[test]
    fn test_unresolved_placeholder_passes_through() {
        let mut b = bag(&[("a", "1")]);
        b.insert_null("c");
        let out = render("a=#{a} b=#{b} c=#{c}", &b, false).unwrap();
        assert_eq!(out.sql, "a=1 b=#{b} c=#{c}");
    }

    #[test]
    fn test_value_is_not_resubstituted() {
        let out = render("#{a} #{b}", &bag(&[("a", "#{b}"), ("b", "x")]), false).unwrap();
        assert_eq!(out.sql, "#{b} x");
    }

    #[test]
    fn test_render_is_deterministic() {
        let b = bag(&[("z", "1"), ("a", "2"), ("m", "3")]);
        let t = "#{m}#{a}#{z}#{a}";
        assert_eq!(render(t, &b, false).unwrap(), render(t, &b, false).unwrap());
    }

    #[test]
    fn test_screening_rejects_stacked_statement() {
        let err = render(
            "SELECT * FROM t WHERE id=#{id}",
            &bag(&[("id", "1; DROP TABLE t")]),
            true,
        )
        .unwrap_err();
        assert_eq!(err.signature, Signature::StatementTerminator);
    }

    #[test]
    fn test_screening_disabled_allows_anything() {
        let out = render("id=#{id}", &bag(&[("id", "1; DROP TABLE t")]), false).unwrap();
        assert_eq!(out.sql, "id=1; DROP TABLE t");
    }

    #[test]
    fn test_screening_ignores_template_literals_and_unused_params() {
        let out = render(
            "SELECT 1; -- #{id}",
            &bag(&[("id", "7"), ("unused", "x; y")]),
            true,
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT 1; -- 7");
    }
}
