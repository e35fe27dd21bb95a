//! Dynamic SQL node tree and its renderer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use super::expr::{self, Expr, Scope};
use super::{MapperError, MapperRegistry};

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([#$])\{\s*([^{}]+?)\s*\}").unwrap());

/// Nested `<include>` expansions allowed before giving up.
const MAX_INCLUDE_DEPTH: usize = 16;

/// `<trim>`, `<where>` and `<set>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trim {
    pub prefix: String,
    pub suffix: String,
    pub prefix_overrides: Vec<String>,
    pub suffix_overrides: Vec<String>,
    pub children: Vec<Node>,
}

impl Trim {
    pub fn where_clause(children: Vec<Node>) -> Self {
        Self {
            prefix: "WHERE".into(),
            suffix: String::new(),
            prefix_overrides: vec!["AND".into(), "OR".into()],
            suffix_overrides: Vec::new(),
            children,
        }
    }

    pub fn set_clause(children: Vec<Node>) -> Self {
        Self {
            prefix: "SET".into(),
            suffix: String::new(),
            prefix_overrides: Vec::new(),
            suffix_overrides: vec![",".into()],
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Foreach {
    /// Dotted path of the iterated parameter.
    pub collection: String,
    pub item: String,
    pub index: Option<String>,
    pub open: String,
    pub close: String,
    pub separator: String,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    If {
        test: Expr,
        children: Vec<Node>,
    },
    Choose {
        whens: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Trim(Trim),
    Foreach(Foreach),
    Bind {
        name: String,
        value: Expr,
    },
    Include {
        refid: String,
    },
}

/// Evaluation state for one statement render.
pub(crate) struct RenderContext<'a> {
    registry: &'a MapperRegistry,
    namespace: &'a str,
    params: &'a BTreeMap<String, Value>,
    /// foreach items and binds, innermost last
    locals: Vec<(String, Value)>,
    depth: usize,
}

impl Scope for RenderContext<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .or_else(|| self.params.get(name).cloned())
    }
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        registry: &'a MapperRegistry,
        namespace: &'a str,
        params: &'a BTreeMap<String, Value>,
    ) -> Self {
        Self {
            registry,
            namespace,
            params,
            locals: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn render(&mut self, nodes: &[Node]) -> Result<String, MapperError> {
        let mut out = String::new();
        self.render_into(nodes, &mut out)?;
        Ok(collapse_whitespace(&out))
    }

    fn render_into(&mut self, nodes: &[Node], out: &mut String) -> Result<(), MapperError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(&self.interpolate(text)?),
                Node::If { test, children } => {
                    if test.test(&*self) {
                        self.render_into(children, out)?;
                    }
                }
                Node::Choose { whens, otherwise } => {
                    let branch = whens
                        .iter()
                        .find(|(test, _)| test.test(&*self))
                        .map(|(_, children)| children)
                        .or(otherwise.as_ref());
                    if let Some(children) = branch {
                        self.render_into(children, out)?;
                    }
                }
                Node::Trim(trim) => {
                    let block = self.render_trim(trim)?;
                    push_block(out, &block);
                }
                Node::Foreach(foreach) => {
                    let block = self.render_foreach(foreach)?;
                    push_block(out, &block);
                }
                Node::Bind { name, value } => {
                    let value = value.eval(&*self);
                    self.locals.push((name.clone(), value));
                }
                Node::Include { refid } => {
                    if self.depth >= MAX_INCLUDE_DEPTH {
                        return Err(MapperError::IncludeDepth(refid.clone()));
                    }
                    let registry = self.registry;
                    let fragment = registry
                        .fragment(self.namespace, refid)
                        .ok_or_else(|| MapperError::UnknownFragment(refid.clone()))?;
                    self.depth += 1;
                    let result = self.render_into(fragment, out);
                    self.depth -= 1;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn render_trim(&mut self, trim: &Trim) -> Result<String, MapperError> {
        let mut inner = String::new();
        self.render_into(&trim.children, &mut inner)?;
        let mut body = collapse_whitespace(&inner);
        if body.is_empty() {
            return Ok(String::new());
        }

        for o in &trim.prefix_overrides {
            if let Some(rest) = strip_keyword_prefix(&body, o) {
                body = rest.trim_start().to_string();
                break;
            }
        }
        for o in &trim.suffix_overrides {
            if let Some(rest) = strip_keyword_suffix(&body, o) {
                body = rest.trim_end().to_string();
                break;
            }
        }

        let parts = [trim.prefix.as_str(), body.as_str(), trim.suffix.as_str()];
        Ok(parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn render_foreach(&mut self, foreach: &Foreach) -> Result<String, MapperError> {
        let path: Vec<String> = foreach.collection.split('.').map(str::to_string).collect();
        let collection = match expr::resolve_path(&*self, &path) {
            None | Some(Value::Null) => {
                return Err(MapperError::MissingParameter(foreach.collection.clone()))
            }
            Some(v) => v,
        };

        let entries: Vec<(Value, Value)> = match collection {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            _ => return Err(MapperError::NotIterable(foreach.collection.clone())),
        };

        let mark = self.locals.len();
        let mut parts = Vec::with_capacity(entries.len());
        for (index, item) in entries {
            self.locals.push((foreach.item.clone(), item));
            if let Some(index_name) = &foreach.index {
                self.locals.push((index_name.clone(), index));
            }
            let mut piece = String::new();
            let result = self.render_into(&foreach.children, &mut piece);
            self.locals.truncate(mark);
            result?;

            let piece = collapse_whitespace(&piece);
            if !piece.is_empty() {
                parts.push(piece);
            }
        }

        if parts.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "{}{}{}",
            foreach.open,
            parts.join(&foreach.separator),
            foreach.close
        ))
    }

    /// Replace `#{..}` with SQL literals and `${..}` with raw text.
    fn interpolate(&self, text: &str) -> Result<String, MapperError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in MARKER_RE.captures_iter(text) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.push_str(&text[last..whole.start]);
            last = whole.end;

            // `#{name,jdbcType=VARCHAR}` carries type hints after the name
            let name = caps[2].split(',').next().unwrap_or_default().trim();
            let path: Vec<String> = name.split('.').map(str::to_string).collect();
            let value = expr::resolve_path(self, &path)
                .ok_or_else(|| MapperError::MissingParameter(name.to_string()))?;

            if &caps[1] == "#" {
                out.push_str(&sql_literal(&value));
            } else {
                out.push_str(&raw_text(&value));
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

/// Append a rendered block, keeping it separated from the preceding text.
fn push_block(out: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(block);
}

fn strip_keyword_prefix<'s>(body: &'s str, keyword: &str) -> Option<&'s str> {
    let keyword = keyword.trim();
    if keyword.is_empty() || body.len() < keyword.len() || !body.is_char_boundary(keyword.len()) {
        return None;
    }
    let (head, rest) = body.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let word_like = keyword.ends_with(|c: char| c.is_alphanumeric());
    if word_like && rest.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(rest)
}

fn strip_keyword_suffix<'s>(body: &'s str, keyword: &str) -> Option<&'s str> {
    let keyword = keyword.trim();
    if keyword.is_empty() || body.len() < keyword.len() {
        return None;
    }
    let split = body.len() - keyword.len();
    if !body.is_char_boundary(split) {
        return None;
    }
    let (rest, tail) = body.split_at(split);
    if !tail.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let word_like = keyword.starts_with(|c: char| c.is_alphanumeric());
    if word_like && rest.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(rest)
}

/// Render a value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => items.iter().map(sql_literal).collect::<Vec<_>>().join(", "),
        Value::Object(_) => quote(&value.to_string()),
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Collapse whitespace runs outside single-quoted literals and trim.
pub fn collapse_whitespace(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut pending_space = false;

    for c in sql.chars() {
        if !in_quote && c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' {
            in_quote = !in_quote;
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_literal_forms() {
        assert_eq!(sql_literal(&json!(null)), "NULL");
        assert_eq!(sql_literal(&json!(7)), "7");
        assert_eq!(sql_literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(sql_literal(&json!([1, "a"])), "1, 'a'");
        assert_eq!(sql_literal(&json!({"k": 1})), r#"'{"k":1}'"#);
    }

    #[test]
    fn test_collapse_whitespace_preserves_literals() {
        assert_eq!(
            collapse_whitespace("  SELECT *\n\tFROM t  WHERE a = 'x   y'  "),
            "SELECT * FROM t WHERE a = 'x   y'"
        );
    }

    #[test]
    fn test_keyword_prefix_respects_word_boundary() {
        assert_eq!(strip_keyword_prefix("AND a = 1", "AND"), Some(" a = 1"));
        assert_eq!(strip_keyword_prefix("and a = 1", "AND "), Some(" a = 1"));
        assert_eq!(strip_keyword_prefix("ANDROID = 1", "AND"), None);
        assert_eq!(strip_keyword_suffix("a = 1,", ","), Some("a = 1"));
    }
}
