//! Path expressions navigating a JSON value from its root.
//!
//! Supported syntax:
//! - `$` root element (must appear first)
//! - `.key` member access, `.*` every child
//! - `."dotted.key"` / `.'key'` quoted member access
//! - `["key"]` / `['key']` quoted member access
//! - `[n]` array index, negative counts from the end
//! - `[*]` every child
//! - `..` recursive descent, followed by any other selector (`$..name`, `$..[0]`)

use std::fmt;

use serde_json::Value;

/// A single step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Object member by name.
    Member(String),
    /// Array element by index.
    Index(i64),
    /// Every element of an array or every value of an object.
    Wildcard,
    /// The current node and all of its descendants, in document order.
    Descend,
}

/// A parsed path expression, ready to run against any number of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    steps: Vec<PathStep>,
}

impl JsonPath {
    /// Parses a path expression.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason (with character position) when the
    /// expression is not valid.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let chars: Vec<char> = expr.trim().chars().collect();
        match chars.first() {
            None => return Err("empty path expression".into()),
            Some('$') => {}
            Some(c) => return Err(format!("path must start with '$', got '{c}'")),
        }

        let mut steps = Vec::new();
        let mut pos = 1;

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    if chars.get(pos) == Some(&'.') {
                        steps.push(PathStep::Descend);
                        pos += 1;
                        if chars.get(pos) == Some(&'[') {
                            continue;
                        }
                    }
                    match chars.get(pos) {
                        None => return Err(format!("empty member name at position {pos}")),
                        Some('*') => {
                            steps.push(PathStep::Wildcard);
                            pos += 1;
                        }
                        Some('"') | Some('\'') => {
                            let (name, next) = read_quoted(&chars, pos)?;
                            steps.push(PathStep::Member(name));
                            pos = next;
                        }
                        Some(_) => {
                            let start = pos;
                            while pos < chars.len()
                                && chars[pos] != '.'
                                && chars[pos] != '['
                                && !chars[pos].is_whitespace()
                            {
                                pos += 1;
                            }
                            if pos == start {
                                return Err(format!("empty member name at position {start}"));
                            }
                            steps.push(PathStep::Member(chars[start..pos].iter().collect()));
                        }
                    }
                }
                '[' => {
                    pos += 1;
                    skip_whitespace(&chars, &mut pos);
                    match chars.get(pos) {
                        None => return Err("unclosed bracket".into()),
                        Some('*') => {
                            steps.push(PathStep::Wildcard);
                            pos += 1;
                        }
                        Some('"') | Some('\'') => {
                            let (name, next) = read_quoted(&chars, pos)?;
                            steps.push(PathStep::Member(name));
                            pos = next;
                        }
                        Some(_) => {
                            let start = pos;
                            if chars[pos] == '-' {
                                pos += 1;
                            }
                            let digits = pos;
                            while pos < chars.len() && chars[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            if pos == digits {
                                return Err(format!(
                                    "expected array index, '*' or quoted key at position {start}"
                                ));
                            }
                            let text: String = chars[start..pos].iter().collect();
                            let idx = text
                                .parse::<i64>()
                                .map_err(|_| format!("invalid array index: '{text}'"))?;
                            steps.push(PathStep::Index(idx));
                        }
                    }
                    skip_whitespace(&chars, &mut pos);
                    if chars.get(pos) != Some(&']') {
                        return Err(format!("expected ']' at position {pos}"));
                    }
                    pos += 1;
                }
                c if c.is_whitespace() => pos += 1,
                c => return Err(format!("unexpected character '{c}' at position {pos}")),
            }
        }

        Ok(Self {
            source: expr.to_string(),
            steps,
        })
    }

    /// The expression this path was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// All matches, in document order.
    pub fn find<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for step in &self.steps {
            let mut next = Vec::new();
            for v in current {
                match step {
                    PathStep::Member(name) => {
                        if let Some(child) = v.get(name.as_str()) {
                            next.push(child);
                        }
                    }
                    PathStep::Index(i) => {
                        if let Value::Array(items) = v {
                            if let Some(item) = resolve_index(items.len(), *i).and_then(|ix| items.get(ix)) {
                                next.push(item);
                            }
                        }
                    }
                    PathStep::Wildcard => match v {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    PathStep::Descend => collect_descendants(v, &mut next),
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    /// First match, if any.
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.find(root).into_iter().next()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

/// Reads a quoted key starting at the opening quote. Returns the unescaped
/// key and the position right after the closing quote.
fn read_quoted(chars: &[char], open: usize) -> Result<(String, usize), String> {
    let quote = chars[open];
    let mut pos = open + 1;
    let mut out = String::new();
    while pos < chars.len() {
        match chars[pos] {
            '\\' if pos + 1 < chars.len() => {
                out.push(chars[pos + 1]);
                pos += 2;
            }
            c if c == quote => return Ok((out, pos + 1)),
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }
    Err(format!("unclosed quoted member starting at position {open}"))
}

fn resolve_index(len: usize, idx: i64) -> Option<usize> {
    if idx >= 0 {
        usize::try_from(idx).ok()
    } else {
        let from_end = len as i64 + idx;
        usize::try_from(from_end).ok()
    }
}

fn collect_descendants<'a>(v: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(v);
    match v {
        Value::Array(items) => items.iter().for_each(|item| collect_descendants(item, out)),
        Value::Object(map) => map.values().for_each(|child| collect_descendants(child, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps(expr: &str) -> Vec<PathStep> {
        JsonPath::parse(expr).unwrap().steps
    }

    #[test]
    fn parse_root_only() {
        assert!(steps("$").is_empty());
    }

    #[test]
    fn parse_nested_members_and_index() {
        assert_eq!(
            steps("$.hosts[0].name"),
            vec![
                PathStep::Member("hosts".into()),
                PathStep::Index(0),
                PathStep::Member("name".into()),
            ]
        );
    }

    #[test]
    fn parse_quoted_members() {
        assert_eq!(
            steps(r#"$."kismet.alert.header""#),
            vec![PathStep::Member("kismet.alert.header".into())]
        );
        assert_eq!(
            steps("$['a b']['it\\'s']"),
            vec![PathStep::Member("a b".into()), PathStep::Member("it's".into())]
        );
    }

    #[test]
    fn parse_wildcards_and_descent() {
        assert_eq!(
            steps("$.items[*].*"),
            vec![
                PathStep::Member("items".into()),
                PathStep::Wildcard,
                PathStep::Wildcard
            ]
        );
        assert_eq!(
            steps("$..price"),
            vec![PathStep::Descend, PathStep::Member("price".into())]
        );
        assert_eq!(steps("$..[1]"), vec![PathStep::Descend, PathStep::Index(1)]);
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(JsonPath::parse("").is_err());
        assert!(JsonPath::parse("a.b").is_err());
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("$..").is_err());
        assert!(JsonPath::parse("$[").is_err());
        assert!(JsonPath::parse("$[abc]").is_err());
        assert!(JsonPath::parse("$['open").is_err());
        assert!(JsonPath::parse("$[0").is_err());
        assert!(JsonPath::parse("$ a").is_err());
    }

    #[test]
    fn find_member_and_index() {
        let doc = json!({"hosts": [{"name": "a"}, {"name": "b"}]});
        let p = JsonPath::parse("$.hosts[1].name").unwrap();
        assert_eq!(p.first(&doc), Some(&json!("b")));
        let last = JsonPath::parse("$.hosts[-1].name").unwrap();
        assert_eq!(last.first(&doc), Some(&json!("b")));
        let oob = JsonPath::parse("$.hosts[-3]").unwrap();
        assert!(oob.first(&doc).is_none());
    }

    #[test]
    fn find_missing_member_is_empty() {
        let doc = json!({"a": 1});
        assert!(JsonPath::parse("$.b").unwrap().find(&doc).is_empty());
        assert!(JsonPath::parse("$.a.b").unwrap().find(&doc).is_empty());
    }

    #[test]
    fn find_wildcard_returns_all_in_order() {
        let doc = json!({"xs": [1, 2, 3]});
        let found = JsonPath::parse("$.xs[*]").unwrap().find(&doc);
        assert_eq!(found, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn find_recursive_descent() {
        let doc = json!({"a": {"id": 1, "b": {"id": 2}}, "id": 0});
        let found = JsonPath::parse("$..id").unwrap().find(&doc);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn matches_follow_document_order() {
        let doc: Value =
            serde_json::from_str(r#"{"zeta": {"id": "first"}, "alpha": {"id": "second"}}"#).unwrap();
        assert_eq!(JsonPath::parse("$..id").unwrap().first(&doc), Some(&json!("first")));
        assert_eq!(
            JsonPath::parse("$.*").unwrap().find(&doc),
            vec![&json!({"id": "first"}), &json!({"id": "second"})]
        );
    }

    #[test]
    fn display_is_the_source_expression() {
        let p = JsonPath::parse("$.alert.severity").unwrap();
        assert_eq!(p.to_string(), "$.alert.severity");
    }
}
