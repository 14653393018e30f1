//! Permissive tool-call extraction from untrusted model output.
//!
//! The tolerance here is a contract, not a bug: every accepted surface form
//! (wrapped XML, child tags, attributes, repeated-tag arrays, self-closing
//! tags, fenced or bare JSON, JSON with unescaped newlines) maps to the same
//! canonical invocation. The registry validates the result afterwards.

use super::registry::{self, is_wrapper};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::sync::OnceLock;

/// Traversal bound for nested structures (and the depth-5 guarantee for
/// self-aliasing inputs).
const MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Map<String, JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub invocation: ToolInvocation,
    /// Prose preceding the tool tag, if any.
    pub leading_text: String,
    /// Prose following the tool tag, if any.
    pub trailing_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No tool tag or JSON invocation was extractable.
    NoToolCall,
    /// More than one top-level recognized tool tag in one message.
    MultipleToolCalls,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoToolCall => write!(f, "no tool call parsed"),
            Self::MultipleToolCalls => write!(f, "emit exactly one tool call per message"),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract the single best tool invocation from free-form model text.
pub fn parse_tool_call(raw: &str) -> Result<ParsedCall, ParseError> {
    let text = strip_code_fences(raw.trim());
    let text = text.as_str();

    // Fast path: the whole message is one JSON invocation.
    if text.starts_with('{') {
        if let Some(value) = lenient_json_parse(text) {
            if let Some(invocation) = value_to_invocation(&value, 0) {
                return Ok(ParsedCall {
                    invocation,
                    leading_text: String::new(),
                    trailing_text: String::new(),
                });
            }
        }
    }

    // XML scan over top-level elements.
    let elements = scan_elements(text);
    if !elements.is_empty() {
        let recognized: Vec<&(Element, usize, usize)> = elements
            .iter()
            .filter(|(e, _, _)| registry::find(&e.name).is_some() || is_wrapper(&e.name))
            .collect();
        if recognized.len() > 1 {
            return Err(ParseError::MultipleToolCalls);
        }
        // Unknown tag names are still extracted (they surface as
        // unknown-tool errors upstream) as long as they look like tool
        // calls rather than stray markup in prose.
        let candidate = recognized.first().copied().or_else(|| {
            elements
                .iter()
                .find(|(e, _, _)| e.name.contains('_') || !scan_elements(&e.body).is_empty())
        });
        if let Some((element, start, end)) = candidate {
            if let Some(invocation) = element_to_invocation(element, 0) {
                return Ok(ParsedCall {
                    invocation,
                    leading_text: text[..*start].trim().to_string(),
                    trailing_text: text[*end..].trim().to_string(),
                });
            }
        }
    }

    // JSON embedded in prose: scan for object starts and take the first
    // value that looks like an invocation.
    for (idx, _) in text.match_indices('{') {
        let candidate = &text[idx..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<JsonValue>();
        if let Some(Ok(value)) = stream.next() {
            let consumed = stream.byte_offset();
            if let Some(invocation) = value_to_invocation(&value, 0) {
                return Ok(ParsedCall {
                    invocation,
                    leading_text: text[..idx].trim().to_string(),
                    trailing_text: text[idx + consumed..].trim().to_string(),
                });
            }
        } else if let Some(slice) = balanced_object_slice(candidate) {
            // Stream parsing chokes on bare newlines inside strings; retry
            // the balanced slice through the lenient cleanup.
            if let Some(value) = lenient_json_parse(slice) {
                if let Some(invocation) = value_to_invocation(&value, 0) {
                    return Ok(ParsedCall {
                        invocation,
                        leading_text: text[..idx].trim().to_string(),
                        trailing_text: text[idx + slice.len()..].trim().to_string(),
                    });
                }
            }
        }
    }

    Err(ParseError::NoToolCall)
}

// ---------------------------------------------------------------------------
// JSON invocation shapes
// ---------------------------------------------------------------------------

fn value_to_invocation(value: &JsonValue, depth: usize) -> Option<ToolInvocation> {
    if depth >= MAX_DEPTH {
        return None;
    }
    let obj = value.as_object()?;
    let name = obj.get("name").or_else(|| obj.get("tool"))?.as_str()?.to_string();
    let args = match obj.get("arguments").or_else(|| obj.get("args")) {
        Some(JsonValue::Object(m)) => m.clone(),
        Some(JsonValue::String(s)) => lenient_json_parse(s)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        Some(JsonValue::Null) | None => Map::new(),
        Some(other) => {
            let mut m = Map::new();
            m.insert("value".to_string(), other.clone());
            m
        }
    };
    // A wrapper name with an inner {name, arguments} unwraps one level.
    if is_wrapper(&name) && args.contains_key("name") {
        return value_to_invocation(&JsonValue::Object(args), depth + 1);
    }
    Some(ToolInvocation { name, args })
}

// ---------------------------------------------------------------------------
// XML-ish scanning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    body: String,
}

/// Find complete top-level elements, tolerant of surrounding prose.
fn scan_elements(text: &str) -> Vec<(Element, usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < text.len() {
        let Some(rel) = text[i..].find('<') else { break };
        let start = i + rel;
        match parse_element_at(text, start) {
            Some((element, end)) => {
                out.push((element, start, end));
                i = end;
            }
            None => i = start + 1,
        }
    }
    out
}

fn parse_element_at(text: &str, start: usize) -> Option<(Element, usize)> {
    let rest = &text[start..];
    let after = rest.strip_prefix('<')?;
    let first = after.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let name_len = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    let name = after[..name_len].to_string();

    // Find the end of the open tag, respecting quoted attribute values.
    let tag_rest = &after[name_len..];
    let mut in_quote: Option<char> = None;
    let mut prev_non_space = ' ';
    let mut open_end = None;
    for (idx, c) in tag_rest.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '\'' => in_quote = Some(c),
                '<' => return None, // malformed open tag
                '>' => {
                    open_end = Some((idx, prev_non_space == '/'));
                    break;
                }
                _ => {}
            },
        }
        if !c.is_whitespace() {
            prev_non_space = c;
        }
    }
    let (open_end, self_closing) = open_end?;
    let attrs_raw = tag_rest[..open_end].trim_end_matches('/');
    let attrs = parse_attrs(attrs_raw);
    // Byte index just past '>' relative to `text`.
    let content_start = start + 1 + name_len + open_end + 1;

    if self_closing {
        return Some((
            Element {
                name,
                attrs,
                body: String::new(),
            },
            content_start,
        ));
    }

    // Find the matching close tag, counting nested same-name opens.
    let close_pat = format!("</{name}>");
    let open_prefix = format!("<{name}");
    let mut depth = 1usize;
    let mut cursor = content_start;
    while cursor < text.len() {
        let close_rel = text[cursor..].find(&close_pat);
        let open_rel = find_open(&text[cursor..], &open_prefix);
        match (close_rel, open_rel) {
            (Some(c), Some(o)) if o < c => {
                depth += 1;
                cursor += o + open_prefix.len();
            }
            (Some(c), _) => {
                depth -= 1;
                if depth == 0 {
                    let body = text[content_start..cursor + c].to_string();
                    return Some((
                        Element { name, attrs, body },
                        cursor + c + close_pat.len(),
                    ));
                }
                cursor += c + close_pat.len();
            }
            (None, _) => return None,
        }
    }
    None
}

/// Next occurrence of `<name` followed by a tag delimiter (so `<tag` does not
/// match `<tags`).
fn find_open(text: &str, open_prefix: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = text[from..].find(open_prefix) {
        let at = from + rel;
        let after = &text[at + open_prefix.len()..];
        match after.chars().next() {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                from = at + open_prefix.len();
            }
            _ => return Some(at),
        }
    }
    None
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    static ATTR_RE: OnceLock<Regex> = OnceLock::new();
    let re = ATTR_RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .unwrap_or_else(|e| panic!("invalid attr regex: {e}"))
    });
    re.captures_iter(raw)
        .filter_map(|cap| {
            let key = cap.get(1)?.as_str().to_string();
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string())?;
            Some((key, value))
        })
        .collect()
}

fn element_to_invocation(element: &Element, depth: usize) -> Option<ToolInvocation> {
    if depth >= MAX_DEPTH {
        return None;
    }

    if is_wrapper(&element.name) {
        // Wrapped forms: an inner tool tag, or a JSON body, or
        // <name>/<arguments> children.
        let children = scan_elements(&element.body);
        for (child, _, _) in &children {
            if registry::find(&child.name).is_some() || is_wrapper(&child.name) {
                return element_to_invocation(child, depth + 1);
            }
        }
        let args = element_args(element, depth)?;
        if args.contains_key("name") {
            return value_to_invocation(&JsonValue::Object(args), depth + 1);
        }
        return None;
    }

    let args = element_args(element, depth)?;
    Some(ToolInvocation {
        name: element.name.clone(),
        args,
    })
}

/// Build the argument map for an element from its attributes, child tags,
/// and body.
fn element_args(element: &Element, depth: usize) -> Option<Map<String, JsonValue>> {
    let mut args = Map::new();
    for (key, value) in &element.attrs {
        args.insert(key.clone(), coerce_scalar(value));
    }

    let children = scan_elements(&element.body);
    if children.is_empty() {
        let body = element.body.trim();
        if !body.is_empty() {
            if body.starts_with('{') {
                if let Some(JsonValue::Object(map)) = lenient_json_parse(body) {
                    for (k, v) in map {
                        args.insert(k, v);
                    }
                    return Some(args);
                }
            }
            let key = registry::primary_param(&element.name).unwrap_or("value");
            args.insert(key.to_string(), coerce_scalar(body));
        }
        return Some(args);
    }

    // Repeated same-name top-level children collapse into an array.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: Map<String, JsonValue> = Map::new();
    for (child, _, _) in &children {
        let value = element_value(child, depth + 1)?;
        match grouped.get_mut(&child.name) {
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, value]);
            }
            None => {
                order.push(child.name.clone());
                grouped.insert(child.name.clone(), value);
            }
        }
    }
    for key in order {
        if let Some(value) = grouped.remove(&key) {
            args.insert(key, value);
        }
    }
    Some(args)
}

/// Value of a parameter element: repeated children become an array, mixed
/// children a nested object, a bare body a coerced scalar.
fn element_value(element: &Element, depth: usize) -> Option<JsonValue> {
    if depth >= MAX_DEPTH {
        return None;
    }
    let children = scan_elements(&element.body);
    if children.is_empty() {
        if !element.attrs.is_empty() {
            let mut map = Map::new();
            for (k, v) in &element.attrs {
                map.insert(k.clone(), coerce_scalar(v));
            }
            return Some(JsonValue::Object(map));
        }
        return Some(coerce_scalar(element.body.trim()));
    }
    let all_same = children
        .iter()
        .all(|(c, _, _)| c.name == children[0].0.name);
    if all_same && (children.len() > 1 || is_item_tag(&element.name, &children[0].0.name)) {
        let mut items = Vec::new();
        for (child, _, _) in &children {
            items.push(element_value(child, depth + 1)?);
        }
        return Some(JsonValue::Array(items));
    }
    let mut map = Map::new();
    for (child, _, _) in &children {
        map.insert(child.name.clone(), element_value(child, depth + 1)?);
    }
    Some(JsonValue::Object(map))
}

/// `<tags><tag>a</tag></tags>` is a one-element array, while
/// `<props><Name>x</Name></props>` is a nested object. A lone child reads as
/// an array item only when the parent name pluralizes it.
fn is_item_tag(parent: &str, child: &str) -> bool {
    child == "item"
        || parent == format!("{child}s")
        || parent == format!("{child}es")
}

// ---------------------------------------------------------------------------
// Scalar and JSON cleanup
// ---------------------------------------------------------------------------

/// Leaf coercion: booleans, null, numbers, JSON bodies; everything else
/// stays a string. Structured-value wrappers survive as objects.
pub fn coerce_scalar(s: &str) -> JsonValue {
    let t = s.trim();
    match t {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        "null" => return JsonValue::Null,
        _ => {}
    }
    if let Ok(i) = t.parse::<i64>() {
        return JsonValue::from(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        if f.is_finite() {
            return JsonValue::from(f);
        }
    }
    if t.starts_with('{') || t.starts_with('[') {
        if let Some(v) = lenient_json_parse(t) {
            return v;
        }
    }
    JsonValue::String(t.to_string())
}

/// JSON parse with the cleanup ladder: as-is, then code fences stripped,
/// then bare newlines inside string literals escaped, then single-quoted
/// strings normalized.
pub fn lenient_json_parse(s: &str) -> Option<JsonValue> {
    let t = strip_code_fences(s.trim());
    if let Ok(v) = serde_json::from_str(&t) {
        return Some(v);
    }
    let escaped = escape_bare_newlines(&t);
    if let Ok(v) = serde_json::from_str(&escaped) {
        return Some(v);
    }
    let requoted = normalize_single_quotes(&escaped);
    serde_json::from_str(&requoted).ok()
}

/// Strip a surrounding ``` fence (with optional language tag).
pub fn strip_code_fences(s: &str) -> String {
    let t = s.trim();
    if !t.starts_with("```") {
        return t.to_string();
    }
    let Some(rest) = t.strip_prefix("```") else {
        return t.to_string();
    };
    // Drop the language tag up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim().to_string()
}

/// Escape raw control characters appearing inside JSON string literals.
fn escape_bare_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

/// Convert single-quoted JSON-like strings to double-quoted ones, outside of
/// existing double-quoted strings.
fn normalize_single_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_double = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_double {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_double = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_double = true;
                out.push(c);
            }
            '\'' => {
                out.push('"');
                let mut inner_escaped = false;
                for inner in chars.by_ref() {
                    if inner_escaped {
                        inner_escaped = false;
                        out.push(inner);
                        continue;
                    }
                    match inner {
                        '\\' => {
                            inner_escaped = true;
                            out.push(inner);
                        }
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        _ => out.push(inner),
                    }
                }
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Slice out one balanced `{...}` object, quote-aware.
fn balanced_object_slice(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Bounded deep string search
// ---------------------------------------------------------------------------

/// Find the most meaningful string inside a nested value, searching the
/// semantic keys in order. Traversal is bounded at depth 5, so self-similar
/// inputs return in bounded time.
pub fn deep_find_string(value: &JsonValue, preferred_keys: &[&str]) -> Option<String> {
    fn by_key(value: &JsonValue, key: &str, depth: usize) -> Option<String> {
        if depth >= MAX_DEPTH {
            return None;
        }
        match value {
            JsonValue::Object(map) => {
                if let Some(JsonValue::String(s)) = map.get(key) {
                    if !s.trim().is_empty() {
                        return Some(s.trim().to_string());
                    }
                }
                map.values().find_map(|v| by_key(v, key, depth + 1))
            }
            JsonValue::Array(items) => items.iter().find_map(|v| by_key(v, key, depth + 1)),
            _ => None,
        }
    }

    preferred_keys
        .iter()
        .find_map(|key| by_key(value, key, 0))
}

/// The semantic key order used across the engine.
pub const SEMANTIC_KEYS: &[&str] = &["query", "value", "text", "name", "title"];
