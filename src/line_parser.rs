//! Menu line protocol parsing.
//!
//! One line of plugin stdout is display text, optionally followed by the
//! first unescaped `|` and a space-separated run of `key=value` or bare
//! `key` directives. Values may be single- or double-quoted to contain
//! spaces. Parsing never fails: a malformed token (empty key,
//! unterminated quote) degrades that one line by keeping the directives
//! parsed so far and folding the remainder back into the display text.

use serde::Serialize;

/// A directive value after best-effort coercion: `true`/`false`/`1`/`0`
/// become booleans, everything else stays a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DirectiveValue {
    Bool(bool),
    Text(String),
}

impl DirectiveValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DirectiveValue::Bool(b) => Some(*b),
            DirectiveValue::Text(_) => None,
        }
    }

    /// String view of the value; booleans render as `true`/`false`.
    pub fn as_str(&self) -> &str {
        match self {
            DirectiveValue::Bool(true) => "true",
            DirectiveValue::Bool(false) => "false",
            DirectiveValue::Text(s) => s,
        }
    }
}

/// One `key=value` (or bare-key, which reads as `key=true`) annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub key: String,
    pub value: DirectiveValue,
}

/// A fully parsed protocol line: display text plus ordered directives.
///
/// Unrecognized keys are kept verbatim — the rendering layer receives
/// the whole list and must treat unknown keys as opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLine {
    pub text: String,
    pub directives: Vec<Directive>,
}

lazy_static::lazy_static! {
    /// Positional bash arguments: `param1`, `param2`, ...
    static ref PARAM_KEY_RE: regex::Regex = regex::Regex::new(r"^param([0-9]+)$").unwrap();
}

impl ParsedLine {
    /// Parse a single raw line. Never fails; see module docs for the
    /// degradation rules.
    pub fn parse(line: &str) -> ParsedLine {
        let (text, rest) = split_display(line);
        let mut parsed = ParsedLine {
            text,
            directives: Vec::new(),
        };
        let Some(raw) = rest else {
            return parsed;
        };
        match tokenize(raw) {
            Ok(directives) => parsed.directives = directives,
            Err((directives, offset)) => {
                tracing::debug!(offset, "malformed directive token, degrading line");
                parsed.directives = directives;
                // The unparseable remainder becomes a literal display suffix.
                parsed.text.push_str(&raw[offset..]);
            }
        }
        parsed
    }

    /// Re-emit a canonical protocol line. `parse(serialize(parse(l)))`
    /// preserves keys and values up to boolean normalization.
    pub fn serialize(&self) -> String {
        let mut out = self.text.replace('|', "\\|");
        if self.directives.is_empty() {
            return out;
        }
        out.push('|');
        for d in &self.directives {
            out.push(' ');
            out.push_str(&d.key);
            out.push('=');
            match &d.value {
                DirectiveValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                DirectiveValue::Text(s) => out.push_str(&quote_value(s)),
            }
        }
        out
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&DirectiveValue> {
        self.directives
            .iter()
            .find(|d| d.key == key)
            .map(|d| &d.value)
    }

    /// Boolean read of `key`; non-boolean values fall back to `default`.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v.as_bool().unwrap_or(default),
            None => default,
        }
    }

    /// String read of `key`.
    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.get(key).map(|v| v.as_str())
    }

    pub fn href(&self) -> Option<&str> {
        self.value_str("href")
    }

    pub fn bash(&self) -> Option<&str> {
        self.value_str("bash")
    }

    /// `param1..paramN` values in numeric order.
    pub fn bash_params(&self) -> Vec<String> {
        let mut params: Vec<(u32, String)> = self
            .directives
            .iter()
            .filter_map(|d| {
                let caps = PARAM_KEY_RE.captures(&d.key)?;
                let n: u32 = caps[1].parse().ok()?;
                Some((n, d.value.as_str().to_string()))
            })
            .collect();
        params.sort_by_key(|(n, _)| *n);
        params.into_iter().map(|(_, v)| v).collect()
    }

    pub fn copy_text(&self) -> Option<&str> {
        self.value_str("copy")
    }

    pub fn terminal(&self) -> bool {
        self.flag("terminal", false)
    }

    pub fn refresh(&self) -> bool {
        self.flag("refresh", false)
    }

    /// Lines are dropdown (visible in the menu) unless `dropdown=false`.
    pub fn dropdown(&self) -> bool {
        self.flag("dropdown", true)
    }

    pub fn trim(&self) -> bool {
        self.flag("trim", false)
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Split a raw line at the first unescaped `|`. `\|` is a literal pipe
/// in the display text.
fn split_display(line: &str) -> (String, Option<&str>) {
    let mut text = String::with_capacity(line.len());
    let mut iter = line.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        match c {
            '\\' if matches!(iter.peek(), Some((_, '|'))) => {
                iter.next();
                text.push('|');
            }
            '|' => return (text, Some(&line[i + 1..])),
            _ => text.push(c),
        }
    }
    (text, None)
}

/// Tokenize the directive section. On a malformed token, returns the
/// directives parsed so far plus the byte offset where parsing stopped.
#[allow(clippy::type_complexity)]
fn tokenize(raw: &str) -> Result<Vec<Directive>, (Vec<Directive>, usize)> {
    let mut directives = Vec::new();
    let n = raw.len();
    let mut i = 0usize;

    while i < n {
        let c = match raw[i..].chars().next() {
            Some(c) => c,
            None => break,
        };
        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }

        let token_start = i;

        // Key runs to `=`, whitespace, or end of line.
        let mut key_end = i;
        while key_end < n {
            let kc = raw[key_end..].chars().next().unwrap_or(' ');
            if kc == '=' || kc.is_whitespace() {
                break;
            }
            key_end += kc.len_utf8();
        }
        if key_end == token_start {
            // Token starts with '=': empty key.
            return Err((directives, token_start));
        }
        let key = raw[token_start..key_end].to_string();

        if key_end >= n || !raw[key_end..].starts_with('=') {
            // Bare key reads as a true flag.
            directives.push(Directive {
                key,
                value: DirectiveValue::Bool(true),
            });
            i = key_end;
            continue;
        }

        let mut vstart = key_end + 1;
        let (value_raw, next) = if raw[vstart..].starts_with('"') || raw[vstart..].starts_with('\'')
        {
            let quote = raw[vstart..].chars().next().unwrap_or('"');
            vstart += 1;
            match raw[vstart..].find(quote) {
                Some(rel) => (&raw[vstart..vstart + rel], vstart + rel + 1),
                // Unterminated quote.
                None => return Err((directives, token_start)),
            }
        } else {
            let mut vend = vstart;
            while vend < n {
                let vc = raw[vend..].chars().next().unwrap_or(' ');
                if vc.is_whitespace() {
                    break;
                }
                vend += vc.len_utf8();
            }
            (&raw[vstart..vend], vend)
        };

        directives.push(Directive {
            key,
            value: coerce(value_raw),
        });
        i = next;
    }

    Ok(directives)
}

/// Boolean-looking values become booleans, everything else is a string.
fn coerce(raw: &str) -> DirectiveValue {
    match raw {
        "true" | "1" => DirectiveValue::Bool(true),
        "false" | "0" => DirectiveValue::Bool(false),
        _ => DirectiveValue::Text(raw.to_string()),
    }
}

/// Quote a value for serialization if it cannot stand bare. The quote
/// character is picked by which one the value lacks; a value containing
/// both kinds plus whitespace has no quotable form and is emitted bare,
/// degrading locally on reparse.
fn quote_value(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.contains(char::is_whitespace)
        || s.starts_with('"')
        || s.starts_with('\'');
    if !needs_quoting {
        return s.to_string();
    }
    if !s.contains('"') {
        format!("\"{s}\"")
    } else if !s.contains('\'') {
        format!("'{s}'")
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
