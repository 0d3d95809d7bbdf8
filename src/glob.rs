use crate::error::DiscoveryError;
use regex::Regex;
use std::fmt;

/// A shell-style wildcard pattern, compiled once.
///
/// Supports `*`, `?`, `[...]` and `[!...]`. The pattern has to match the
/// whole input and is case sensitive; callers normalize case on both sides.
#[derive(Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, DiscoveryError> {
        let regex = Regex::new(&translate(pattern)).map_err(|source| {
            DiscoveryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobPattern").field(&self.source).finish()
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Turns a glob into an anchored regex. An unterminated `[` is a literal.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }
                out.push_str(&class(&chars[i..j]));
                i = j + 1;
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push_str(")$");
    out
}

fn class(body: &[char]) -> String {
    let mut out = String::from("[");
    let mut body = body;
    if body.first() == Some(&'!') {
        out.push('^');
        body = &body[1..];
    }
    let mut i = 0;
    while i < body.len() {
        push_class_char(&mut out, body[i]);
        // `x-y` is a range; a `-` with nothing after it is literal.
        if i + 2 < body.len() && body[i + 1] == '-' {
            out.push('-');
            push_class_char(&mut out, body[i + 2]);
            i += 3;
        } else {
            i += 1;
        }
    }
    out.push(']');
    out
}

/// Pushes a literal class member. `-` is always escaped, so `--` never
/// reads as a regex set difference.
fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '&' | '~' | '^' | '-') {
        out.push('\\');
    }
    out.push(c);
}
