//! Log message templates.
//!
//! A template substitutes `{name}` and `{name:format-spec}` placeholders
//! from the same variable bindings the expressions see. `{{` and `}}`
//! escape literal braces. The format spec is `[width][.precision]` and
//! applies to numbers; applying it to anything else degrades to the raw
//! value representation instead of failing the tick.
//!
//! Templates are parsed at load time so unclosed or malformed placeholders
//! are configuration errors, not runtime surprises.

use super::{EvalError, ParseError};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, spec: Option<FormatSpec> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatSpec {
    width: Option<usize>,
    precision: Option<usize>,
}

/// A parsed log template.
#[derive(Debug, Clone)]
pub struct LogTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl LogTemplate {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    if chars.peek().map(|&(_, c)| c) == Some('{') {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_placeholder(source, pos, &mut chars)?);
                }
                '}' => {
                    if chars.peek().map(|&(_, c)| c) == Some('}') {
                        chars.next();
                        literal.push('}');
                        continue;
                    }
                    return Err(ParseError {
                        message: "unmatched '}'".to_string(),
                        position: pos,
                    });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Render against the bindings. A missing variable is an error (the
    /// caller skips the log line); a format spec that does not apply to the
    /// value degrades to the raw representation.
    pub fn render(&self, bindings: &HashMap<String, Value>) -> Result<String, EvalError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, spec } => {
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| EvalError::Unbound(name.clone()))?;
                    out.push_str(&format_value(value, *spec));
                }
            }
        }
        Ok(out)
    }

    /// Variables referenced by the template, for load-time checking.
    pub fn variables(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder { name, .. } => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn parse_placeholder(
    source: &str,
    start: usize,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<Segment, ParseError> {
    let mut name = String::new();
    let mut spec_text: Option<String> = None;

    for (pos, ch) in chars.by_ref() {
        match ch {
            '}' => {
                if name.is_empty() {
                    return Err(ParseError {
                        message: "empty placeholder".to_string(),
                        position: start,
                    });
                }
                let spec = match spec_text {
                    None => None,
                    Some(text) => Some(parse_spec(&text, pos)?),
                };
                return Ok(Segment::Placeholder { name, spec });
            }
            ':' if spec_text.is_none() => spec_text = Some(String::new()),
            _ => match &mut spec_text {
                Some(text) => text.push(ch),
                None => {
                    if ch.is_alphanumeric() || ch == '_' {
                        name.push(ch);
                    } else {
                        return Err(ParseError {
                            message: format!("invalid character '{}' in placeholder", ch),
                            position: pos,
                        });
                    }
                }
            },
        }
    }
    Err(ParseError {
        message: format!("unclosed placeholder: {}", &source[start..]),
        position: start,
    })
}

/// Spec grammar: `[width][.precision]`, digits only.
fn parse_spec(text: &str, position: usize) -> Result<FormatSpec, ParseError> {
    let (width_text, precision_text) = match text.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (text, None),
    };
    let parse_digits = |digits: &str| -> Result<Option<usize>, ParseError> {
        if digits.is_empty() {
            return Ok(None);
        }
        digits.parse::<usize>().map(Some).map_err(|_| ParseError {
            message: format!("invalid format spec '{}'", text),
            position,
        })
    };
    let width = parse_digits(width_text)?;
    let precision = match precision_text {
        Some(p) => {
            let parsed = parse_digits(p)?;
            if parsed.is_none() {
                return Err(ParseError {
                    message: format!("invalid format spec '{}'", text),
                    position,
                });
            }
            parsed
        }
        None => None,
    };
    Ok(FormatSpec { width, precision })
}

fn format_value(value: &Value, spec: Option<FormatSpec>) -> String {
    match spec {
        Some(spec) => match value.as_f64() {
            Some(x) => {
                let precision = spec.precision;
                let width = spec.width;
                match (width, precision) {
                    (Some(w), Some(p)) => format!("{:w$.p$}", x, w = w, p = p),
                    (Some(w), None) => format!("{:w$}", x, w = w),
                    (None, Some(p)) => format!("{:.p$}", x, p = p),
                    (None, None) => raw(value),
                }
            }
            // Spec on a non-numeric value: degrade to the raw representation.
            None => raw(value),
        },
        None => raw(value),
    }
}

fn raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
