//! Assignment expressions.
//!
//! An assignment expression names a location inside a structured value, e.g.
//! `user.addresses[0].city` or `settings["max-items"]`. Expressions are parsed
//! once, compiled into a setter closure, and cached per `(type, expression)`
//! pair so repeated assignments skip both steps.
//!
//! Setters operate on `serde_json::Value`; typed targets go through serde
//! (see [`ScriptRuntime::assign`](crate::ScriptRuntime::assign)).
//!
//! Missing objects along the path are created. Arrays grow only by appending
//! at exactly their current length.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cache::ScriptCaches;
use crate::error::ScriptError;

/// One step of an assignment path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `.name` or `["name"]`
    Field(String),
    /// `[3]`
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, ".{}", name),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A parsed assignment expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignExpression {
    text: String,
    segments: Vec<PathSegment>,
}

impl AssignExpression {
    /// Parses expression text.
    ///
    /// ```
    /// use quill::assign::{AssignExpression, PathSegment};
    ///
    /// let expr = AssignExpression::parse("items[2].tags[\"new\"]").unwrap();
    /// assert_eq!(expr.segments(), &[
    ///     PathSegment::Field("items".into()),
    ///     PathSegment::Index(2),
    ///     PathSegment::Field("tags".into()),
    ///     PathSegment::Field("new".into()),
    /// ]);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let text = text.trim();
        let mut parser = Parser {
            text,
            chars: text.char_indices().peekable(),
        };
        let segments = parser.parse()?;
        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }

    /// The trimmed source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed path segments; never empty.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::InvalidExpression {
            expression: self.text.to_string(),
            message: message.into(),
        }
    }

    fn parse(&mut self) -> Result<Vec<PathSegment>, ScriptError> {
        let mut segments = vec![PathSegment::Field(self.identifier()?)];
        while let Some(&(pos, c)) = self.chars.peek() {
            match c {
                '.' => {
                    self.chars.next();
                    segments.push(PathSegment::Field(self.identifier()?));
                }
                '[' => {
                    self.chars.next();
                    segments.push(self.indexer()?);
                }
                other => {
                    return Err(self.error(format!("unexpected `{}` at {}", other, pos)));
                }
            }
        }
        Ok(segments)
    }

    fn identifier(&mut self) -> Result<String, ScriptError> {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            let valid = if ident.is_empty() {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        if ident.is_empty() {
            Err(self.error("expected identifier"))
        } else {
            Ok(ident)
        }
    }

    fn indexer(&mut self) -> Result<PathSegment, ScriptError> {
        let segment = match self.chars.peek().map(|&(_, c)| c) {
            Some(quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut key = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => key.push(c),
                        None => return Err(self.error("unterminated string key")),
                    }
                }
                PathSegment::Field(key)
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    self.chars.next();
                }
                let index = digits
                    .parse()
                    .map_err(|_| self.error(format!("index `{}` out of range", digits)))?;
                PathSegment::Index(index)
            }
            _ => return Err(self.error("expected index or quoted key after `[`")),
        };
        match self.chars.next() {
            Some((_, ']')) => Ok(segment),
            _ => Err(self.error("expected `]`")),
        }
    }
}

type Setter = dyn Fn(&mut Value, Value) -> Result<(), ScriptError> + Send + Sync;

/// A setter compiled from an [`AssignExpression`] for one target type.
pub struct CompiledAssign {
    type_name: String,
    expression: Arc<AssignExpression>,
    setter: Box<Setter>,
}

impl CompiledAssign {
    /// Compiles a setter for `expression`.
    pub fn compile(type_name: impl Into<String>, expression: Arc<AssignExpression>) -> Self {
        let segments = expression.segments().to_vec();
        let text = expression.text().to_string();
        let setter = move |target: &mut Value, value: Value| -> Result<(), ScriptError> {
            set_path(target, &segments, value).map_err(|message| ScriptError::Assign {
                expression: text.clone(),
                message,
            })
        };
        Self {
            type_name: type_name.into(),
            expression,
            setter: Box::new(setter),
        }
    }

    /// Type the setter was compiled for.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The expression the setter was compiled from.
    pub fn expression(&self) -> &AssignExpression {
        &self.expression
    }

    /// Writes `value` at the compiled location inside `target`.
    pub fn apply(&self, target: &mut Value, value: Value) -> Result<(), ScriptError> {
        (self.setter)(target, value)
    }
}

impl fmt::Debug for CompiledAssign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAssign")
            .field("type_name", &self.type_name)
            .field("expression", &self.expression.text())
            .finish_non_exhaustive()
    }
}

fn set_path(target: &mut Value, segments: &[PathSegment], value: Value) -> Result<(), String> {
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty path".to_string());
    };

    let mut current = target;
    for (i, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(segments[i + 1], PathSegment::Index(_));
        current = step(current, segment, next_is_index)?;
    }

    match last {
        PathSegment::Field(name) => {
            as_object(current, name)?.insert(name.clone(), value);
        }
        PathSegment::Index(index) => {
            let items = as_array(current, *index)?;
            if *index == items.len() {
                items.push(value);
            } else {
                items[*index] = value;
            }
        }
    }
    Ok(())
}

fn step<'v>(
    current: &'v mut Value,
    segment: &PathSegment,
    next_is_index: bool,
) -> Result<&'v mut Value, String> {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    match segment {
        PathSegment::Field(name) => {
            let slot = as_object(current, name)?
                .entry(name.clone())
                .or_insert(Value::Null);
            if slot.is_null() {
                *slot = empty();
            }
            Ok(slot)
        }
        PathSegment::Index(index) => {
            let items = as_array(current, *index)?;
            if *index == items.len() {
                items.push(empty());
            }
            let slot = &mut items[*index];
            if slot.is_null() {
                *slot = empty();
            }
            Ok(slot)
        }
    }
}

fn as_object<'v>(value: &'v mut Value, field: &str) -> Result<&'v mut Map<String, Value>, String> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "cannot set field `{}` on {}",
            field,
            kind_name(other)
        )),
    }
}

fn as_array(value: &mut Value, index: usize) -> Result<&mut Vec<Value>, String> {
    if value.is_null() {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => {
            if index <= items.len() {
                Ok(items)
            } else {
                Err(format!(
                    "index {} out of bounds for array of length {}",
                    index,
                    items.len()
                ))
            }
        }
        other => Err(format!("cannot index {} with [{}]", kind_name(other), index)),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Returns the compiled setter for `(type_name, expression)`, compiling it on
/// first use.
///
/// Parsed expressions are shared through the token cache, so the same
/// expression text compiled for different types is parsed once.
pub fn compile_cached(
    caches: &ScriptCaches,
    type_name: &str,
    expression: &str,
) -> Result<Arc<CompiledAssign>, ScriptError> {
    let type_name = type_name.trim();
    let expression = expression.trim();
    if type_name.is_empty() {
        return Err(ScriptError::invalid_argument("type", "target type is required"));
    }
    if expression.is_empty() {
        return Err(ScriptError::invalid_argument(
            "expression",
            "expression is required",
        ));
    }

    let key = (type_name.to_string(), expression.to_string());
    if let Some(compiled) = caches.assignments().get(&key) {
        return Ok(compiled.value().clone());
    }

    let cached = caches.tokens().get(expression).map(|entry| entry.value().clone());
    let parsed = match cached {
        Some(parsed) => parsed,
        None => {
            let parsed = Arc::new(AssignExpression::parse(expression)?);
            caches.tokens().insert(Arc::from(expression), parsed.clone());
            parsed
        }
    };

    tracing::trace!(type_name, expression, "compiling assignment");
    let compiled = Arc::new(CompiledAssign::compile(type_name, parsed));
    caches.assignments().insert(key, compiled.clone());
    Ok(compiled)
}
