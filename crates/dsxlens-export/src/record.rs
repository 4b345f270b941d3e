//! Record tree model
//!
//! A parsed export is a tree of [`Record`]s. Every record and property keeps
//! the byte span it was parsed from, relative to the owning document's text,
//! so unmodified content can always be reproduced exactly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Delimiter around multi-line raw values
pub const RAW_DELIMITER: &str = "=+=+=+=";

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the span `delta` bytes towards the start of the text
    pub fn rebase(&self, delta: usize) -> Self {
        Self {
            start: self.start.saturating_sub(delta),
            end: self.end.saturating_sub(delta),
        }
    }

    /// The slice of `text` covered by this span (empty if out of range)
    pub fn slice<'t>(&self, text: &'t str) -> &'t str {
        text.get(self.start..self.end).unwrap_or_default()
    }
}

/// Value that cannot be written back in its original form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("raw value contains the block delimiter {RAW_DELIMITER}")]
    DelimiterInRaw,

    #[error("'{value}' is not a valid {expected} value")]
    WrongForm { value: String, expected: &'static str },
}

/// A property value
///
/// The variant records how the value was written in the export, so a
/// rewritten value can be encoded the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    /// Quoted string, escapes decoded
    String(String),

    /// Bare signed integer
    Integer(i64),

    /// Bare `true` / `false`
    Boolean(bool),

    /// `=+=+=+=` delimited block, kept verbatim
    Raw(String),
}

impl PropertyValue {
    /// Textual form of the value regardless of variant
    pub fn as_text(&self) -> String {
        match self {
            Self::String(s) | Self::Raw(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    /// Borrow string content (quoted or raw values only)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Raw(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, also accepting quoted digits (`"50"`)
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean content, also accepting `0`/`1` and `Y`/`N` flags
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "y" | "yes" => Some(true),
                "0" | "false" | "n" | "no" => Some(false),
                _ => None,
            },
            Self::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// A value of the same form carrying `text`
    pub fn with_text(&self, text: &str) -> Result<Self, EncodeError> {
        match self {
            Self::String(_) => Ok(Self::String(text.to_string())),
            Self::Raw(_) => Ok(Self::Raw(text.to_string())),
            Self::Integer(_) => text.trim().parse().map(Self::Integer).map_err(|_| EncodeError::WrongForm {
                value: text.to_string(),
                expected: "integer",
            }),
            Self::Boolean(_) => match text.trim() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(EncodeError::WrongForm {
                    value: text.to_string(),
                    expected: "boolean",
                }),
            },
        }
    }

    /// Encode the value as it appears in export text
    pub fn encode(&self) -> Result<String, EncodeError> {
        match self {
            Self::String(s) => Ok(format!("\"{}\"", escape(s))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Raw(s) => {
                if s.contains(RAW_DELIMITER) {
                    return Err(EncodeError::DelimiterInRaw);
                }
                Ok(format!("{RAW_DELIMITER}{s}{RAW_DELIMITER}"))
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Escape a string for a quoted value
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// A `name value` line inside a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,

    /// From the first byte of the name to the last byte of the value
    pub span: Span,

    /// The encoded value, including quotes or raw delimiters
    pub value_span: Span,

    /// 1-based line of the name
    pub line: usize,
}

/// A `BEGIN kind ... END kind` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: String,
    pub properties: Vec<Property>,
    pub children: Vec<Record>,

    /// From the start of the `BEGIN` line (indentation included) to the end of the `END` line
    pub span: Span,

    /// 1-based line of `BEGIN`
    pub line: usize,
}

impl Record {
    pub(crate) fn open(kind: String, start: usize, line: usize) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            children: Vec::new(),
            span: Span::new(start, start),
            line,
        }
    }

    /// First property with this name (case-insensitive)
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of the first property with this name (case-insensitive)
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.property(name).map(|p| &p.value)
    }

    /// Explicit `Identifier` of the record, if present
    pub fn identifier(&self) -> Option<&str> {
        self.value("Identifier").and_then(PropertyValue::as_str)
    }

    /// Child selected by one path step
    pub fn child(&self, step: &PathStep) -> Option<&Record> {
        self.children.iter().filter(|c| c.kind == step.kind).nth(step.index)
    }

    /// Descendant (or self, for the root path) at `path`
    pub fn find(&self, path: &RecordPath) -> Option<&Record> {
        path.steps().iter().try_fold(self, |record, step| record.child(step))
    }

    /// This record and all descendants in pre-order, with their paths relative to this record
    pub fn walk(&self) -> Vec<(RecordPath, &Record)> {
        let mut out = Vec::new();
        collect(self, RecordPath::root(), &mut out);
        out
    }

    /// Exact source text of this record
    pub fn source<'t>(&self, text: &'t str) -> &'t str {
        self.span.slice(text)
    }

    /// Shift every span `delta` bytes towards the start
    pub(crate) fn rebase(&mut self, delta: usize) {
        self.span = self.span.rebase(delta);
        for property in &mut self.properties {
            property.span = property.span.rebase(delta);
            property.value_span = property.value_span.rebase(delta);
        }
        for child in &mut self.children {
            child.rebase(delta);
        }
    }
}

fn collect<'r>(record: &'r Record, path: RecordPath, out: &mut Vec<(RecordPath, &'r Record)>) {
    out.push((path.clone(), record));

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for child in &record.children {
        let index = seen.entry(child.kind.as_str()).or_insert(0);
        collect(child, path.child(&child.kind, *index), out);
        *index += 1;
    }
}

/// One step of a record path: the `index`-th child of kind `kind`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathStep {
    pub kind: String,
    pub index: usize,
}

/// Stable address of a record inside a document
///
/// Each step counts earlier siblings of the same kind, so the path of a
/// record is unaffected by value edits elsewhere in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPath(Vec<PathStep>);

impl RecordPath {
    /// The document root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Path of a child of this record
    pub fn child(&self, kind: &str, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(PathStep {
            kind: kind.to_string(),
            index,
        });
        Self(steps)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// This path and all its ancestors, innermost first
    pub fn ancestors_or_self(&self) -> Vec<RecordPath> {
        (0..=self.0.len()).rev().map(|n| Self(self.0[..n].to_vec())).collect()
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        let rendered: Vec<String> = self.0.iter().map(|s| format!("{}[{}]", s.kind, s.index)).collect();
        write!(f, "{}", rendered.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record path step '{0}'")]
pub struct RecordPathError(pub String);

impl FromStr for RecordPath {
    type Err = RecordPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_matches('/');
        if s.is_empty() {
            return Ok(Self::root());
        }

        let mut steps = Vec::new();
        for part in s.split('/') {
            let (kind, rest) = part.split_once('[').ok_or_else(|| RecordPathError(part.to_string()))?;
            let index = rest
                .strip_suffix(']')
                .and_then(|i| i.parse().ok())
                .ok_or_else(|| RecordPathError(part.to_string()))?;
            if kind.is_empty() {
                return Err(RecordPathError(part.to_string()));
            }
            steps.push(PathStep {
                kind: kind.to_string(),
                index,
            });
        }
        Ok(Self(steps))
    }
}

impl Serialize for RecordPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_display_and_parse() {
        let path = RecordPath::root().child("DSRECORD", 2).child("DSSUBRECORD", 0);
        assert_eq!(path.to_string(), "DSRECORD[2]/DSSUBRECORD[0]");
        assert_eq!("DSRECORD[2]/DSSUBRECORD[0]".parse::<RecordPath>().unwrap(), path);
        assert_eq!(RecordPath::root().to_string(), "/");
        assert_eq!("/".parse::<RecordPath>().unwrap(), RecordPath::root());
        assert!("DSRECORD[x]".parse::<RecordPath>().is_err());
    }

    #[test]
    fn path_ancestors() {
        let path = RecordPath::root().child("A", 0).child("B", 1);
        let ancestors = path.ancestors_or_self();
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0], path);
        assert!(ancestors[2].is_root());
        assert_eq!(path.parent().unwrap().to_string(), "A[0]");
    }

    #[test]
    fn value_encoding_keeps_form() {
        let quoted = PropertyValue::String("a \"b\"\\c\n".into());
        assert_eq!(quoted.encode().unwrap(), r#""a \"b\"\\c\n""#);

        let raw = PropertyValue::Raw("\nSELECT 1\n".into());
        assert_eq!(raw.encode().unwrap(), "=+=+=+=\nSELECT 1\n=+=+=+=");
        assert_eq!(
            PropertyValue::Raw("x =+=+=+= y".into()).encode(),
            Err(EncodeError::DelimiterInRaw)
        );

        assert_eq!(PropertyValue::Integer(3).with_text("42").unwrap(), PropertyValue::Integer(42));
        assert!(PropertyValue::Integer(3).with_text("abc").is_err());
        assert_eq!(PropertyValue::Raw(String::new()).with_text("x").unwrap(), PropertyValue::Raw("x".into()));
    }

    #[test]
    fn value_flags() {
        assert_eq!(PropertyValue::String("1".into()).as_flag(), Some(true));
        assert_eq!(PropertyValue::Integer(0).as_flag(), Some(false));
        assert_eq!(PropertyValue::String("50".into()).as_integer(), Some(50));
        assert_eq!(PropertyValue::Boolean(true).as_text(), "true");
    }
}
