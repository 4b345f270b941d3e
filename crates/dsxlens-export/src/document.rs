//! Job documents and whole export files

use crate::lexer::{Lexer, TokenKind};
use crate::parser::{parse_block, parse_documents, ParseError};
use crate::record::{Property, PropertyValue, Record, RecordPath};
use dsxlens_core::content_hash;
use serde::Serialize;

/// One job definition, parsed from a single top-level block
///
/// Documents are immutable once parsed; edits produce a new document with
/// the next revision number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDocument {
    /// Job name (the document's identity)
    pub name: String,

    /// Exact text of the top-level block, including its line terminator
    pub text: String,

    /// Root record; spans are relative to `text`
    pub root: Record,

    /// SHA-256 of `text`, hex encoded
    pub hash: String,

    /// 0 for freshly parsed documents, +1 per applied revision
    pub revision: u64,

    /// Line of the `BEGIN` line in the file the document came from
    pub first_line: usize,
}

impl JobDocument {
    /// Parse text holding exactly one top-level block
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::parse_at(text, 1)
    }

    /// Re-parse edited text as the next revision of this document
    pub fn revise(&self, text: String) -> Result<Self, ParseError> {
        let mut document = Self::parse_at(&text, self.first_line)?;
        document.revision = self.revision + 1;
        Ok(document)
    }

    fn parse_at(text: &str, first_line: usize) -> Result<Self, ParseError> {
        let mut lexer = Lexer::at(text, 0, first_line);

        let begin = loop {
            match lexer.next() {
                Some(Ok(token)) if token.kind == TokenKind::Blank => continue,
                Some(Ok(token)) => break token,
                Some(Err(error)) => return Err(error),
                None => {
                    return Err(ParseError::UnexpectedToken {
                        found: "end of input".to_string(),
                        offset: text.len(),
                        line: first_line,
                    })
                }
            }
        };
        let line = begin.line;
        let (root, _) = parse_block(&mut lexer, begin)?;

        for token in lexer {
            let token = token?;
            if token.kind != TokenKind::Blank {
                return Err(ParseError::UnexpectedToken {
                    found: format!("{} after the document", token.describe()),
                    offset: token.start + token.indent,
                    line: token.line,
                });
            }
        }

        Self::from_block(text.to_string(), root, line, 0)
    }

    /// Build a document from a parsed block; `offset` is only used for error reporting
    pub(crate) fn from_block(text: String, root: Record, first_line: usize, offset: usize) -> Result<Self, ParseError> {
        let name = job_name(&root).ok_or_else(|| ParseError::MissingJobName {
            kind: root.kind.clone(),
            offset,
            line: first_line,
        })?;

        Ok(Self {
            name,
            hash: content_hash(&text),
            text,
            root,
            revision: 0,
            first_line,
        })
    }

    /// Record at `path`
    pub fn record_at(&self, path: &RecordPath) -> Option<&Record> {
        self.root.find(path)
    }

    /// Every record in pre-order with its path
    pub fn records(&self) -> Vec<(RecordPath, &Record)> {
        self.root.walk()
    }

    /// Exact source text of a record of this document
    pub fn source_of(&self, record: &Record) -> &str {
        record.source(&self.text)
    }

    /// Exact source text of a property of this document
    pub fn property_source(&self, property: &Property) -> &str {
        property.span.slice(&self.text)
    }

    /// Serialize the document (identical to the parsed text)
    pub fn to_text(&self) -> &str {
        &self.text
    }
}

/// Job name: `Identifier`, else `Name`, else the `Name` of the `ROOT` child record
fn job_name(root: &Record) -> Option<String> {
    let non_empty = |value: &PropertyValue| {
        let text = value.as_text();
        (!text.trim().is_empty()).then_some(text)
    };

    root.value("Identifier")
        .and_then(non_empty)
        .or_else(|| root.value("Name").and_then(non_empty))
        .or_else(|| {
            root.children
                .iter()
                .find(|child| child.identifier() == Some("ROOT"))
                .and_then(|child| child.value("Name"))
                .and_then(non_empty)
        })
}

/// Export header block (`BEGIN HEADER`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportHeader {
    pub record: Record,
    pub text: String,
}

impl ExportHeader {
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.record.value(name)
    }
}

/// A contiguous piece of an export file
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Blank lines between blocks
    Trivia(String),

    Header(ExportHeader),

    Job(JobDocument),

    /// A block that failed to parse, kept verbatim
    Invalid { text: String, error: ParseError },
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Self::Trivia(text) | Self::Invalid { text, .. } => text,
            Self::Header(header) => &header.text,
            Self::Job(document) => &document.text,
        }
    }
}

/// A whole export file as an ordered list of segments
///
/// Concatenating the segments reproduces the input byte for byte, including
/// headers, blank lines and blocks that failed to parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportFile {
    pub segments: Vec<Segment>,
}

impl ExportFile {
    pub fn parse(text: &str) -> Self {
        let mut stream = parse_documents(text);
        let mut segments = Vec::new();
        while let Some(segment) = stream.next_segment() {
            segments.push(segment);
        }
        Self { segments }
    }

    /// Load and parse a file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn to_text(&self) -> String {
        self.segments.iter().map(Segment::text).collect()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDocument> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Job(document) => Some(document),
            _ => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &ParseError> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Invalid { error, .. } => Some(error),
            _ => None,
        })
    }

    /// Last export header in the file
    pub fn header(&self) -> Option<&ExportHeader> {
        self.segments.iter().rev().find_map(|segment| match segment {
            Segment::Header(header) => Some(header),
            _ => None,
        })
    }

    pub fn job(&self, name: &str) -> Option<&JobDocument> {
        self.jobs().find(|document| document.name == name)
    }

    /// Swap in a new revision of job `name`; returns false when the job is not in this file
    pub fn replace_job(&mut self, name: &str, document: JobDocument) -> bool {
        for segment in &mut self.segments {
            if let Segment::Job(existing) = segment {
                if existing.name == name {
                    *existing = document;
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXPORT: &str = "BEGIN HEADER\r\n   CharacterSet \"CP949\"\r\nEND HEADER\r\n\r\nBEGIN DSJOB\r\n   Identifier \"J1\"\r\n   BEGIN DSRECORD\r\n      Identifier \"V0S1\"\r\n      SQL =+=+=+=\r\nSELECT  *\r\n  FROM ERP.ORDERS\r\n=+=+=+=\r\n   END DSRECORD\r\nEND DSJOB\r\nBEGIN DSJOB\r\n   Identifier \"BAD\r\nEND DSJOB\r\n\r\n";

    #[test]
    fn export_file_round_trips() {
        let file = ExportFile::parse(EXPORT);
        assert_eq!(file.to_text(), EXPORT);
        assert_eq!(file.jobs().count(), 1);
        assert_eq!(file.errors().count(), 1);
        assert!(file.header().is_some());
    }

    #[test]
    fn record_source_is_exact() {
        let file = ExportFile::parse(EXPORT);
        let job = file.job("J1").unwrap();
        let (path, record) = &job.records()[1];

        assert_eq!(path.to_string(), "DSRECORD[0]");
        assert!(job.source_of(record).starts_with("   BEGIN DSRECORD\r\n"));
        assert!(job.source_of(record).ends_with("   END DSRECORD"));

        let sql = record.property("sql").unwrap();
        assert_eq!(sql.value, PropertyValue::Raw("\r\nSELECT  *\r\n  FROM ERP.ORDERS\r\n".into()));
        assert_eq!(sql.line, 9);
    }

    #[test]
    fn job_name_resolution() {
        let by_name = JobDocument::parse("BEGIN DSJOB\n   Name \"N\"\nEND DSJOB\n").unwrap();
        assert_eq!(by_name.name, "N");

        let by_root = JobDocument::parse(
            "BEGIN DSJOB\n   BEGIN DSRECORD\n      Identifier \"ROOT\"\n      Name \"FROM_ROOT\"\n   END DSRECORD\nEND DSJOB\n",
        )
        .unwrap();
        assert_eq!(by_root.name, "FROM_ROOT");
    }

    #[test]
    fn revise_bumps_revision() {
        let doc = JobDocument::parse("BEGIN DSJOB\n   Identifier \"J\"\n   TableName \"A\"\nEND DSJOB\n").unwrap();
        assert_eq!(doc.revision, 0);
        let next = doc.revise(doc.text.replace("\"A\"", "\"B\"")).unwrap();
        assert_eq!(next.revision, 1);
        assert_ne!(next.hash, doc.hash);
        assert_eq!(doc.root.value("TableName"), Some(&PropertyValue::String("A".into())));
    }

    #[test]
    fn parse_rejects_trailing_blocks() {
        let result = JobDocument::parse("BEGIN A\n   Identifier \"x\"\nEND A\nBEGIN B\nEND B\n");
        assert!(matches!(result, Err(ParseError::UnexpectedToken { line: 4, .. })));
    }
}
