//! Recursive block parser and the multi-document stream
//!
//! An export file is a sequence of top-level blocks. `HEADER` blocks describe
//! the export itself; every other top-level block is one job document. A
//! malformed document never stops the stream: parsing resumes at the next
//! `BEGIN` line with the failed block's indentation.

use crate::document::{ExportHeader, JobDocument, Segment};
use crate::lexer::{indent_of, is_blank_line, line_bounds, Lexer, Token, TokenKind};
use crate::record::{Property, Record, Span};

/// Top-level block kind of an export header
pub const HEADER_KIND: &str = "HEADER";

/// Export text parsing error
///
/// Offsets are byte offsets and lines are 1-based, both relative to the
/// text that was being parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: block '{kind}' is never closed")]
    UnterminatedBlock { kind: String, offset: usize, line: usize },

    #[error("line {line}: 'END {found}' does not close 'BEGIN {expected}'")]
    MismatchedEnd {
        expected: String,
        found: String,
        offset: usize,
        line: usize,
    },

    #[error("line {line}: unterminated string")]
    UnterminatedString { offset: usize, line: usize },

    #[error("line {line}: unterminated raw block")]
    UnterminatedRaw { offset: usize, line: usize },

    #[error("line {line}: invalid escape sequence '\\{found}'")]
    InvalidEscape { found: char, offset: usize, line: usize },

    #[error("line {line}: unexpected {found}")]
    UnexpectedToken { found: String, offset: usize, line: usize },

    #[error("line {line}: block '{kind}' has no Identifier or Name")]
    MissingJobName { kind: String, offset: usize, line: usize },
}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            Self::UnterminatedBlock { offset, .. }
            | Self::MismatchedEnd { offset, .. }
            | Self::UnterminatedString { offset, .. }
            | Self::UnterminatedRaw { offset, .. }
            | Self::InvalidEscape { offset, .. }
            | Self::UnexpectedToken { offset, .. }
            | Self::MissingJobName { offset, .. } => *offset,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::UnterminatedBlock { line, .. }
            | Self::MismatchedEnd { line, .. }
            | Self::UnterminatedString { line, .. }
            | Self::UnterminatedRaw { line, .. }
            | Self::InvalidEscape { line, .. }
            | Self::UnexpectedToken { line, .. }
            | Self::MissingJobName { line, .. } => *line,
        }
    }
}

/// Parse one block whose `BEGIN` token has already been read
///
/// Returns the record (spans absolute in the lexer's text) and the offset of
/// the line after `END`.
pub(crate) fn parse_block(lexer: &mut Lexer<'_>, begin: Token) -> Result<(Record, usize), ParseError> {
    let kind = match begin.kind {
        TokenKind::Begin(kind) => kind,
        _ => {
            return Err(ParseError::UnexpectedToken {
                found: begin.describe(),
                offset: begin.start + begin.indent,
                line: begin.line,
            })
        }
    };

    let mut stack = vec![Record::open(kind, begin.start, begin.line)];

    while let Some(token) = lexer.next() {
        let token = token?;
        match token.kind {
            TokenKind::Blank => {}
            TokenKind::Begin(kind) => stack.push(Record::open(kind, token.start, token.line)),
            TokenKind::Property { name, value, value_span } => {
                if let Some(open) = stack.last_mut() {
                    open.properties.push(Property {
                        name,
                        value,
                        span: Span::new(token.start + token.indent, value_span.end),
                        value_span,
                        line: token.line,
                    });
                }
            }
            TokenKind::End(kind) => {
                let Some(mut record) = stack.pop() else {
                    break;
                };
                if record.kind != kind {
                    return Err(ParseError::MismatchedEnd {
                        expected: record.kind,
                        found: kind,
                        offset: token.start + token.indent,
                        line: token.line,
                    });
                }
                record.span.end = token.end;

                match stack.last_mut() {
                    Some(parent) => parent.children.push(record),
                    None => return Ok((record, token.next)),
                }
            }
        }
    }

    let (kind, offset, line) = stack
        .last()
        .map(|open| (open.kind.clone(), open.span.start, open.line))
        .unwrap_or_default();
    Err(ParseError::UnterminatedBlock { kind, offset, line })
}

/// Lazy iterator over the job documents of an export text
///
/// Yields one `Result` per top-level job block. Export headers are not
/// yielded; the last one seen is available through [`DocumentStream::header`].
/// The stream is finite; to restart, call [`parse_documents`] again.
pub struct DocumentStream<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    header: Option<ExportHeader>,
}

/// Parse every job document in `text`
pub fn parse_documents(text: &str) -> DocumentStream<'_> {
    DocumentStream {
        text,
        pos: 0,
        line: 1,
        header: None,
    }
}

impl<'a> DocumentStream<'a> {
    /// Last export header seen so far
    pub fn header(&self) -> Option<&ExportHeader> {
        self.header.as_ref()
    }

    fn advance_to(&mut self, next: usize) {
        self.line += self.text[self.pos..next].matches('\n').count();
        self.pos = next;
    }

    /// Next piece of the file: trivia, a header, a job or an invalid block
    pub(crate) fn next_segment(&mut self) -> Option<Segment> {
        let text = self.text;
        if self.pos >= text.len() {
            return None;
        }

        let trivia_start = self.pos;
        let mut end = self.pos;
        while end < text.len() && is_blank_line(text, end) {
            end = line_bounds(text, end).1;
        }
        if end > trivia_start {
            self.advance_to(end);
            return Some(Segment::Trivia(text[trivia_start..end].to_string()));
        }

        Some(self.top_level_block())
    }

    fn top_level_block(&mut self) -> Segment {
        let text = self.text;
        let start = self.pos;
        let line = self.line;
        let mut lexer = Lexer::at(text, start, line);

        let parsed = match lexer.next() {
            Some(Ok(token)) => parse_block(&mut lexer, token),
            Some(Err(error)) => Err(error),
            None => Err(ParseError::UnexpectedToken {
                found: "end of input".to_string(),
                offset: start,
                line,
            }),
        };

        match parsed {
            Ok((mut root, next)) => {
                let block = text[start..next].to_string();
                root.rebase(start);
                self.advance_to(next);

                if root.kind == HEADER_KIND {
                    tracing::debug!(line, "parsed export header");
                    let header = ExportHeader { record: root, text: block };
                    self.header = Some(header.clone());
                    return Segment::Header(header);
                }

                match JobDocument::from_block(block.clone(), root, line, start) {
                    Ok(document) => {
                        tracing::debug!(job = %document.name, line, "parsed job document");
                        Segment::Job(document)
                    }
                    Err(error) => {
                        tracing::warn!(%error, "skipping job block");
                        Segment::Invalid { text: block, error }
                    }
                }
            }
            Err(error) => {
                let resume = self.resync_point(&error, start);
                tracing::warn!(%error, resume_line = self.line + text[start..resume].matches('\n').count(), "skipping malformed block");
                self.advance_to(resume);
                Segment::Invalid {
                    text: text[start..resume].to_string(),
                    error,
                }
            }
        }
    }

    /// Offset of the next `BEGIN` line with the failed block's indentation
    fn resync_point(&self, error: &ParseError, start: usize) -> usize {
        let text = self.text;
        let (block_line_end, _) = line_bounds(text, start);
        let indent = indent_of(&text[start..block_line_end]);

        let failure = error.offset().clamp(start, text.len());
        let line_start = text[..failure].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let mut pos = line_bounds(text, line_start.max(start)).1;

        while pos < text.len() {
            let (content_end, next) = line_bounds(text, pos);
            let content = &text[pos..content_end];
            if indent_of(content) == indent && content[indent..].starts_with("BEGIN ") {
                return pos;
            }
            pos = next;
        }
        text.len()
    }
}

impl<'a> Iterator for DocumentStream<'a> {
    type Item = Result<JobDocument, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_segment()? {
                Segment::Trivia(_) | Segment::Header(_) => continue,
                Segment::Job(document) => return Some(Ok(document)),
                Segment::Invalid { error, .. } => return Some(Err(error)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PropertyValue;
    use pretty_assertions::assert_eq;

    const TWO_JOBS: &str = "\
BEGIN HEADER
   CharacterSet \"CP949\"
   ServerName \"ETLSRV01\"
END HEADER
BEGIN DSJOB
   Identifier \"LOAD_ORDERS\"
   BEGIN DSRECORD
      Identifier \"ROOT\"
      Name \"LOAD_ORDERS\"
   END DSRECORD
END DSJOB
BEGIN DSJOB
   Identifier \"LOAD_ITEMS\"
END DSJOB
";

    #[test]
    fn parses_jobs_and_header() {
        let mut stream = parse_documents(TWO_JOBS);
        let jobs: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "LOAD_ORDERS");
        assert_eq!(jobs[1].name, "LOAD_ITEMS");
        assert_eq!(jobs[1].first_line, 12);

        let header = stream.header().unwrap();
        assert_eq!(header.record.value("ServerName"), Some(&PropertyValue::String("ETLSRV01".into())));
    }

    #[test]
    fn mismatched_end_is_reported() {
        let text = "BEGIN DSJOB\n   Identifier \"J\"\n   BEGIN DSRECORD\n   END DSJOB\nEND DSJOB\n";
        let results: Vec<_> = parse_documents(text).collect();
        assert!(matches!(
            &results[0],
            Err(ParseError::MismatchedEnd { expected, found, line: 4, .. })
                if expected == "DSRECORD" && found == "DSJOB"
        ));
    }

    #[test]
    fn recovers_at_next_block() {
        let text = "\
BEGIN DSJOB
   Identifier \"BROKEN\"
   Description \"never closed
END DSJOB
BEGIN DSJOB
   Identifier \"GOOD\"
END DSJOB
";
        let results: Vec<_> = parse_documents(text).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ParseError::UnterminatedString { line: 3, .. })));
        assert_eq!(results[1].as_ref().unwrap().name, "GOOD");
    }

    #[test]
    fn unterminated_block_at_end_of_input() {
        let results: Vec<_> = parse_documents("BEGIN DSJOB\n   Identifier \"J\"\n").collect();
        assert!(matches!(
            &results[0],
            Err(ParseError::UnterminatedBlock { kind, line: 1, .. }) if kind == "DSJOB"
        ));
    }

    #[test]
    fn missing_job_name() {
        let results: Vec<_> = parse_documents("BEGIN DSJOB\n   DateModified \"2024-01-01\"\nEND DSJOB\n").collect();
        assert!(matches!(results[0], Err(ParseError::MissingJobName { .. })));
    }

    #[test]
    fn stray_top_level_property() {
        let text = "Orphan \"x\"\nBEGIN DSJOB\n   Identifier \"J\"\nEND DSJOB\n";
        let results: Vec<_> = parse_documents(text).collect();
        assert!(matches!(results[0], Err(ParseError::UnexpectedToken { line: 1, .. })));
        assert_eq!(results[1].as_ref().unwrap().name, "J");
    }

    #[test]
    fn stream_is_restartable() {
        let first: Vec<_> = parse_documents(TWO_JOBS).map(|d| d.unwrap().name).collect();
        let second: Vec<_> = parse_documents(TWO_JOBS).map(|d| d.unwrap().name).collect();
        assert_eq!(first, second);
    }
}
