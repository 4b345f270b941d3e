//! Line-oriented tokenizer for export text
//!
//! Each token is one logical line: a blank line, `BEGIN kind`, `END kind` or
//! a `name value` property. Raw values may span several physical lines.

use crate::parser::ParseError;
use crate::record::{PropertyValue, Span, RAW_DELIMITER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Blank,
    Begin(String),
    End(String),
    Property {
        name: String,
        value: PropertyValue,
        value_span: Span,
    },
}

/// One logical line of export text
///
/// Offsets are absolute within the text handed to the [`Lexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,

    /// Bytes of leading whitespace
    pub indent: usize,

    /// Offset of the first byte of the line
    pub start: usize,

    /// Offset just past the content (line terminator excluded)
    pub end: usize,

    /// Offset of the following line
    pub next: usize,

    /// 1-based line number of the first line
    pub line: usize,
}

impl Token {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Blank => "blank line".to_string(),
            TokenKind::Begin(kind) => format!("BEGIN {kind}"),
            TokenKind::End(kind) => format!("END {kind}"),
            TokenKind::Property { name, .. } => format!("property '{name}'"),
        }
    }
}

/// Tokenizer over export text
pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self::at(text, 0, 1)
    }

    /// Start at byte `pos`, which must be the beginning of line `line`
    pub fn at(text: &'a str, pos: usize, line: usize) -> Self {
        Self { text, pos, line }
    }

    /// Current `(offset, line)`
    pub fn position(&self) -> (usize, usize) {
        (self.pos, self.line)
    }

    fn advance_to(&mut self, next: usize) {
        self.line += self.text[self.pos..next].matches('\n').count();
        self.pos = next;
    }

    fn lex_line(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let line = self.line;
        let (content_end, next) = line_bounds(self.text, start);
        let content = &self.text[start..content_end];
        let indent = indent_of(content);
        let rest = content[indent..].trim_end();

        let mut token = Token {
            kind: TokenKind::Blank,
            indent,
            start,
            end: content_end,
            next,
            line,
        };

        if rest.is_empty() {
            self.advance_to(next);
            return Ok(token);
        }

        if let Some(kind) = rest.strip_prefix("BEGIN ") {
            token.kind = TokenKind::Begin(word(kind.trim(), start + indent, line)?);
            self.advance_to(next);
            return Ok(token);
        }

        if let Some(kind) = rest.strip_prefix("END ") {
            token.kind = TokenKind::End(word(kind.trim(), start + indent, line)?);
            self.advance_to(next);
            return Ok(token);
        }

        let name_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let name = word(&rest[..name_len], start + indent, line)?;
        let after_name = &rest[name_len..];
        let value_start = start + indent + name_len + (after_name.len() - after_name.trim_start().len());

        if after_name.trim().is_empty() {
            return Err(ParseError::UnexpectedToken {
                found: format!("property '{name}' without a value"),
                offset: start + indent,
                line,
            });
        }

        let value_text = &self.text[value_start..content_end];

        let (value, value_end, token_end, token_next) = if value_text.starts_with('"') {
            let (decoded, value_end) = decode_string(self.text, value_start, content_end, line)?;
            (PropertyValue::String(decoded), value_end, content_end, next)
        } else if value_text.starts_with(RAW_DELIMITER) {
            let body_start = value_start + RAW_DELIMITER.len();
            let close = self.text[body_start..]
                .find(RAW_DELIMITER)
                .map(|i| body_start + i)
                .ok_or(ParseError::UnterminatedRaw {
                    offset: value_start,
                    line,
                })?;
            let value_end = close + RAW_DELIMITER.len();
            let (close_end, close_next) = line_bounds(self.text, value_end);
            (
                PropertyValue::Raw(self.text[body_start..close].to_string()),
                value_end,
                close_end,
                close_next,
            )
        } else {
            let bare = value_text.trim_end();
            let value = match bare {
                "true" => PropertyValue::Boolean(true),
                "false" => PropertyValue::Boolean(false),
                other => other.parse().map(PropertyValue::Integer).map_err(|_| ParseError::UnexpectedToken {
                    found: format!("bare value '{other}'"),
                    offset: value_start,
                    line,
                })?,
            };
            (value, value_start + bare.len(), content_end, next)
        };

        let trailing = &self.text[value_end..token_end];
        if !trailing.trim().is_empty() {
            return Err(ParseError::UnexpectedToken {
                found: format!("'{}' after value", trailing.trim()),
                offset: value_end,
                line: line + self.text[start..value_end].matches('\n').count(),
            });
        }

        token.kind = TokenKind::Property {
            name,
            value,
            value_span: Span::new(value_start, value_end),
        };
        token.end = value_end;
        token.next = token_next;
        self.advance_to(token_next);

        Ok(token)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }

        let result = self.lex_line();
        if result.is_err() {
            // Skip the offending line so iteration always terminates
            let (_, next) = line_bounds(self.text, self.pos);
            self.advance_to(next);
        }
        Some(result)
    }
}

/// `(content_end, next_line_start)` for the line containing `from`
///
/// `content_end` excludes a trailing `\r\n` or `\n`.
pub fn line_bounds(text: &str, from: usize) -> (usize, usize) {
    match text[from..].find('\n') {
        Some(i) => {
            let newline = from + i;
            let content_end = if newline > from && text.as_bytes()[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            (content_end, newline + 1)
        }
        None => {
            let end = if text.ends_with('\r') && text.len() > from { text.len() - 1 } else { text.len() };
            (end, text.len())
        }
    }
}

/// Bytes of leading spaces and tabs
pub fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Whether the line starting at `from` holds only whitespace
pub fn is_blank_line(text: &str, from: usize) -> bool {
    let (end, _) = line_bounds(text, from);
    text[from..end].trim().is_empty()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '$' | '#' | '@')
}

fn word(s: &str, offset: usize, line: usize) -> Result<String, ParseError> {
    if s.is_empty() || !s.chars().all(is_word_char) {
        return Err(ParseError::UnexpectedToken {
            found: format!("'{s}'"),
            offset,
            line,
        });
    }
    Ok(s.to_string())
}

/// Decode a quoted string starting at `open` (the quote); returns the value and the offset past the closing quote
fn decode_string(text: &str, open: usize, limit: usize, line: usize) -> Result<(String, usize), ParseError> {
    let body_start = open + 1;
    let mut out = String::new();
    let mut chars = text[body_start..limit].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, body_start + i + 1)),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, 'n')) => out.push('\n'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, 't')) => out.push('\t'),
                Some((j, other)) => {
                    return Err(ParseError::InvalidEscape {
                        found: other,
                        offset: body_start + j - 1,
                        line,
                    })
                }
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(ParseError::UnterminatedString { offset: open, line })
}
