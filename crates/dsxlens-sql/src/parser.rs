//! SQL parsing using sqlparser-rs
//!
//! Parses SQL fragments found in job properties into an AST.

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MsSqlDialect, PostgreSqlDialect};
use sqlparser::parser::{Parser, ParserError};
use dsxlens_core::{DialectConfig, UsageKind};

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect + Send + Sync>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Create a SQL parser for SQL Server (`[bracket]` identifiers)
    pub fn mssql() -> Self {
        Self {
            dialect: Box::new(MsSqlDialect {}),
        }
    }

    /// Create a SQL parser for PostgreSQL
    pub fn postgres() -> Self {
        Self {
            dialect: Box::new(PostgreSqlDialect {}),
        }
    }

    /// Create a parser from a dialect config
    ///
    /// Vertica has no dedicated dialect; its SQL is parsed as PostgreSQL.
    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        match dialect {
            DialectConfig::Mssql => Self::mssql(),
            DialectConfig::Vertica | DialectConfig::Postgres => Self::postgres(),
            DialectConfig::Ansi => Self::new(),
        }
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, SqlParseError> {
        match Parser::parse_sql(&*self.dialect, sql) {
            Ok(statements) => Ok(ParsedSql {
                sql: sql.to_string(),
                statements,
            }),
            Err(error) => Err(SqlParseError {
                sql: sql.to_string(),
                error,
            }),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// What a statement does with the relations it names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Query,
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    Other,
}

impl StatementKind {
    pub fn of(statement: &Statement) -> Self {
        match statement {
            Statement::Query(_) => Self::Query,
            Statement::Insert(_) => Self::Insert,
            Statement::Update { .. } => Self::Update,
            Statement::Delete(_) => Self::Delete,
            Statement::Merge { .. } => Self::Merge,
            Statement::Truncate { .. } => Self::Truncate,
            _ => Self::Other,
        }
    }

    /// Classify by leading keyword, for text that does not parse
    pub fn from_leading_keyword(sql: &str) -> Self {
        let keyword = sql
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|word| !word.is_empty())
            .unwrap_or_default()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" => Self::Query,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "TRUNCATE" => Self::Truncate,
            _ => Self::Other,
        }
    }

    /// Writes to its first relation
    pub fn is_dml(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete | Self::Merge | Self::Truncate)
    }

    /// Usage implied for a relation of this statement
    ///
    /// The first relation of a DML statement is its target; every other
    /// relation is read.
    pub fn usage_for(&self, first_relation: bool) -> Option<UsageKind> {
        match self {
            Self::Query => Some(UsageKind::Source),
            kind if kind.is_dml() && first_relation => Some(UsageKind::Target),
            kind if kind.is_dml() => Some(UsageKind::Source),
            _ => None,
        }
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    pub fn first_statement(&self) -> Option<&Statement> {
        self.statements.first()
    }

    pub fn is_select(&self) -> bool {
        matches!(self.first_statement(), Some(Statement::Query(_)))
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

/// SQL parsing error
#[derive(Debug, Clone, thiserror::Error)]
#[error("SQL parse error: {error}")]
pub struct SqlParseError {
    /// Original SQL string
    pub sql: String,

    /// Parser error from sqlparser
    pub error: ParserError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let parsed = parser.parse("SELECT ORDER_NO, AMOUNT FROM ERP.ORDERS WHERE AMOUNT > 0").unwrap();
        assert_eq!(parsed.statement_count(), 1);
        assert!(parsed.is_select());
    }

    #[test]
    fn parse_odbc_placeholders() {
        let parser = SqlParser::mssql();
        assert!(parser.parse("SELECT * FROM [ERP].[ORDERS] WHERE ORDER_DATE >= ?").is_ok());
    }

    #[test]
    fn parse_invalid_sql() {
        let parser = SqlParser::new();
        let error = parser.parse("SELECT FROM WHERE").unwrap_err();
        assert!(error.to_string().starts_with("SQL parse error"));
    }

    #[test]
    fn statement_kinds() {
        let parser = SqlParser::new();
        let parsed = parser.parse("DELETE FROM DW.FACT_ORDERS WHERE LOAD_DATE = CURRENT_DATE").unwrap();
        assert_eq!(StatementKind::of(&parsed.statements[0]), StatementKind::Delete);

        assert_eq!(StatementKind::from_leading_keyword("  insert into X values (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::from_leading_keyword("WITH a AS (SELECT 1) SELECT * FROM a"), StatementKind::Query);
        assert_eq!(StatementKind::from_leading_keyword("EXEC sp_who"), StatementKind::Other);

        assert_eq!(StatementKind::Insert.usage_for(true), Some(UsageKind::Target));
        assert_eq!(StatementKind::Insert.usage_for(false), Some(UsageKind::Source));
        assert_eq!(StatementKind::Other.usage_for(true), None);
    }

    #[test]
    fn dialects_from_config() {
        let sql = "SELECT id FROM erp.orders";
        for dialect in [DialectConfig::Mssql, DialectConfig::Vertica, DialectConfig::Postgres, DialectConfig::Ansi] {
            assert!(SqlParser::from_dialect(&dialect).parse(sql).is_ok());
        }
    }
}
