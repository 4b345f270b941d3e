//! Reference extraction from SQL fragments
//!
//! Parsing is attempted first; relations then come straight from the AST.
//! Job SQL often carries job parameters or vendor syntax the parser rejects,
//! in which case a keyword-anchored token scan is used instead.

use crate::parser::{ParsedSql, SqlParser, StatementKind};
use dsxlens_core::{DialectConfig, PhysicalReference, UsageKind};
use regex::Regex;
use sqlparser::ast::{visit_expressions, visit_relations, Expr, Ident, ObjectName, Statement};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::LazyLock;

const IDENT: &str = r#"(?:\[[^\]\r\n]+\]|"[^"\r\n]+"|`[^`\r\n]+`|[A-Za-z_#@][A-Za-z0-9_$#@]*)"#;

static TABLE_POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:FROM|JOIN|INTO|UPDATE|TABLE)\s+({IDENT}(?:\s*\.\s*{IDENT}){{0,2}})"
    ))
    .expect("table position pattern is valid")
});

static THREE_PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({IDENT})\.({IDENT})\.({IDENT})")).expect("three-part name pattern is valid")
});

static NAME_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENT).expect("identifier pattern is valid"));

const RESERVED: &[&str] = &["SELECT", "WHERE", "SET", "VALUES", "ON", "AS", "WITH", "LATERAL"];

/// How references were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMethod {
    /// From a parsed AST
    Parsed,

    /// From the keyword token scan
    TokenScan,
}

/// A physical object named in SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlReference {
    pub reference: PhysicalReference,

    /// Usage implied by the statement, if any
    pub usage: Option<UsageKind>,
}

/// Result of scanning one SQL fragment
#[derive(Debug, Clone, PartialEq)]
pub struct SqlScan {
    /// References in order of appearance, without duplicates
    pub references: Vec<SqlReference>,

    /// Kind of the first statement
    pub statement: StatementKind,

    pub method: ScanMethod,
}

impl SqlScan {
    /// Table references (column references excluded)
    pub fn tables(&self) -> impl Iterator<Item = &PhysicalReference> {
        self.references
            .iter()
            .map(|r| &r.reference)
            .filter(|r| r.column.is_none())
    }

    /// Whether the SQL names `table` (schema-qualified, or unqualified when `allow_unqualified`)
    pub fn mentions_table(&self, table: &PhysicalReference, allow_unqualified: bool) -> bool {
        self.references.iter().any(|r| {
            r.reference.table_key() == table.table_key()
                && (r.reference.schema_key() == table.schema_key()
                    || (allow_unqualified && !r.reference.is_qualified()))
        })
    }

    fn push(&mut self, reference: PhysicalReference, usage: Option<UsageKind>) {
        let candidate = SqlReference { reference, usage };
        if !self.references.contains(&candidate) {
            self.references.push(candidate);
        }
    }
}

/// Scanner for SQL fragments
#[derive(Default)]
pub struct SqlScanner {
    parser: SqlParser,
}

impl SqlScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        Self {
            parser: SqlParser::from_dialect(dialect),
        }
    }

    /// Extract the physical objects a SQL fragment refers to
    ///
    /// Never fails: unparseable text falls back to the token scan.
    pub fn scan(&self, sql: &str) -> SqlScan {
        match self.parser.parse(sql) {
            Ok(parsed) if parsed.statement_count() > 0 => scan_ast(&parsed),
            Ok(_) => token_scan(sql),
            Err(error) => {
                tracing::debug!(%error, "falling back to token scan");
                token_scan(sql)
            }
        }
    }
}

/// Table reference from the parts of a dotted name
///
/// `DB.dbo.T` names table `T` in `DB`; other three-part names drop the
/// leading database part.
pub fn table_reference(parts: &[String]) -> Option<PhysicalReference> {
    match parts {
        [] => None,
        [table] => Some(PhysicalReference::unqualified(table)),
        [schema, table] => Some(PhysicalReference::table(schema, table)),
        [db, owner, table] if owner.eq_ignore_ascii_case("dbo") => Some(PhysicalReference::table(db, table)),
        [.., schema, table] => Some(PhysicalReference::table(schema, table)),
    }
}

fn ident_parts(idents: &[Ident]) -> Vec<String> {
    idents.iter().map(|ident| ident.value.clone()).collect()
}

fn cte_names(statement: &Statement) -> HashSet<String> {
    match statement {
        Statement::Query(query) => query
            .with
            .as_ref()
            .map(|with| with.cte_tables.iter().map(|cte| cte.alias.name.value.to_uppercase()).collect())
            .unwrap_or_default(),
        _ => HashSet::new(),
    }
}

fn scan_ast(parsed: &ParsedSql) -> SqlScan {
    let mut scan = SqlScan {
        references: Vec::new(),
        statement: parsed.first_statement().map(StatementKind::of).unwrap_or(StatementKind::Other),
        method: ScanMethod::Parsed,
    };

    for statement in &parsed.statements {
        let kind = StatementKind::of(statement);
        let ctes = cte_names(statement);

        let mut tables: Vec<(PhysicalReference, Option<UsageKind>)> = Vec::new();
        let _ = visit_relations(statement, |name: &ObjectName| {
            if let Some(reference) = table_reference(&ident_parts(&name.0)) {
                let is_cte = !reference.is_qualified() && ctes.contains(&reference.table_key());
                if !is_cte {
                    let usage = kind.usage_for(tables.is_empty());
                    tables.push((reference, usage));
                }
            }
            ControlFlow::<()>::Continue(())
        });

        let mut columns: Vec<PhysicalReference> = Vec::new();
        let _ = visit_expressions(statement, |expr: &Expr| {
            if let Expr::CompoundIdentifier(idents) = expr {
                if let [schema, table, column] = ident_parts(idents).as_slice() {
                    columns.push(PhysicalReference::column(schema, table, column));
                }
            }
            ControlFlow::<()>::Continue(())
        });

        for (reference, usage) in &tables {
            scan.push(reference.clone(), *usage);
        }
        for column in columns {
            let table = column.table_only();
            let usage = tables
                .iter()
                .find(|(reference, _)| *reference == table)
                .and_then(|(_, usage)| *usage)
                .or_else(|| kind.usage_for(false));
            scan.push(column, usage);
        }
    }

    scan
}

fn split_name(name: &str) -> Vec<String> {
    NAME_PART_RE
        .find_iter(name)
        .map(|m| dsxlens_core::schema::normalize_ident(m.as_str()))
        .collect()
}

fn token_scan(sql: &str) -> SqlScan {
    let kind = StatementKind::from_leading_keyword(sql);
    let mut scan = SqlScan {
        references: Vec::new(),
        statement: kind,
        method: ScanMethod::TokenScan,
    };

    let mut table_spans = Vec::new();
    for captures in TABLE_POSITION_RE.captures_iter(sql) {
        let Some(name) = captures.get(1) else {
            continue;
        };
        let parts = split_name(name.as_str());
        if parts.len() == 1 && RESERVED.iter().any(|r| r.eq_ignore_ascii_case(&parts[0])) {
            continue;
        }
        if let Some(reference) = table_reference(&parts) {
            let usage = kind.usage_for(table_spans.is_empty());
            table_spans.push(name.range());
            scan.push(reference, usage);
        }
    }

    for captures in THREE_PART_RE.captures_iter(sql) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let in_table_position = table_spans
            .iter()
            .any(|span| span.start <= whole.start() && whole.end() <= span.end);
        if in_table_position {
            continue;
        }
        let parts: Vec<String> = (1..=3)
            .filter_map(|i| captures.get(i))
            .map(|m| dsxlens_core::schema::normalize_ident(m.as_str()))
            .collect();
        if let [schema, table, column] = parts.as_slice() {
            scan.push(PhysicalReference::column(schema, table, column), kind.usage_for(false));
        }
    }

    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tables(scan: &SqlScan) -> Vec<String> {
        scan.tables().map(|t| t.to_string()).collect()
    }

    #[test]
    fn select_relations_from_ast() {
        let scan = SqlScanner::new().scan(
            "SELECT o.ORDER_NO, c.CUSTOMER_NAME FROM ERP.ORDERS o JOIN ERP.CUSTOMERS c ON o.CUSTOMER_NO = c.CUSTOMER_NO",
        );
        assert_eq!(scan.method, ScanMethod::Parsed);
        assert_eq!(scan.statement, StatementKind::Query);
        assert_eq!(tables(&scan), vec!["ERP.ORDERS", "ERP.CUSTOMERS"]);
        assert!(scan.references.iter().all(|r| r.usage == Some(UsageKind::Source)));
    }

    #[test]
    fn dml_target_is_first_relation() {
        let scan = SqlScanner::new().scan("INSERT INTO DW.FACT_ORDERS SELECT * FROM ERP.ORDERS");
        assert_eq!(
            scan.references,
            vec![
                SqlReference {
                    reference: PhysicalReference::table("DW", "FACT_ORDERS"),
                    usage: Some(UsageKind::Target),
                },
                SqlReference {
                    reference: PhysicalReference::table("ERP", "ORDERS"),
                    usage: Some(UsageKind::Source),
                },
            ]
        );
    }

    #[test]
    fn cte_names_are_not_tables() {
        let scan = SqlScanner::new().scan("WITH recent AS (SELECT * FROM ERP.ORDERS) SELECT * FROM recent");
        assert_eq!(tables(&scan), vec!["ERP.ORDERS"]);
    }

    #[test]
    fn qualified_columns_from_ast() {
        let scan = SqlScanner::new().scan("SELECT ERP.ORDERS.ORDER_NO FROM ERP.ORDERS");
        assert!(scan
            .references
            .iter()
            .any(|r| r.reference == PhysicalReference::column("ERP", "ORDERS", "ORDER_NO")));
    }

    #[test]
    fn dbo_owner_is_skipped() {
        let scan = SqlScanner::from_dialect(&DialectConfig::Mssql).scan("SELECT * FROM FILA_ERP.dbo.DW_ETL_L");
        assert_eq!(tables(&scan), vec!["FILA_ERP.DW_ETL_L"]);
    }

    #[test]
    fn token_scan_fallback() {
        // Unbalanced parenthesis: the parser rejects it
        let scan = SqlScanner::new().scan(
            "SELECT ERP.ORDERS.ORDER_NO FROM ERP.ORDERS JOIN ERP.ITEMS ON (ERP.ORDERS.ORDER_NO = ERP.ITEMS.ORDER_NO",
        );
        assert_eq!(scan.method, ScanMethod::TokenScan);
        assert_eq!(tables(&scan), vec!["ERP.ORDERS", "ERP.ITEMS"]);

        let columns: Vec<String> = scan
            .references
            .iter()
            .filter(|r| r.reference.column.is_some())
            .map(|r| r.reference.to_string())
            .collect();
        assert_eq!(columns, vec!["ERP.ORDERS.ORDER_NO", "ERP.ITEMS.ORDER_NO"]);
    }

    #[test]
    fn token_scan_handles_brackets() {
        let scan = SqlScanner::new().scan("UPDATE [ERP].[ORDERS] SET STATUS = 'X' WHERE (ORDER_NO = 1");
        assert_eq!(scan.method, ScanMethod::TokenScan);
        assert_eq!(scan.statement, StatementKind::Update);
        assert_eq!(scan.references[0].reference, PhysicalReference::table("ERP", "ORDERS"));
        assert_eq!(scan.references[0].usage, Some(UsageKind::Target));
    }

    #[test]
    fn mentions_table_respects_qualification() {
        let scan = SqlScanner::new().scan("SELECT * FROM ORDERS");
        let orders = PhysicalReference::table("ERP", "ORDERS");
        assert!(scan.mentions_table(&orders, true));
        assert!(!scan.mentions_table(&orders, false));
    }
}
