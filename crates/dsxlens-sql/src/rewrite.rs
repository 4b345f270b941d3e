//! Identifier-boundary rewriting of table and column names in SQL text
//!
//! Only whole identifiers are replaced; string literals and comments are left
//! untouched, and the quoting style of every rewritten part is kept.

use dsxlens_core::schema::normalize_ident;
use dsxlens_core::PhysicalReference;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::LazyLock;

const IDENT: &str = r#"(?:\[[^\]\r\n]+\]|"[^"\r\n]+"|`[^`\r\n]+`|[A-Za-z_#@][A-Za-z0-9_$#@]*)"#;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)'(?:[^']|'')*'|--[^\n]*|/\*.*?\*/|{IDENT}(?:\s*\.\s*{IDENT})*"))
        .expect("token pattern is valid")
});

static PART_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(IDENT).expect("identifier pattern is valid"));

static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:FROM|JOIN|UPDATE|INTO)\s+({IDENT}(?:\s*\.\s*{IDENT}){{0,2}})"))
        .expect("table name pattern is valid")
});

const TABLE_KEYWORDS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE", "TABLE"];

const NOT_ALIASES: &[&str] = &[
    "WHERE", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "SET", "GROUP", "ORDER",
    "HAVING", "UNION", "VALUES", "SELECT", "USING", "WITH", "LIMIT",
];

/// Rewritten SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,

    /// Number of identifiers (dotted names) rewritten
    pub replacements: usize,
}

impl Rewrite {
    pub fn changed(&self) -> bool {
        self.replacements > 0
    }
}

/// One identifier part inside a dotted name
struct NamePart {
    range: Range<usize>,
    raw: String,
    name: String,
}

/// A dotted name outside literals and comments
struct DottedName {
    start: usize,
    parts: Vec<NamePart>,
}

impl DottedName {
    fn names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }
}

fn dotted_names(sql: &str) -> Vec<DottedName> {
    TOKEN_RE
        .find_iter(sql)
        .filter(|m| {
            let text = m.as_str();
            !(text.starts_with('\'') || text.starts_with("--") || text.starts_with("/*"))
        })
        .map(|m| DottedName {
            start: m.start(),
            parts: PART_RE
                .find_iter(m.as_str())
                .map(|p| NamePart {
                    range: m.start() + p.start()..m.start() + p.end(),
                    raw: p.as_str().to_string(),
                    name: normalize_ident(p.as_str()),
                })
                .collect(),
        })
        .collect()
}

/// Replace the name inside `raw`, keeping its quoting
fn requote(raw: &str, name: &str) -> String {
    match raw.chars().next() {
        Some('[') => format!("[{name}]"),
        Some('"') => format!("\"{name}\""),
        Some('`') => format!("`{name}`"),
        _ => name.to_string(),
    }
}

fn eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn preceded_by_table_keyword(sql: &str, start: usize) -> bool {
    let before = sql[..start].trim_end();
    let word_start = before
        .rfind(|c: char| !c.is_ascii_alphabetic())
        .map(|i| i + 1)
        .unwrap_or(0);
    let word = &before[word_start..];
    TABLE_KEYWORDS.iter().any(|k| eq(k, word))
}

fn apply(sql: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    let mut text = sql.to_string();
    for (range, replacement) in edits {
        text.replace_range(range, &replacement);
    }
    text
}

/// Rename table `from` to `to` wherever SQL text names it
///
/// Schema-qualified occurrences (`ERP.ORDERS`, `[ERP].[ORDERS]`, column
/// qualifiers `ERP.ORDERS.COL`, `ERP.dbo.ORDERS`) always match. Bare table
/// names match only in table position (after `FROM`, `JOIN`, `INTO`,
/// `UPDATE`, `TABLE`) and only when `include_unqualified` is set; they keep
/// being unqualified after the rename.
pub fn rewrite_table(
    sql: &str,
    from: &PhysicalReference,
    to: &PhysicalReference,
    include_unqualified: bool,
) -> Rewrite {
    let from_schema = from.schema.as_deref();
    let mut edits = Vec::new();
    let mut replacements = 0;

    for dotted in dotted_names(sql) {
        let names = dotted.names();

        // (schema part, table part)
        let hit: Option<(Option<usize>, usize)> = match (names.as_slice(), from_schema) {
            ([table], _) if eq(table, &from.table) => {
                let unqualified_ok = include_unqualified || from_schema.is_none();
                (unqualified_ok && preceded_by_table_keyword(sql, dotted.start)).then_some((None, 0))
            }
            ([schema, table], Some(s)) if eq(schema, s) && eq(table, &from.table) => Some((Some(0), 1)),
            ([_, table], None) if eq(table, &from.table) && preceded_by_table_keyword(sql, dotted.start) => {
                Some((None, 1))
            }
            ([schema, owner, table], Some(s)) if eq(owner, "dbo") && eq(schema, s) && eq(table, &from.table) => {
                Some((Some(0), 2))
            }
            ([schema, table, _column], Some(s)) if eq(schema, s) && eq(table, &from.table) => Some((Some(0), 1)),
            ([_db, schema, table], Some(s)) if eq(schema, s) && eq(table, &from.table) => Some((Some(1), 2)),
            _ => None,
        };

        let Some((schema_index, table_index)) = hit else {
            continue;
        };

        let table_part = &dotted.parts[table_index];
        if table_part.name != to.table {
            edits.push((table_part.range.clone(), requote(&table_part.raw, &to.table)));
        }
        if let (Some(index), Some(new_schema)) = (schema_index, to.schema.as_deref()) {
            let schema_part = &dotted.parts[index];
            if schema_part.name != new_schema {
                edits.push((schema_part.range.clone(), requote(&schema_part.raw, new_schema)));
            }
        }
        replacements += 1;
    }

    Rewrite {
        text: apply(sql, edits),
        replacements,
    }
}

/// Table aliases declared in `FROM`/`JOIN` clauses, and the set of tables named there
fn table_bindings(sql: &str) -> (HashMap<String, PhysicalReference>, HashSet<PhysicalReference>) {
    let mut aliases = HashMap::new();
    let mut tables = HashSet::new();

    for captures in TABLE_NAME_RE.captures_iter(sql) {
        let Some(name) = captures.get(1) else {
            continue;
        };
        let parts: Vec<String> = PART_RE.find_iter(name.as_str()).map(|p| normalize_ident(p.as_str())).collect();
        let Some(reference) = crate::scanner::table_reference(&parts) else {
            continue;
        };

        if let Some(alias) = following_alias(&sql[name.end()..]) {
            aliases.insert(alias.to_uppercase(), reference.clone());
        }
        tables.insert(reference);
    }

    (aliases, tables)
}

/// Alias written after a table name (`ORDERS o`, `ORDERS AS o`)
fn following_alias(rest: &str) -> Option<String> {
    let word = |text: &str| -> Option<(String, usize)> {
        let trimmed = text.trim_start();
        if trimmed.len() == text.len() {
            return None;
        }
        let offset = text.len() - trimmed.len();
        PART_RE
            .find(trimmed)
            .filter(|m| m.start() == 0)
            .map(|m| (normalize_ident(m.as_str()), offset + m.end()))
    };

    let (first, consumed) = word(rest)?;
    let alias = if eq(&first, "AS") { word(&rest[consumed..])?.0 } else { first };

    (!NOT_ALIASES.iter().any(|k| eq(k, &alias))).then_some(alias)
}

/// Whether a table-name qualifier (`ORDERS.C`) refers to a table accepted by `is_table`
///
/// The qualifier resolves against the tables the statement names; a name the
/// statement never binds is treated as an unqualified table.
fn qualifier_matches(
    qualifier: &str,
    tables: &HashSet<PhysicalReference>,
    is_table: &dyn Fn(&PhysicalReference) -> bool,
) -> bool {
    let mut bound = tables.iter().filter(|t| eq(&t.table, qualifier)).peekable();
    if bound.peek().is_none() {
        return is_table(&PhysicalReference::unqualified(qualifier));
    }
    bound.any(is_table)
}

/// Rename column `from_column` of `table` to `to_column` in SQL text
///
/// Matches `S.T.C`, `T.C`, `alias.C` when the alias is bound to `table`, and
/// a bare `C` when `table` is the only table the statement names.
/// Unqualified table names count as `table` only when `include_unqualified`
/// is set.
pub fn rewrite_column(
    sql: &str,
    table: &PhysicalReference,
    from_column: &str,
    to_column: &str,
    include_unqualified: bool,
) -> Rewrite {
    let (aliases, tables) = table_bindings(sql);

    let is_table = |reference: &PhysicalReference| {
        reference.table_key() == table.table_key()
            && (reference.schema_key() == table.schema_key() || (include_unqualified && !reference.is_qualified()))
    };
    let only_table = tables.len() == 1 && tables.iter().all(|t| is_table(t));

    let mut edits = Vec::new();
    let mut replacements = 0;

    for dotted in dotted_names(sql) {
        let names = dotted.names();
        let Some(last) = names.last() else {
            continue;
        };
        if !eq(last, from_column) {
            continue;
        }

        let matches = match names.as_slice() {
            [_column] => only_table && !preceded_by_table_keyword(sql, dotted.start),
            [qualifier, _column] => match aliases.get(&qualifier.to_uppercase()) {
                Some(bound) => is_table(bound),
                None => qualifier_matches(qualifier, &tables, &is_table),
            },
            [schema, table_name, _column] => is_table(&PhysicalReference::table(schema, table_name)),
            _ => false,
        };

        if matches {
            if let Some(part) = dotted.parts.last() {
                edits.push((part.range.clone(), requote(&part.raw, to_column)));
                replacements += 1;
            }
        }
    }

    Rewrite {
        text: apply(sql, edits),
        replacements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn erp_orders() -> PhysicalReference {
        PhysicalReference::table("ERP", "ORDERS")
    }

    #[test]
    fn renames_qualified_table() {
        let sql = "SELECT ERP.ORDERS.ORDER_NO FROM ERP.ORDERS o JOIN ERP.ORDERS_HIST h ON 1 = 1";
        let rewrite = rewrite_table(sql, &erp_orders(), &PhysicalReference::table("ERP", "ORDER_MASTER"), false);
        assert_eq!(
            rewrite.text,
            "SELECT ERP.ORDER_MASTER.ORDER_NO FROM ERP.ORDER_MASTER o JOIN ERP.ORDERS_HIST h ON 1 = 1"
        );
        assert_eq!(rewrite.replacements, 2);
    }

    #[test]
    fn keeps_quoting_and_skips_literals() {
        let sql = "SELECT * FROM [erp].[Orders] WHERE NOTE = 'ERP.ORDERS' -- ERP.ORDERS\n";
        let rewrite = rewrite_table(sql, &erp_orders(), &PhysicalReference::table("DW", "ORDER_MASTER"), false);
        assert_eq!(
            rewrite.text,
            "SELECT * FROM [DW].[ORDER_MASTER] WHERE NOTE = 'ERP.ORDERS' -- ERP.ORDERS\n"
        );
        assert_eq!(rewrite.replacements, 1);
    }

    #[test]
    fn unqualified_table_only_when_allowed() {
        let sql = "DELETE FROM ORDERS WHERE ORDERS.STATUS = 'X'";
        let to = PhysicalReference::table("ERP", "ORDER_MASTER");

        let strict = rewrite_table(sql, &erp_orders(), &to, false);
        assert!(!strict.changed());

        let loose = rewrite_table(sql, &erp_orders(), &to, true);
        assert_eq!(loose.text, "DELETE FROM ORDER_MASTER WHERE ORDERS.STATUS = 'X'");
    }

    #[test]
    fn renames_columns_through_aliases() {
        let sql = "SELECT o.ORDER_NO, i.ORDER_NO FROM ERP.ORDERS o JOIN ERP.ITEMS i ON o.ORDER_NO = i.ORDER_NO";
        let rewrite = rewrite_column(sql, &erp_orders(), "ORDER_NO", "ORDER_ID", false);
        assert_eq!(
            rewrite.text,
            "SELECT o.ORDER_ID, i.ORDER_NO FROM ERP.ORDERS o JOIN ERP.ITEMS i ON o.ORDER_ID = i.ORDER_NO"
        );
        assert_eq!(rewrite.replacements, 2);

        let with_as = "SELECT src.ORDER_NO FROM ERP.ORDERS AS src";
        assert_eq!(
            rewrite_column(with_as, &erp_orders(), "ORDER_NO", "ORDER_ID", false).text,
            "SELECT src.ORDER_ID FROM ERP.ORDERS AS src"
        );
    }

    #[test]
    fn renames_bare_columns_for_single_table() {
        let sql = "SELECT ORDER_NO, AMOUNT FROM ERP.ORDERS WHERE ORDER_NO > 10";
        let rewrite = rewrite_column(sql, &erp_orders(), "order_no", "ORDER_ID", false);
        assert_eq!(rewrite.text, "SELECT ORDER_ID, AMOUNT FROM ERP.ORDERS WHERE ORDER_ID > 10");

        let ambiguous = "SELECT ORDER_NO FROM ERP.ORDERS JOIN ERP.ITEMS ON 1 = 1";
        assert_eq!(rewrite_column(ambiguous, &erp_orders(), "ORDER_NO", "ORDER_ID", false).replacements, 0);
    }

    #[test]
    fn table_qualifier_follows_statement_schema() {
        let other_schema = "SELECT ORDERS.ORDER_NO FROM HR.ORDERS";
        let rewrite = rewrite_column(other_schema, &erp_orders(), "ORDER_NO", "ORDER_ID", false);
        assert_eq!(rewrite.replacements, 0);
        assert_eq!(rewrite.text, other_schema);
        assert_eq!(rewrite_column(other_schema, &erp_orders(), "ORDER_NO", "ORDER_ID", true).replacements, 0);

        let same_schema = "SELECT [Orders].ORDER_NO FROM erp.orders";
        assert_eq!(
            rewrite_column(same_schema, &erp_orders(), "ORDER_NO", "ORDER_ID", false).text,
            "SELECT [Orders].ORDER_ID FROM erp.orders"
        );

        let unqualified = "SELECT ORDERS.ORDER_NO FROM ORDERS";
        assert_eq!(rewrite_column(unqualified, &erp_orders(), "ORDER_NO", "ORDER_ID", false).replacements, 0);
        assert_eq!(
            rewrite_column(unqualified, &erp_orders(), "ORDER_NO", "ORDER_ID", true).text,
            "SELECT ORDERS.ORDER_ID FROM ORDERS"
        );
    }
}
