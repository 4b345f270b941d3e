//! Physical-vs-job schema consistency checks
//!
//! Compares what a job declares for a table against what the database says,
//! either as the table stands or as a proposed [`ColumnChange`] would leave
//! it. Blocking findings stop DDL planning through [`ValidationGate`].

use dsxlens_core::{
    ColumnChange, IntegrityIssue, IssueKind, JobColumn, JobTableMetadata, Location, PhysicalColumn, PhysicalTable,
    Severity, UsageKind,
};
use regex::Regex;
use std::sync::LazyLock;

static KEY_TRANSFORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(TRIM|LTRIM|RTRIM|TRIMLEADINGTRAILING|UPPER|UPCASE)\s*\(")
        .expect("key transform pattern is valid")
});

/// What a comparison found, before it is turned into an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finding {
    /// Job values longer than the column holds
    Truncation,
    /// Column wider than the job declares
    Narrower,
    FamilyMismatch,
    NullabilityDiffers,
    /// Job may write nulls into a column being made NOT NULL
    NewNotNull,
    LookupWithoutUniqueness,
    /// A change removes uniqueness a job key relies on
    UniquenessDropped,
    /// Job column absent from the table
    Missing,
    /// Key column written through TRIM/UPPER
    KeyTransform,
}

/// Static severity table
fn classify(finding: Finding) -> (IssueKind, Severity) {
    match finding {
        Finding::Truncation => (IssueKind::LengthMismatch, Severity::Blocking),
        Finding::Narrower => (IssueKind::LengthMismatch, Severity::Warning),
        Finding::FamilyMismatch => (IssueKind::TypeMismatch, Severity::Blocking),
        Finding::NullabilityDiffers => (IssueKind::NullabilityMismatch, Severity::Warning),
        Finding::NewNotNull => (IssueKind::NullabilityMismatch, Severity::Blocking),
        Finding::LookupWithoutUniqueness => (IssueKind::KeyViolation, Severity::Warning),
        Finding::UniquenessDropped => (IssueKind::KeyViolation, Severity::Blocking),
        Finding::Missing => (IssueKind::MissingColumn, Severity::Warning),
        Finding::KeyTransform => (IssueKind::KeyTransform, Severity::Warning),
    }
}

fn issue(finding: Finding, job: &JobTableMetadata, table: &PhysicalTable, column: &JobColumn, detail: String) -> IntegrityIssue {
    let (kind, severity) = classify(finding);
    IntegrityIssue::new(kind, severity, table.qualified_name(), &column.name, detail)
        .with_location(Location::with_line(&job.job, &column.record_path, column.line))
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

fn compare_column(
    job: &JobTableMetadata,
    table: &PhysicalTable,
    declared: &JobColumn,
    physical: &PhysicalColumn,
    issues: &mut Vec<IntegrityIssue>,
) {
    if let (Some(job_length), Some(physical_length)) = (declared.length, physical.length) {
        if job_length > physical_length {
            issues.push(
                issue(
                    Finding::Truncation,
                    job,
                    table,
                    declared,
                    format!(
                        "job '{}' declares length {} but {}.{} holds {}; values will be truncated",
                        job.job, job_length, table.qualified_name(), physical.name, physical_length
                    ),
                )
                .with_comparison(job_length.to_string(), physical_length.to_string())
                .with_recommendation(format!(
                    "widen {} to at least {} or shorten the job column",
                    physical.name, job_length
                )),
            );
        } else if job_length < physical_length {
            issues.push(
                issue(
                    Finding::Narrower,
                    job,
                    table,
                    declared,
                    format!(
                        "job '{}' declares length {} but {}.{} holds {}",
                        job.job, job_length, table.qualified_name(), physical.name, physical_length
                    ),
                )
                .with_comparison(job_length.to_string(), physical_length.to_string())
                .with_recommendation(format!("align the job column with length {physical_length}")),
            );
        }
    }

    let job_family = declared.family();
    let physical_family = physical.family();
    if !job_family.compatible_with(&physical_family) {
        issues.push(
            issue(
                Finding::FamilyMismatch,
                job,
                table,
                declared,
                format!(
                    "job '{}' treats {} as {} but the database type {} is {}",
                    job.job,
                    declared.name,
                    job_family,
                    physical.type_definition(),
                    physical_family
                ),
            )
            .with_comparison(
                declared.type_label.clone().unwrap_or_default(),
                physical.type_definition(),
            )
            .with_recommendation("change the job column type or add an explicit conversion"),
        );
    }

    if let Some(job_nullable) = declared.nullable {
        if job_nullable != physical.nullable {
            issues.push(
                issue(
                    Finding::NullabilityDiffers,
                    job,
                    table,
                    declared,
                    format!(
                        "job '{}' declares {} as {} but the database column is {}",
                        job.job,
                        declared.name,
                        nullability(job_nullable),
                        nullability(physical.nullable)
                    ),
                )
                .with_comparison(nullability(job_nullable), nullability(physical.nullable)),
            );
        }
    }
}

fn check_key(
    job: &JobTableMetadata,
    table: &PhysicalTable,
    declared: &JobColumn,
    physical_name: &str,
    issues: &mut Vec<IntegrityIssue>,
) {
    if job.usage == UsageKind::Lookup && declared.key && !table.is_unique(physical_name) {
        issues.push(
            issue(
                Finding::LookupWithoutUniqueness,
                job,
                table,
                declared,
                format!(
                    "lookup in job '{}' is keyed on {} but no primary key or unique constraint covers it",
                    job.job, declared.name
                ),
            )
            .with_recommendation("add a unique constraint or expect duplicate lookup matches"),
        );
    }

    let Some(derivation) = declared.derivation.as_deref() else {
        return;
    };
    if job.usage != UsageKind::Target || !table.is_unique(physical_name) {
        return;
    }
    if let Some(call) = KEY_TRANSFORM_RE.captures(derivation).and_then(|c| c.get(1)) {
        issues.push(
            issue(
                Finding::KeyTransform,
                job,
                table,
                declared,
                format!(
                    "job '{}' writes key column {} through {}(), so values that differ only in case or padding collide",
                    job.job,
                    physical_name,
                    call.as_str().to_uppercase()
                ),
            )
            .with_comparison(derivation, physical_name)
            .with_recommendation("load the key as-is or clean the source data before it reaches the key"),
        );
    }
}

fn check_columns(
    job: &JobTableMetadata,
    table: &PhysicalTable,
    physical_name: impl Fn(&str) -> String,
) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    for declared in &job.columns {
        let name = physical_name(&declared.name);
        let Some(physical) = table.find_column(&name) else {
            issues.push(
                issue(
                    Finding::Missing,
                    job,
                    table,
                    declared,
                    format!(
                        "job '{}' declares {} but {} has no such column",
                        job.job,
                        declared.name,
                        table.qualified_name()
                    ),
                )
                .with_recommendation(format!("add {name} to the table or remove it from the job")),
            );
            continue;
        };
        compare_column(job, table, declared, physical, &mut issues);
        check_key(job, table, declared, &physical.name, &mut issues);
    }
    issues
}

/// Compare one job's view of a table with the table itself
///
/// Columns are matched case-insensitively; a job column the table lacks is
/// reported as a warning.
pub fn validate(job: &JobTableMetadata, physical: &PhysicalTable) -> Vec<IntegrityIssue> {
    let issues = check_columns(job, physical, str::to_string);
    tracing::debug!(
        job = %job.job,
        table = %physical.qualified_name(),
        issues = issues.len(),
        "validated job against table"
    );
    issues
}

/// Validate a job against the table `change` would produce
///
/// Besides the regular comparison, a column newly made NOT NULL that the
/// job may write nulls into, and a dropped uniqueness guarantee a job key
/// depends on, are both blocking.
pub fn validate_change(job: &JobTableMetadata, current: &PhysicalTable, change: &ColumnChange) -> Vec<IntegrityIssue> {
    let proposed = change.apply_to(current);
    let renamed = |name: &str| match &change.new_name {
        Some(new_name) if name.eq_ignore_ascii_case(&change.column) => new_name.clone(),
        _ => name.to_string(),
    };

    let mut issues = check_columns(job, &proposed, renamed);

    let Some(declared) = job.find_column(&change.column) else {
        return issues;
    };
    let Some(before) = current.find_column(&change.column) else {
        return issues;
    };
    let after_name = renamed(&declared.name);

    if change.new_nullable == Some(false)
        && before.nullable
        && job.usage == UsageKind::Target
        && declared.nullable != Some(false)
    {
        issues.retain(|i| !(i.kind == IssueKind::NullabilityMismatch && i.column.eq_ignore_ascii_case(&declared.name)));
        issues.push(
            issue(
                Finding::NewNotNull,
                job,
                &proposed,
                declared,
                format!(
                    "{} becomes NOT NULL but job '{}' may write nulls into it",
                    before.name, job.job
                ),
            )
            .with_comparison(nullability(declared.nullable.unwrap_or(true)), "NOT NULL")
            .with_recommendation("filter or default null values in the job before applying the change"),
        );
    }

    if declared.key && current.is_unique(&before.name) && !proposed.is_unique(&after_name) {
        issues.retain(|i| !(i.kind == IssueKind::KeyViolation && i.column.eq_ignore_ascii_case(&declared.name)));
        let dropped: Vec<String> = current
            .constraints_on(&before.name)
            .iter()
            .map(|c| format!("{} {}", c.kind, c.name))
            .collect();
        issues.push(
            issue(
                Finding::UniquenessDropped,
                job,
                &proposed,
                declared,
                format!(
                    "change removes uniqueness on {} ({}) that job '{}' keys on",
                    before.name,
                    dropped.join(", "),
                    job.job
                ),
            )
            .with_recommendation("keep the constraint or move the job to another key"),
        );
    }

    issues
}

/// A column change whose validation found nothing blocking
///
/// Only [`ValidationGate::check`] creates one, so holding a value proves the
/// change was validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChange {
    change: ColumnChange,
    warnings: Vec<IntegrityIssue>,
}

impl ValidatedChange {
    pub fn change(&self) -> &ColumnChange {
        &self.change
    }

    /// Non-blocking issues found during validation
    pub fn warnings(&self) -> &[IntegrityIssue] {
        &self.warnings
    }
}

/// Blocking issues that stop a change
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("change to column '{column}' is blocked by {} issue(s)", .blocking.len())]
pub struct ValidationBlocked {
    pub column: String,
    pub blocking: Vec<IntegrityIssue>,
}

pub struct ValidationGate;

impl ValidationGate {
    /// Turn validation results into a planning token, or refuse
    pub fn check(issues: &[IntegrityIssue], change: &ColumnChange) -> Result<ValidatedChange, ValidationBlocked> {
        let (blocking, warnings): (Vec<IntegrityIssue>, Vec<IntegrityIssue>) =
            issues.iter().cloned().partition(IntegrityIssue::is_blocking);

        if !blocking.is_empty() {
            tracing::warn!(column = %change.column, blocking = blocking.len(), "column change blocked");
            return Err(ValidationBlocked {
                column: change.column.clone(),
                blocking,
            });
        }

        Ok(ValidatedChange {
            change: change.clone(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsxlens_core::{ConstraintKind, KeyConstraint, PhysicalReference};
    use pretty_assertions::assert_eq;

    fn orders() -> PhysicalTable {
        PhysicalTable::new(
            "ERP",
            "ORDERS",
            vec![
                PhysicalColumn::new("ORDER_NO", "VARCHAR").with_length(20).key(),
                PhysicalColumn::new("CUSTOMER_NO", "VARCHAR").with_length(20),
                PhysicalColumn::new("AMOUNT", "DECIMAL").with_length(18).with_scale(2),
                PhysicalColumn::new("ORDER_DATE", "DATETIME"),
            ],
        )
        .with_constraint(KeyConstraint {
            name: "PK_ORDERS".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["ORDER_NO".into()],
        })
    }

    fn job(usage: UsageKind, columns: Vec<JobColumn>) -> JobTableMetadata {
        columns
            .into_iter()
            .fold(JobTableMetadata::new("LOAD_ORDERS", PhysicalReference::table("ERP", "ORDERS"), usage), |m, c| {
                m.with_column(c)
            })
    }

    #[test]
    fn longer_job_column_blocks() {
        let job = job(UsageKind::Target, vec![JobColumn::new("order_no").with_type("12").with_length(50)]);
        let issues = validate(&job, &orders());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::LengthMismatch);
        assert_eq!(issues[0].severity, Severity::Blocking);
        assert_eq!(issues[0].job_value.as_deref(), Some("50"));
        assert_eq!(issues[0].physical_value.as_deref(), Some("20"));
        assert_eq!(issues[0].table, "ERP.ORDERS");

        let blocked = ValidationGate::check(&issues, &ColumnChange::new("ORDER_NO").with_length(30)).unwrap_err();
        assert_eq!(blocked.blocking.len(), 1);
        assert_eq!(blocked.column, "ORDER_NO");
    }

    #[test]
    fn shorter_job_column_warns() {
        let job = job(UsageKind::Source, vec![JobColumn::new("CUSTOMER_NO").with_type("VARCHAR").with_length(10)]);
        let issues = validate(&job, &orders());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);

        let validated = ValidationGate::check(&issues, &ColumnChange::new("CUSTOMER_NO")).unwrap();
        assert_eq!(validated.warnings().len(), 1);
        assert_eq!(validated.change().column, "CUSTOMER_NO");
    }

    #[test]
    fn family_and_nullability() {
        let job = job(
            UsageKind::Source,
            vec![
                JobColumn::new("ORDER_DATE").with_type("12"),
                JobColumn::new("AMOUNT").with_type("3").with_length(18).with_nullable(false),
                JobColumn::new("NOT_IN_TABLE").with_type("4"),
                JobColumn::new("CUSTOMER_NO"),
            ],
        );
        let issues = validate(&job, &orders());
        let kinds: Vec<(IssueKind, Severity)> = issues.iter().map(|i| (i.kind, i.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (IssueKind::TypeMismatch, Severity::Blocking),
                (IssueKind::NullabilityMismatch, Severity::Warning),
                (IssueKind::MissingColumn, Severity::Warning),
            ]
        );
    }

    #[test]
    fn column_missing_from_table_warns() {
        let job = job(UsageKind::Target, vec![JobColumn::new("ORDER_NO"), JobColumn::new("ORDER_NOTE").with_type("12")]);
        let issues = validate(&job, &orders());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::MissingColumn);
        assert_eq!(issues[0].kind.as_str(), "MISSING_COLUMN");
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].column, "ORDER_NOTE");
        assert!(ValidationGate::check(&issues, &ColumnChange::new("ORDER_NO")).is_ok());
    }

    #[test]
    fn trimmed_key_column_warns() {
        let trimmed = job(
            UsageKind::Target,
            vec![
                JobColumn::new("ORDER_NO").with_derivation("Trim(lnk_src.ORDER_NO)"),
                JobColumn::new("CUSTOMER_NO").with_derivation("UPPER(lnk_src.CUSTOMER_NO)"),
            ],
        );
        let issues = validate(&trimmed, &orders());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::KeyTransform);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].column, "ORDER_NO");
        assert!(issues[0].detail.contains("TRIM()"));

        // Reading the key through TRIM does not write it
        let reader = JobTableMetadata { usage: UsageKind::Source, ..trimmed };
        assert!(validate(&reader, &orders()).is_empty());

        let plain = job(UsageKind::Target, vec![JobColumn::new("ORDER_NO").with_derivation("lnk_src.TRIMMED_NO")]);
        assert!(validate(&plain, &orders()).is_empty());
    }

    #[test]
    fn lookup_key_without_uniqueness_warns() {
        let job = job(UsageKind::Lookup, vec![JobColumn::new("CUSTOMER_NO").keyed(), JobColumn::new("ORDER_NO").keyed()]);
        let issues = validate(&job, &orders());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].column, "CUSTOMER_NO");
        assert_eq!(issues[0].kind, IssueKind::KeyViolation);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn not_null_change_blocks_target_with_nulls() {
        let job = job(UsageKind::Target, vec![JobColumn::new("CUSTOMER_NO").with_nullable(true)]);
        let change = ColumnChange::new("CUSTOMER_NO").with_nullable(false);

        let issues = validate_change(&job, &orders(), &change);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::NullabilityMismatch);
        assert_eq!(issues[0].severity, Severity::Blocking);

        // A job only reading the column is not affected
        let reader = JobTableMetadata { usage: UsageKind::Source, ..job };
        let issues = validate_change(&reader, &orders(), &change);
        assert!(issues.iter().all(|i| !i.is_blocking()));
    }

    #[test]
    fn dropping_key_blocks_keyed_lookup() {
        let job = job(UsageKind::Lookup, vec![JobColumn::new("ORDER_NO").keyed()]);
        let change = ColumnChange::new("ORDER_NO").dropping_key();

        let issues = validate_change(&job, &orders(), &change);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::KeyViolation);
        assert_eq!(issues[0].severity, Severity::Blocking);
        assert!(issues[0].detail.contains("PRIMARY KEY PK_ORDERS"));
    }

    #[test]
    fn renamed_column_is_still_compared() {
        let job = job(UsageKind::Target, vec![JobColumn::new("ORDER_NO").with_length(50)]);
        let change = ColumnChange::new("ORDER_NO").renamed("ORDER_ID");

        let issues = validate_change(&job, &orders(), &change);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::LengthMismatch);

        let widened = ColumnChange::new("ORDER_NO").with_length(50);
        assert!(validate_change(&job, &orders(), &widened).is_empty());
    }
}
