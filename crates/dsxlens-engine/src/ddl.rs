//! Ordered DDL plans for validated column changes
//!
//! A plan drops the key constraints covering the column, alters the column,
//! then recreates the dropped constraints in reverse order. Each step states
//! what must have succeeded before it runs; [`DdlExecution`] enforces that.

use crate::integrity::{ValidatedChange, ValidationBlocked, ValidationGate};
use dsxlens_core::{ColumnChange, DialectConfig, IntegrityIssue, KeyConstraint, PhysicalTable};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlPhase {
    DropConstraints,
    AlterColumn,
    RecreateConstraints,
}

impl DdlPhase {
    pub fn number(&self) -> u8 {
        match self {
            Self::DropConstraints => 1,
            Self::AlterColumn => 2,
            Self::RecreateConstraints => 3,
        }
    }

    fn precondition(&self, first: bool) -> &'static str {
        match (self, first) {
            (_, true) => "none",
            (Self::DropConstraints, false) => "all earlier phase 1 steps succeeded",
            (Self::AlterColumn, false) => "all phase 1 steps succeeded",
            (Self::RecreateConstraints, false) => "all phase 1 and phase 2 steps succeeded",
        }
    }
}

impl std::fmt::Display for DdlPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DropConstraints => write!(f, "phase 1: drop constraints"),
            Self::AlterColumn => write!(f, "phase 2: alter column"),
            Self::RecreateConstraints => write!(f, "phase 3: recreate constraints"),
        }
    }
}

/// One statement of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlStep {
    /// 1-based position in the plan
    pub index: usize,
    pub phase: DdlPhase,
    pub description: String,

    /// Statement with `{name}` placeholders filled from `params`
    pub statement_template: String,
    pub params: BTreeMap<String, String>,

    pub precondition: String,
    pub must_not_proceed_if_prior_failed: bool,
}

impl DdlStep {
    /// The executable statement
    ///
    /// Placeholders are filled in one pass, so parameter values are never
    /// expanded again. Unknown placeholders are left as written.
    pub fn statement(&self) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.statement_template, |captures: &Captures<'_>| {
                self.params
                    .get(&captures[1])
                    .cloned()
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DdlPlan {
    /// `schema.table` the plan changes
    pub table: String,
    pub dialect: DialectConfig,
    pub change: ColumnChange,
    pub steps: Vec<DdlStep>,

    /// Non-blocking validation issues carried over from the gate
    pub warnings: Vec<IntegrityIssue>,
}

impl DdlPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps_in(&self, phase: DdlPhase) -> impl Iterator<Item = &DdlStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }

    /// Annotated script, one statement per step
    pub fn to_script(&self) -> String {
        let mut script = format!(
            "-- Column change on {} ({:?})\n-- Steps run in order; stop at the first failure.\n",
            self.table, self.dialect
        );
        for warning in &self.warnings {
            script.push_str(&format!("-- warning: {} {}: {}\n", warning.kind, warning.column, warning.detail));
        }
        for step in &self.steps {
            script.push_str(&format!(
                "\n-- Step {} [{}] {}\n-- Precondition: {}\n{};\n",
                step.index,
                step.phase,
                step.description,
                step.precondition,
                step.statement()
            ));
            if self.dialect == DialectConfig::Mssql {
                script.push_str("GO\n");
            }
        }
        script
    }
}

fn is_plain(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote(dialect: DialectConfig, name: &str) -> String {
    match dialect {
        DialectConfig::Mssql => format!("[{}]", name.replace(']', "]]")),
        _ if is_plain(name) => name.to_string(),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

fn quoted_table(dialect: DialectConfig, table: &PhysicalTable) -> String {
    format!("{}.{}", quote(dialect, &table.schema), quote(dialect, &table.table))
}

/// Content of a `'...'` string literal
fn string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

struct StepBuilder {
    steps: Vec<DdlStep>,
}

impl StepBuilder {
    fn push(&mut self, phase: DdlPhase, description: String, template: &str, params: &[(&str, String)]) {
        let first = self.steps.is_empty();
        self.steps.push(DdlStep {
            index: self.steps.len() + 1,
            phase,
            description,
            statement_template: template.to_string(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            precondition: phase.precondition(first).to_string(),
            must_not_proceed_if_prior_failed: !first,
        });
    }
}

/// Builds [`DdlPlan`]s for one dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlPlanner {
    dialect: DialectConfig,
}

impl DdlPlanner {
    pub fn new(dialect: DialectConfig) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> DialectConfig {
        self.dialect
    }

    /// Validate first, then plan; refuses when any issue is blocking
    pub fn plan_checked(
        &self,
        issues: &[IntegrityIssue],
        table: &PhysicalTable,
        change: &ColumnChange,
    ) -> Result<DdlPlan, ValidationBlocked> {
        let validated = ValidationGate::check(issues, change)?;
        Ok(self.plan(&validated, table))
    }

    /// Plan a change that already passed validation
    pub fn plan(&self, validated: &ValidatedChange, table: &PhysicalTable) -> DdlPlan {
        let change = validated.change();
        let dialect = self.dialect;
        let target = quoted_table(dialect, table);
        let mut builder = StepBuilder { steps: Vec::new() };

        let dropped: Vec<&KeyConstraint> = if change.alters_definition() || change.drop_from_key {
            table.constraints_on(&change.column)
        } else {
            Vec::new()
        };

        for constraint in &dropped {
            builder.push(
                DdlPhase::DropConstraints,
                format!("drop {} {} ({})", constraint.kind, constraint.name, constraint.columns.join(", ")),
                "ALTER TABLE {table} DROP CONSTRAINT {constraint}",
                &[("table", target.clone()), ("constraint", quote(dialect, &constraint.name))],
            );
        }

        let proposed = change.apply_to(table);
        self.alter_steps(&mut builder, table, &proposed, change, &target);

        for constraint in dropped.iter().rev() {
            let Some(recreated) = proposed.constraints.iter().find(|c| c.name == constraint.name) else {
                continue;
            };
            let columns: Vec<String> = recreated.columns.iter().map(|c| quote(dialect, c)).collect();
            builder.push(
                DdlPhase::RecreateConstraints,
                format!("recreate {} {} ({})", recreated.kind, recreated.name, recreated.columns.join(", ")),
                "ALTER TABLE {table} ADD CONSTRAINT {constraint} {kind} ({columns})",
                &[
                    ("table", target.clone()),
                    ("constraint", quote(dialect, &recreated.name)),
                    ("kind", recreated.kind.to_string()),
                    ("columns", columns.join(", ")),
                ],
            );
        }

        tracing::info!(
            table = %table.qualified_name(),
            column = %change.column,
            steps = builder.steps.len(),
            "planned column change"
        );

        DdlPlan {
            table: table.qualified_name(),
            dialect,
            change: change.clone(),
            steps: builder.steps,
            warnings: validated.warnings().to_vec(),
        }
    }

    fn alter_steps(
        &self,
        builder: &mut StepBuilder,
        table: &PhysicalTable,
        proposed: &PhysicalTable,
        change: &ColumnChange,
        target: &str,
    ) {
        let dialect = self.dialect;
        let current = table.find_column(&change.column);
        let name = current.map(|c| c.name.as_str()).unwrap_or(&change.column);
        let column = quote(dialect, name);

        let after = proposed
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(change.new_name.as_deref().unwrap_or(&change.column)));

        if let (Some(current), Some(after)) = (current, after) {
            let type_changes = change.new_type.is_some() || change.new_length.is_some() || change.new_scale.is_some();
            let nullability_changes = change.new_nullable.is_some_and(|n| n != current.nullable);
            let null_clause = if after.nullable { "NULL" } else { "NOT NULL" };

            match dialect {
                DialectConfig::Mssql if type_changes || nullability_changes => builder.push(
                    DdlPhase::AlterColumn,
                    format!("alter {} to {} {}", current.name, after.type_definition(), null_clause),
                    "ALTER TABLE {table} ALTER COLUMN {column} {definition}",
                    &[
                        ("table", target.to_string()),
                        ("column", column.clone()),
                        ("definition", format!("{} {}", after.type_definition(), null_clause)),
                    ],
                ),
                DialectConfig::Mssql => {}
                _ => {
                    if type_changes {
                        let template = if dialect == DialectConfig::Postgres {
                            "ALTER TABLE {table} ALTER COLUMN {column} TYPE {type}"
                        } else {
                            "ALTER TABLE {table} ALTER COLUMN {column} SET DATA TYPE {type}"
                        };
                        builder.push(
                            DdlPhase::AlterColumn,
                            format!("change type of {} to {}", current.name, after.type_definition()),
                            template,
                            &[
                                ("table", target.to_string()),
                                ("column", column.clone()),
                                ("type", after.type_definition()),
                            ],
                        );
                    }
                    if nullability_changes {
                        let action = if after.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                        builder.push(
                            DdlPhase::AlterColumn,
                            format!("make {} {}", current.name, null_clause),
                            "ALTER TABLE {table} ALTER COLUMN {column} {action}",
                            &[
                                ("table", target.to_string()),
                                ("column", column.clone()),
                                ("action", action.to_string()),
                            ],
                        );
                    }
                }
            }
        } else if change.alters_definition() {
            tracing::warn!(table = %table.qualified_name(), column = %change.column, "column not found; definition left unchanged");
        }

        if let Some(new_name) = &change.new_name {
            if dialect == DialectConfig::Mssql {
                builder.push(
                    DdlPhase::AlterColumn,
                    format!("rename {name} to {new_name}"),
                    "EXEC sp_rename '{object}', '{new_name}', 'COLUMN'",
                    &[
                        ("object", string_literal(&format!("{}.{}.{}", table.schema, table.table, name))),
                        ("new_name", string_literal(new_name)),
                    ],
                );
            } else {
                builder.push(
                    DdlPhase::AlterColumn,
                    format!("rename {name} to {new_name}"),
                    "ALTER TABLE {table} RENAME COLUMN {column} TO {new_name}",
                    &[
                        ("table", target.to_string()),
                        ("column", column),
                        ("new_name", quote(dialect, new_name)),
                    ],
                );
            }
        }
    }
}

/// Result of running one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
}

/// A step may not run yet, or at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step {step} cannot run: {reason}")]
pub struct PreconditionFailed {
    pub step: usize,
    pub reason: String,
}

/// Progress through one plan
#[derive(Debug)]
pub struct DdlExecution<'p> {
    plan: &'p DdlPlan,
    outcomes: Vec<StepOutcome>,
}

impl<'p> DdlExecution<'p> {
    pub fn new(plan: &'p DdlPlan) -> Self {
        Self {
            plan,
            outcomes: Vec::with_capacity(plan.steps.len()),
        }
    }

    pub fn plan(&self) -> &'p DdlPlan {
        self.plan
    }

    /// The next step, if any remain
    pub fn next_step(&self) -> Option<&'p DdlStep> {
        self.plan.steps.get(self.outcomes.len())
    }

    /// First failed step and its error
    pub fn failure(&self) -> Option<(usize, &str)> {
        self.outcomes.iter().enumerate().find_map(|(i, outcome)| match outcome {
            StepOutcome::Failed(error) => Some((i + 1, error.as_str())),
            StepOutcome::Succeeded => None,
        })
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    /// Every step ran and succeeded
    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.plan.steps.len() && self.failure().is_none()
    }

    /// Check that step `index` may run now
    pub fn begin(&self, index: usize) -> Result<&'p DdlStep, PreconditionFailed> {
        let expected = self.outcomes.len() + 1;
        let Some(step) = self.plan.steps.get(index.wrapping_sub(1)) else {
            return Err(PreconditionFailed {
                step: index,
                reason: format!("the plan has {} step(s)", self.plan.steps.len()),
            });
        };
        if index != expected {
            return Err(PreconditionFailed {
                step: index,
                reason: format!("step {expected} runs next"),
            });
        }
        if let (true, Some((failed, error))) = (step.must_not_proceed_if_prior_failed, self.failure()) {
            return Err(PreconditionFailed {
                step: index,
                reason: format!("step {failed} failed: {error}"),
            });
        }
        Ok(step)
    }

    /// Record the outcome of the step that was begun
    pub fn record(&mut self, index: usize, outcome: StepOutcome) -> Result<(), PreconditionFailed> {
        self.begin(index)?;
        if let StepOutcome::Failed(error) = &outcome {
            tracing::warn!(step = index, %error, "DDL step failed");
        }
        self.outcomes.push(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::validate;
    use dsxlens_core::{ConstraintKind, JobColumn, JobTableMetadata, PhysicalColumn, PhysicalReference, UsageKind};
    use pretty_assertions::assert_eq;

    fn orders() -> PhysicalTable {
        PhysicalTable::new(
            "ERP",
            "ORDERS",
            vec![
                PhysicalColumn::new("ORDER_NO", "VARCHAR").with_length(20).key(),
                PhysicalColumn::new("LINE_NO", "INT").not_null(),
                PhysicalColumn::new("NOTE", "VARCHAR").with_length(100),
            ],
        )
        .with_constraint(KeyConstraint {
            name: "PK_ORDERS".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["ORDER_NO".into()],
        })
        .with_constraint(KeyConstraint {
            name: "UQ_ORDER_LINE".into(),
            kind: ConstraintKind::Unique,
            columns: vec!["ORDER_NO".into(), "LINE_NO".into()],
        })
    }

    fn plan(dialect: DialectConfig, change: ColumnChange) -> DdlPlan {
        DdlPlanner::new(dialect).plan_checked(&[], &orders(), &change).unwrap()
    }

    fn statements(plan: &DdlPlan) -> Vec<String> {
        plan.steps.iter().map(DdlStep::statement).collect()
    }

    #[test]
    fn key_column_change_drops_and_recreates() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("ORDER_NO").with_length(30));

        assert_eq!(
            statements(&plan),
            vec![
                "ALTER TABLE [ERP].[ORDERS] DROP CONSTRAINT [PK_ORDERS]",
                "ALTER TABLE [ERP].[ORDERS] DROP CONSTRAINT [UQ_ORDER_LINE]",
                "ALTER TABLE [ERP].[ORDERS] ALTER COLUMN [ORDER_NO] VARCHAR(30) NOT NULL",
                "ALTER TABLE [ERP].[ORDERS] ADD CONSTRAINT [UQ_ORDER_LINE] UNIQUE ([ORDER_NO], [LINE_NO])",
                "ALTER TABLE [ERP].[ORDERS] ADD CONSTRAINT [PK_ORDERS] PRIMARY KEY ([ORDER_NO])",
            ]
        );

        let phases: Vec<u8> = plan.steps.iter().map(|s| s.phase.number()).collect();
        assert_eq!(phases, vec![1, 1, 2, 3, 3]);
        let guarded: Vec<bool> = plan.steps.iter().map(|s| s.must_not_proceed_if_prior_failed).collect();
        assert_eq!(guarded, vec![false, true, true, true, true]);
        assert_eq!(plan.steps[2].precondition, "all phase 1 steps succeeded");
        assert_eq!(plan.steps[4].precondition, "all phase 1 and phase 2 steps succeeded");
    }

    #[test]
    fn plain_column_change_is_a_single_step() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("note").with_length(200));
        assert_eq!(
            statements(&plan),
            vec!["ALTER TABLE [ERP].[ORDERS] ALTER COLUMN [NOTE] VARCHAR(200) NULL"]
        );
        assert_eq!(plan.steps_in(DdlPhase::DropConstraints).count(), 0);
    }

    #[test]
    fn postgres_splits_type_and_nullability() {
        let postgres = plan(
            DialectConfig::Postgres,
            ColumnChange::new("NOTE").with_type("VARCHAR").with_length(200).with_nullable(false),
        );
        assert_eq!(
            statements(&postgres),
            vec![
                "ALTER TABLE ERP.ORDERS ALTER COLUMN NOTE TYPE VARCHAR(200)",
                "ALTER TABLE ERP.ORDERS ALTER COLUMN NOTE SET NOT NULL",
            ]
        );

        let vertica = plan(DialectConfig::Vertica, ColumnChange::new("NOTE").with_length(150));
        assert_eq!(
            statements(&vertica),
            vec!["ALTER TABLE ERP.ORDERS ALTER COLUMN NOTE SET DATA TYPE VARCHAR(150)"]
        );
    }

    #[test]
    fn renames_per_dialect() {
        let mssql = plan(DialectConfig::Mssql, ColumnChange::new("NOTE").renamed("REMARK"));
        assert_eq!(statements(&mssql), vec!["EXEC sp_rename 'ERP.ORDERS.NOTE', 'REMARK', 'COLUMN'"]);

        let quoted = plan(DialectConfig::Mssql, ColumnChange::new("NOTE").renamed("O'NEIL_NOTE"));
        assert_eq!(statements(&quoted), vec!["EXEC sp_rename 'ERP.ORDERS.NOTE', 'O''NEIL_NOTE', 'COLUMN'"]);

        let ansi = plan(DialectConfig::Ansi, ColumnChange::new("NOTE").renamed("REMARK"));
        assert_eq!(statements(&ansi), vec!["ALTER TABLE ERP.ORDERS RENAME COLUMN NOTE TO REMARK"]);
    }

    #[test]
    fn parameter_values_are_not_expanded_again() {
        let step = DdlStep {
            index: 1,
            phase: DdlPhase::AlterColumn,
            description: "rename".into(),
            statement_template: "EXEC sp_rename '{object}', '{new_name}', 'COLUMN' {unknown}".into(),
            params: BTreeMap::from([
                ("object".to_string(), "ERP.ORDERS.{new_name}".to_string()),
                ("new_name".to_string(), "REMARK".to_string()),
            ]),
            precondition: "none".into(),
            must_not_proceed_if_prior_failed: false,
        };
        assert_eq!(
            step.statement(),
            "EXEC sp_rename 'ERP.ORDERS.{new_name}', 'REMARK', 'COLUMN' {unknown}"
        );
    }

    #[test]
    fn dropping_from_key_recreates_what_remains() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("ORDER_NO").dropping_key());
        assert_eq!(
            statements(&plan),
            vec![
                "ALTER TABLE [ERP].[ORDERS] DROP CONSTRAINT [PK_ORDERS]",
                "ALTER TABLE [ERP].[ORDERS] DROP CONSTRAINT [UQ_ORDER_LINE]",
                "ALTER TABLE [ERP].[ORDERS] ADD CONSTRAINT [UQ_ORDER_LINE] UNIQUE ([LINE_NO])",
            ]
        );
    }

    #[test]
    fn blocking_validation_refuses_planning() {
        let job = JobTableMetadata::new("LOAD_ORDERS", PhysicalReference::table("ERP", "ORDERS"), UsageKind::Target)
            .with_column(JobColumn::new("ORDER_NO").with_type("12").with_length(50));
        let issues = validate(&job, &orders());

        let refused = DdlPlanner::new(DialectConfig::Mssql)
            .plan_checked(&issues, &orders(), &ColumnChange::new("NOTE").with_length(120))
            .unwrap_err();
        assert_eq!(refused.blocking.len(), 1);
    }

    #[test]
    fn execution_enforces_order_and_stops_after_failure() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("ORDER_NO").with_length(30));
        let mut execution = DdlExecution::new(&plan);

        assert!(execution.begin(2).is_err());
        assert!(execution.begin(0).is_err());
        assert_eq!(execution.begin(1).unwrap().index, 1);

        execution.record(1, StepOutcome::Succeeded).unwrap();
        execution.record(2, StepOutcome::Failed("lock timeout".into())).unwrap();

        let refused = execution.begin(3).unwrap_err();
        assert_eq!(refused.step, 3);
        assert!(refused.reason.contains("step 2 failed: lock timeout"));
        assert_eq!(execution.failure(), Some((2, "lock timeout")));
        assert!(!execution.is_complete());
    }

    #[test]
    fn execution_completes() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("ORDER_NO").with_length(30));
        let mut execution = DdlExecution::new(&plan);
        while let Some(step) = execution.next_step() {
            execution.record(step.index, StepOutcome::Succeeded).unwrap();
        }
        assert!(execution.is_complete());
        assert!(execution.begin(6).is_err());
    }

    #[test]
    fn script_is_annotated() {
        let plan = plan(DialectConfig::Mssql, ColumnChange::new("ORDER_NO").with_length(30));
        let script = plan.to_script();
        assert!(script.starts_with("-- Column change on ERP.ORDERS (Mssql)"));
        assert!(script.contains("-- Step 3 [phase 2: alter column] alter ORDER_NO to VARCHAR(30) NOT NULL"));
        assert!(script.contains("ALTER TABLE [ERP].[ORDERS] DROP CONSTRAINT [PK_ORDERS];\nGO\n"));
        assert_eq!(script.matches("-- Precondition:").count(), 5);
    }
}
