//! Running DDL plans against a database connection

use dsxlens_engine::{DdlExecution, DdlPlan, PreconditionFailed, StepOutcome};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("connection lost: {0}")]
    Connection(String),
}

/// Runs one SQL statement at a time
#[async_trait::async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<(), ExecuteError>;
}

/// What happened while running a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRun {
    /// Statements in the order they were sent
    pub executed: Vec<String>,
    pub outcomes: Vec<StepOutcome>,

    /// 1-based index of the step that failed
    pub failed_step: Option<usize>,
    pub complete: bool,
}

/// Send every step of `plan` to `executor` in order, stopping at the first failure
pub async fn run_plan(plan: &DdlPlan, executor: &dyn StatementExecutor) -> Result<PlanRun, PreconditionFailed> {
    let mut execution = DdlExecution::new(plan);
    let mut executed = Vec::new();

    while let Some(step) = execution.next_step() {
        let step = execution.begin(step.index)?;
        let statement = step.statement();
        tracing::info!(step = step.index, phase = step.phase.number(), %statement, "running DDL step");

        let outcome = match executor.execute(&statement).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(error) => StepOutcome::Failed(error.to_string()),
        };
        executed.push(statement);
        let failed = matches!(outcome, StepOutcome::Failed(_));
        execution.record(step.index, outcome)?;
        if failed {
            break;
        }
    }

    Ok(PlanRun {
        executed,
        outcomes: execution.outcomes().to_vec(),
        failed_step: execution.failure().map(|(step, _)| step),
        complete: execution.is_complete(),
    })
}

/// Executor that records statements and can be told to reject some
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    statements: Arc<Mutex<Vec<String>>>,
    reject_containing: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any statement containing `fragment`
    pub fn rejecting(fragment: impl Into<String>) -> Self {
        Self {
            statements: Arc::default(),
            reject_containing: Some(fragment.into()),
        }
    }

    pub async fn statements(&self) -> Vec<String> {
        self.statements.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn execute(&self, statement: &str) -> Result<(), ExecuteError> {
        self.statements.lock().await.push(statement.to_string());
        match &self.reject_containing {
            Some(fragment) if statement.contains(fragment.as_str()) => {
                Err(ExecuteError::Rejected(format!("simulated failure on '{fragment}'")))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsxlens_core::{ColumnChange, ConstraintKind, DialectConfig, KeyConstraint, PhysicalColumn, PhysicalTable};
    use dsxlens_engine::DdlPlanner;
    use pretty_assertions::assert_eq;

    fn plan() -> DdlPlan {
        let orders = PhysicalTable::new(
            "ERP",
            "ORDERS",
            vec![PhysicalColumn::new("ORDER_NO", "VARCHAR").with_length(20).key()],
        )
        .with_constraint(KeyConstraint {
            name: "PK_ORDERS".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["ORDER_NO".into()],
        });
        DdlPlanner::new(DialectConfig::Mssql)
            .plan_checked(&[], &orders, &ColumnChange::new("ORDER_NO").with_length(30))
            .unwrap()
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let plan = plan();
        let executor = RecordingExecutor::new();

        let run = run_plan(&plan, &executor).await.unwrap();
        assert!(run.complete);
        assert_eq!(run.failed_step, None);
        assert_eq!(run.outcomes, vec![StepOutcome::Succeeded; 3]);
        assert_eq!(executor.statements().await, run.executed);
        assert!(run.executed[0].contains("DROP CONSTRAINT [PK_ORDERS]"));
    }

    #[tokio::test]
    async fn stops_at_the_first_failure() {
        let plan = plan();
        let executor = RecordingExecutor::rejecting("ALTER COLUMN");

        let run = run_plan(&plan, &executor).await.unwrap();
        assert!(!run.complete);
        assert_eq!(run.failed_step, Some(2));
        assert_eq!(run.executed.len(), 2);
        assert_eq!(executor.statements().await.len(), 2);
        assert!(matches!(&run.outcomes[1], StepOutcome::Failed(e) if e.contains("ALTER COLUMN")));
    }
}
