//! Multi-level impact of a table change through job data flow
//!
//! Level 1 holds the jobs reading the changed table. Tables those jobs write
//! are followed to the jobs reading them at level 2, and so on. Every job
//! appears at most once, at the level it is first reached.

use crate::index::DependencyIndex;
use dsxlens_core::{PhysicalReference, UsageKind};
use serde::Serialize;
use std::collections::HashSet;

/// A job reached while tracing impact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobImpact {
    pub job: String,

    /// Tables of the previous level this job reads
    pub via: Vec<PhysicalReference>,

    /// Tables this job writes
    pub writes: Vec<PhysicalReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactLevel {
    /// 1 for direct readers of the changed table
    pub level: usize,
    pub jobs: Vec<JobImpact>,
}

fn reads(usage: UsageKind) -> bool {
    matches!(usage, UsageKind::Source | UsageKind::Lookup)
}

fn push_unique(tables: &mut Vec<PhysicalReference>, table: PhysicalReference) {
    if !tables.contains(&table) {
        tables.push(table);
    }
}

/// Follow `start` through readers and their targets, up to `max_level` levels
pub fn trace_impact(index: &DependencyIndex, start: &PhysicalReference, max_level: usize) -> Vec<ImpactLevel> {
    let mut levels = Vec::new();
    let mut seen_jobs: HashSet<String> = HashSet::new();
    let mut seen_tables: HashSet<PhysicalReference> = HashSet::new();

    let mut frontier = vec![start.table_only()];
    seen_tables.insert(start.table_only());

    for level in 1..=max_level {
        let mut jobs: Vec<JobImpact> = Vec::new();

        for table in &frontier {
            for edge in index.find_table(table).into_iter().filter(|e| reads(e.usage)) {
                if seen_jobs.contains(&edge.job) {
                    continue;
                }
                match jobs.iter_mut().find(|j| j.job == edge.job) {
                    Some(existing) => push_unique(&mut existing.via, table.clone()),
                    None => jobs.push(JobImpact {
                        job: edge.job.clone(),
                        via: vec![table.clone()],
                        writes: Vec::new(),
                    }),
                }
            }
        }

        if jobs.is_empty() {
            break;
        }

        let mut next = Vec::new();
        for impact in &mut jobs {
            seen_jobs.insert(impact.job.clone());
            for edge in index.edges_for_job(&impact.job) {
                if edge.usage != UsageKind::Target {
                    continue;
                }
                let table = edge.reference.table_only();
                push_unique(&mut impact.writes, table.clone());
                if seen_tables.insert(table.clone()) {
                    next.push(table);
                }
            }
        }

        tracing::debug!(level, jobs = jobs.len(), next_tables = next.len(), "traced impact level");
        levels.push(ImpactLevel { level, jobs });
        frontier = next;
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexOptions;
    use dsxlens_export::{parse_documents, JobDocument};
    use pretty_assertions::assert_eq;

    const FLOW: &str = "\
BEGIN DSJOB
   Identifier \"LOAD_STAGE\"
   BEGIN DSRECORD
      Context 1
      SchemaName \"ERP\"
      TableName \"ORDERS\"
   END DSRECORD
   BEGIN DSRECORD
      Context 2
      TableName \"STG.ORDERS\"
   END DSRECORD
END DSJOB
BEGIN DSJOB
   Identifier \"BUILD_FACT\"
   BEGIN DSRECORD
      Context 1
      TableName \"STG.ORDERS\"
   END DSRECORD
   BEGIN DSRECORD
      Context 3
      TableName \"ERP.CUSTOMERS\"
   END DSRECORD
   BEGIN DSRECORD
      SQL \"INSERT INTO DW.FACT_ORDERS SELECT * FROM STG.ORDERS\"
   END DSRECORD
END DSJOB
BEGIN DSJOB
   Identifier \"FEEDBACK\"
   BEGIN DSRECORD
      Context 1
      TableName \"DW.FACT_ORDERS\"
   END DSRECORD
   BEGIN DSRECORD
      Context 2
      TableName \"ERP.ORDERS\"
   END DSRECORD
END DSJOB
BEGIN DSJOB
   Identifier \"STAFF\"
   BEGIN DSRECORD
      TableName \"HR.STAFF\"
   END DSRECORD
END DSJOB
";

    fn index() -> DependencyIndex {
        let documents: Vec<JobDocument> = parse_documents(FLOW).filter_map(Result::ok).collect();
        DependencyIndex::build(&documents, &IndexOptions::default())
    }

    fn names(level: &ImpactLevel) -> Vec<&str> {
        level.jobs.iter().map(|j| j.job.as_str()).collect()
    }

    #[test]
    fn follows_targets_level_by_level() {
        let levels = trace_impact(&index(), &PhysicalReference::table("ERP", "ORDERS"), 10);

        assert_eq!(levels.len(), 3);
        assert_eq!(names(&levels[0]), vec!["LOAD_STAGE"]);
        assert_eq!(names(&levels[1]), vec!["BUILD_FACT"]);
        assert_eq!(names(&levels[2]), vec!["FEEDBACK"]);

        assert_eq!(levels[0].jobs[0].writes, vec![PhysicalReference::table("STG", "ORDERS")]);
        assert_eq!(levels[1].jobs[0].via, vec![PhysicalReference::table("STG", "ORDERS")]);
        assert_eq!(levels[1].jobs[0].writes, vec![PhysicalReference::table("DW", "FACT_ORDERS")]);

        // The cycle back into ERP.ORDERS ends the trace
        assert_eq!(levels[2].jobs[0].writes, vec![PhysicalReference::table("ERP", "ORDERS")]);
    }

    #[test]
    fn level_limit_and_lookups() {
        let index = index();
        assert_eq!(trace_impact(&index, &PhysicalReference::table("ERP", "ORDERS"), 1).len(), 1);

        let levels = trace_impact(&index, &PhysicalReference::table("ERP", "CUSTOMERS"), 10);
        let reached: Vec<Vec<&str>> = levels.iter().map(names).collect();
        assert_eq!(reached, vec![vec!["BUILD_FACT"], vec!["FEEDBACK"], vec!["LOAD_STAGE"]]);

        assert!(trace_impact(&index, &PhysicalReference::table("DW", "UNUSED"), 10).is_empty());
    }
}
