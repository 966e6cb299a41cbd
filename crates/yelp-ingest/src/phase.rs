//! Per-dataset phase plans and the step sequence every worker follows.
//!
//! A plan is a list of passes over the worker's partition. Each pass transforms
//! the records into one batch per table and flushes those batches in order.
//! Fences (barrier waits) separate:
//!
//! - consecutive flushes within a pass
//! - the end of one pass and the transform of the next
//! - the last flush and connection release, when the plan asks for it

use crate::schema::TableSpec;

#[derive(Debug)]
pub struct Pass {
    /// Progress label shown while this pass transforms records.
    pub label: &'static str,
    /// Flush order of the batches the pass produces.
    pub tables: &'static [&'static TableSpec],
}

#[derive(Debug)]
pub struct PhasePlan {
    pub passes: &'static [Pass],
    pub fence_before_release: bool,
}

/// One state of a worker's phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Transform { pass: usize },
    Flush { pass: usize, table: usize },
    /// Barrier wait. `next_pass` is set when the fence opens a new pass.
    Fence { next_pass: Option<usize> },
    Release,
}

impl PhasePlan {
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        for (pass_index, pass) in self.passes.iter().enumerate() {
            if pass_index > 0 {
                steps.push(Step::Fence {
                    next_pass: Some(pass_index),
                });
            }
            steps.push(Step::Transform { pass: pass_index });
            for table_index in 0..pass.tables.len() {
                if table_index > 0 {
                    steps.push(Step::Fence { next_pass: None });
                }
                steps.push(Step::Flush {
                    pass: pass_index,
                    table: table_index,
                });
            }
        }
        if self.fence_before_release {
            steps.push(Step::Fence { next_pass: None });
        }
        steps.push(Step::Release);
        steps
    }

    /// Barrier waits per worker for one run of this plan.
    pub fn fence_count(&self) -> usize {
        self.steps()
            .iter()
            .filter(|step| matches!(step, Step::Fence { .. }))
            .count()
    }
}
