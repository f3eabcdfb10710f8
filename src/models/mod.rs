pub mod work_order;

pub use work_order::{
    ClassificationPlan, FormAction, FormTask, PlanDecision, ProcessedRows, ReassignTargets,
    RowFacts, RowState, RunSummary,
};
