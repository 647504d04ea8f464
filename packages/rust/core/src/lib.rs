//! Batch planning and run orchestration for AIBridge.
//!
//! This crate ties the source store, the codec, the providers, and the
//! checkpoint together into a resumable run ([`Pipeline`]) and a background
//! runner for interactive callers ([`PipelineRunner`]).

pub mod pipeline;
pub mod planner;
pub mod runner;

pub use pipeline::{
    BatchReport, BatchStart, Pipeline, PipelineConfig, ProgressReporter, RunState, RunSummary,
    SilentProgress, StopSignal,
};
pub use planner::{Batch, BatchPlan, Batches, plan};
pub use runner::{PipelineEvent, PipelineRunner, ProgressSnapshot};
