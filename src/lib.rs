//! Benchmark LLM configurations (model, reasoning effort, verbosity)
//! against prompts, collect AI-judge and human evaluations, and
//! recommend the best configuration per prompt.
//!
//! The ranking and recommendation core ([`ranking`], [`recommend`]) is
//! pure, synchronous computation over snapshots read through
//! [`storage::ResultStore`]; execution and judging ([`executor`],
//! [`judge`]) are the async collaborators that produce the evidence.

pub mod config;
pub mod error;
pub mod executor;
pub mod judge;
pub mod models;
pub mod output;
pub mod ranking;
pub mod recommend;
pub mod runner;
pub mod storage;

pub use error::RankingError;
pub use ranking::{calculate_agreement, calculate_consensus};
pub use recommend::calculate_recommendation;
