//! Step logging, token accounting, and cost estimation for PowerNode.
//!
//! Provides the per-request step log returned to API callers (mirrored to
//! `tracing`), cumulative token totals across provider round trips, and a
//! fixed-rate pricing table for cost estimates.

pub mod pricing;
pub mod steps;
pub mod usage;

pub use pricing::{ModelPricing, PricingTable};
pub use steps::{StepEntry, StepLevel, StepLog};
pub use usage::UsageTotals;
