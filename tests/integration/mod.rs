//! Integration test suite for taskweave.
//!
//! These tests drive the public orchestrator API end to end with recording
//! handlers and check scheduling, failure propagation and aggregation as a
//! caller observes them.
//!
//! # Test Categories
//!
//! - `dispatch`: Concurrency caps, parallelism and routing
//! - `failure`: Failure capture and blocked propagation
//! - `validation`: Graphs rejected before execution
//! - `workflow_e2e`: Full runs from plan to report

mod fixtures;

mod dispatch;
mod workflow_e2e;
