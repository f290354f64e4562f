//! appbox-lib: Core types and logic for appbox
//!
//! This crate provides the reconciliation engine behind the `appbox` CLI:
//! - `config`: the per-application desired-state document
//! - `digest`: per-section content digests for change detection
//! - `plan`: the rebuild/recreate/reintegrate action plan
//! - `engine`: ordered execution against the container engine, desktop
//!   integrator, and registry collaborators
//! - `state`: the durable last-applied record, installation status, and
//!   needs-apply flag
//! - `ops`: the lifecycle operations the CLI invokes

pub mod buildfile;
pub mod collab;
pub mod config;
pub mod consts;
pub mod digest;
pub mod engine;
pub mod flags;
pub mod lock;
pub mod ops;
pub mod paths;
pub mod plan;
pub mod state;
