//! mergebot - merges ready branches into their declared destinations
//!
//! The bot watches branches that reach a "ready" state (status attribute
//! set to resolved, or every code review approved), merges each one into
//! the destination branches listed in a branch attribute, verifies the
//! result with CI builds before and after checkin, and reports the outcome
//! through the status attribute, an issue tracker and notifiers.
//!
//! The moving parts:
//!
//! - [`events::EventDispatcher`] turns server change events into queue work
//! - [`storage::BranchQueue`] holds pending branches, deduplicated
//! - [`worker::run_worker`] drains the queue one branch at a time
//! - [`process::BranchProcessor`] runs the per-branch state machine
//! - [`merge`] and [`build`] talk to the server and CI through [`api::MergebotApi`]

pub mod api;
pub mod build;
pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod notify;
pub mod process;
pub mod status;
pub mod storage;
pub mod transport;
pub mod types;
pub mod worker;
