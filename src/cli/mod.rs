//! Binary-side startup

mod context;
mod run;

pub use run::{RunOptions, default_data_dir, run_bot};
