//! Command-line argument definitions.

pub mod args;

pub use args::{Args, Command};
