//! Command-line interface of the `stackfold` binary

pub mod args;

pub use args::Args;
