//! Generic strategy execution engine.

mod machine;

pub use machine::{Handler, Machine, Transitions};
