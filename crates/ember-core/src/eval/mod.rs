//! Tree-walking evaluator: call frames/environments plus the walker
//! itself (spec §4 "Evaluator").

pub mod evaluator;
pub mod frame;

pub use evaluator::{EvalResult, Evaluator, Signal};
pub use frame::{Binding, CallFrame, CallStack, Environment, StackOverflow};
