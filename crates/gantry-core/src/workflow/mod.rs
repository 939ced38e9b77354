//! Workflow orchestration for Gantry

mod publish;

pub use publish::*;
