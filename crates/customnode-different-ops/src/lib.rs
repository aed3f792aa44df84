//! Custom node computing add, subtract, multiply and divide of an input
//! vector against per-operation factors.
//!
//! Built as a `cdylib`, the library exports the host entry points from
//! [`ffi`]. The safe API is [`DifferentOps`] through
//! [`customnode_core::CustomNode`].

#![deny(unsafe_op_in_unsafe_fn)]

pub mod engine;
pub mod ffi;
pub mod node;
pub mod ops;
pub mod resolver;

pub use engine::{ECHOED_FACTORS, FACTORS_RESULTS, RESULTS};
pub use node::*;
pub use ops::{Operation, OP_COUNT};
pub use resolver::{Role, FACTORS, NUMBERS};
