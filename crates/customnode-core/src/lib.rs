#![deny(unsafe_op_in_unsafe_fn)]

pub mod abi;
pub mod alloc;
pub mod error;
pub mod node;
pub mod params;
pub mod spec;
pub mod tensor;

pub use error::*;
pub use node::*;
pub use params::*;
pub use spec::*;
pub use tensor::*;
