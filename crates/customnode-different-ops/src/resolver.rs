//! Maps named host inputs onto the node's two roles and validates them.

use customnode_core::{F32Slice, IOName, NodeError, TensorRef};
use tracing::{debug, warn};

use crate::ops::OP_COUNT;

pub const NUMBERS: IOName = IOName::new(c"input_numbers");
pub const FACTORS: IOName = IOName::new(c"op_factors");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    DataVector,
    ParameterVector,
    Unrecognized,
}

impl Role {
    pub fn of(name: &str) -> Self {
        if NUMBERS == *name {
            Role::DataVector
        } else if FACTORS == *name {
            Role::ParameterVector
        } else {
            Role::Unrecognized
        }
    }
}

/// Validated inputs. `numbers` borrows the host buffer in place.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedInputs<'a> {
    pub numbers: F32Slice<'a>,
    pub factors: [f32; OP_COUNT],
}

/// Inputs must be exactly one `[1, V]` data vector with `V > 0` and one
/// `[1, OP_COUNT]` factors vector, both FP32. Any other name fails.
pub fn resolve<'a>(inputs: &[TensorRef<'a>]) -> Result<ResolvedInputs<'a>, NodeError> {
    let resolved = classify(inputs);
    if let Err(err) = &resolved {
        warn!(error = %err, "rejecting node inputs");
    }
    resolved
}

fn classify<'a>(inputs: &[TensorRef<'a>]) -> Result<ResolvedInputs<'a>, NodeError> {
    let mut numbers = None;
    let mut factors = None;

    for input in inputs {
        match Role::of(input.name) {
            Role::DataVector => {
                if numbers.is_some() {
                    return Err(NodeError::DuplicateInput(input.name.to_string()));
                }
                row_len(input).filter(|len| *len > 0).ok_or_else(|| shape_err(input))?;
                debug!(input = input.name, dims = %input.shape, "input valuesPerTensor resolved");
                numbers = Some(input.as_f32()?);
            }
            Role::ParameterVector => {
                if factors.is_some() {
                    return Err(NodeError::DuplicateInput(input.name.to_string()));
                }
                row_len(input).filter(|len| *len == OP_COUNT).ok_or_else(|| shape_err(input))?;
                debug!(input = input.name, dims = %input.shape, "factors resolved");
                let mut values = [0f32; OP_COUNT];
                for (slot, v) in values.iter_mut().zip(input.as_f32()?.iter()) {
                    *slot = v;
                }
                factors = Some(values);
            }
            Role::Unrecognized => return Err(NodeError::UnknownInput(input.name.to_string())),
        }
    }

    Ok(ResolvedInputs {
        numbers: numbers.ok_or(NodeError::MissingInput(NUMBERS.as_str()))?,
        factors: factors.ok_or(NodeError::MissingInput(FACTORS.as_str()))?,
    })
}

/// Second dimension of a `[1, N]` tensor.
fn row_len(input: &TensorRef<'_>) -> Option<usize> {
    match input.shape.dims() {
        [1, len] => Some(*len),
        _ => None,
    }
}

fn shape_err(input: &TensorRef<'_>) -> NodeError {
    NodeError::ShapeMismatch {
        name: input.name.to_string(),
        dims: input.shape.clone(),
    }
}
