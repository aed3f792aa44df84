//! Applies every operation to the data vector and tiles the factors.

use customnode_core::{DType, F32Builder, IOName, NodeError, Shape, Tensor};
use tracing::{debug, trace};

use crate::ops::{Operation, OP_COUNT};
use crate::resolver::ResolvedInputs;

pub const RESULTS: IOName = IOName::new(c"different_ops_results");
/// Name `getOutputsInfo` advertises for the factor echo.
pub const FACTORS_RESULTS: IOName = IOName::new(c"factors_results");
/// Name `execute` actually gives the factor echo. Hosts map it through the
/// pipeline's output aliases, so it differs from [`FACTORS_RESULTS`].
pub const ECHOED_FACTORS: IOName = IOName::new(c"different_ops_factors_results");

/// Produces `different_ops_results` `[1, OP_COUNT, V]`, where row `op` holds
/// `op` applied to every value with `factors[op]`, and
/// `different_ops_factors_results` `[1, OP_COUNT, OP_COUNT]`, where every row
/// is a copy of the factors.
pub fn compute(inputs: &ResolvedInputs<'_>) -> Result<Vec<Tensor>, NodeError> {
    let values = inputs.numbers.len();
    let total = OP_COUNT
        .checked_mul(values)
        .ok_or(NodeError::AllocationFailure { bytes: usize::MAX })?;
    let mut results = F32Builder::with_capacity(total)?;
    let mut echoed = F32Builder::with_capacity(OP_COUNT * OP_COUNT)?;

    for &op in Operation::ALL {
        let factor = inputs.factors[op.index()];
        for &f in &inputs.factors {
            echoed.push(f);
        }
        for (position, input) in inputs.numbers.iter().enumerate() {
            let value = op.apply(input, factor);
            trace!(
                op = op.name(),
                position,
                index = op.index() * values + position,
                value,
                input,
                factor,
                "computed"
            );
            results.push(value);
        }
    }
    debug!(values, ops = OP_COUNT, "computed all operations");

    Ok(vec![
        Tensor::from_host(
            RESULTS,
            DType::F32,
            Shape::from_slice(&[1, OP_COUNT, values]),
            results.finish(),
        ),
        Tensor::from_host(
            ECHOED_FACTORS,
            DType::F32,
            Shape::from_slice(&[1, OP_COUNT, OP_COUNT]),
            echoed.finish(),
        ),
    ])
}
