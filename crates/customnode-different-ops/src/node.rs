use customnode_core::{CustomNode, DType, NodeError, NodeParams, Tensor, TensorRef, TensorSpec};
use tracing::debug;

use crate::engine::{self, FACTORS_RESULTS, RESULTS};
use crate::ops::OP_COUNT;
use crate::resolver::{self, FACTORS, NUMBERS};

/// Data vector length advertised to the host. `execute` accepts any `V > 0`.
pub const DESCRIBED_VALUES: usize = 10;

#[derive(Clone, Copy, Debug, Default)]
pub struct DifferentOps;

impl DifferentOps {
    pub fn new() -> Self {
        Self
    }
}

impl CustomNode for DifferentOps {
    fn name(&self) -> &'static str {
        "different_ops"
    }

    fn inputs_info(&self, params: &NodeParams) -> Result<Vec<TensorSpec>, NodeError> {
        ignore_params(params);
        Ok(vec![
            TensorSpec::new(NUMBERS, DType::F32, &[1, DESCRIBED_VALUES]),
            TensorSpec::new(FACTORS, DType::F32, &[1, OP_COUNT]),
        ])
    }

    fn outputs_info(&self, params: &NodeParams) -> Result<Vec<TensorSpec>, NodeError> {
        ignore_params(params);
        Ok(vec![
            TensorSpec::new(RESULTS, DType::F32, &[1, OP_COUNT, DESCRIBED_VALUES]),
            TensorSpec::new(FACTORS_RESULTS, DType::F32, &[1, OP_COUNT, OP_COUNT]),
        ])
    }

    fn execute(
        &self,
        inputs: &[TensorRef<'_>],
        params: &NodeParams,
    ) -> Result<Vec<Tensor>, NodeError> {
        ignore_params(params);
        let resolved = resolver::resolve(inputs)?;
        engine::compute(&resolved)
    }
}

// No parameter is recognized yet.
fn ignore_params(params: &NodeParams) {
    for (key, value) in params.iter() {
        debug!(key, value, "ignoring node parameter");
    }
}
