use crate::{NodeError, NodeParams, NodeSpec, Tensor, TensorRef, TensorSpec};

/// A custom pipeline node: a static IO contract plus a synchronous transform.
///
/// Implementations hold no per-call state, so one instance may serve
/// concurrent calls from several host threads.
pub trait CustomNode: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn inputs_info(&self, params: &NodeParams) -> Result<Vec<TensorSpec>, NodeError>;

    fn outputs_info(&self, params: &NodeParams) -> Result<Vec<TensorSpec>, NodeError>;

    /// Inputs are borrowed from the host; outputs are owned by the caller.
    fn execute(
        &self,
        inputs: &[TensorRef<'_>],
        params: &NodeParams,
    ) -> Result<Vec<Tensor>, NodeError>;

    fn spec(&self, params: &NodeParams) -> Result<NodeSpec, NodeError> {
        Ok(NodeSpec {
            inputs: self.inputs_info(params)?,
            outputs: self.outputs_info(params)?,
        })
    }
}
