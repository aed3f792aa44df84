use crate::{DType, IOName, Shape};

/// Shape template a node advertises for one of its inputs or outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(name: IOName, dtype: DType, dims: &[usize]) -> Self {
        Self {
            name,
            dtype,
            shape: Shape::from_slice(dims),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}
