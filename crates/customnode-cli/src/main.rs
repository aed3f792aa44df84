mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use customnode_core::{
    f32_bytes, CustomNode, DType, NodeParams, Shape, Tensor, TensorRef, TensorSpec,
};
use customnode_different_ops::{DifferentOps, FACTORS, NUMBERS};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("invalid --log filter")?)
        .with_writer(std::io::stderr)
        .init();

    let node = DifferentOps::new();
    match cli.command {
        Command::Describe => describe(&node),
        Command::Run {
            numbers,
            factors,
            params,
        } => run(&node, &numbers, &factors, params.into_iter().collect()),
    }
}

fn describe(node: &impl CustomNode) -> Result<()> {
    let spec = node.spec(&NodeParams::new())?;
    println!("inputs:");
    print_specs(&spec.inputs);
    println!("outputs:");
    print_specs(&spec.outputs);
    Ok(())
}

fn print_specs(specs: &[TensorSpec]) {
    for spec in specs {
        println!("  {} {} {}", spec.name, spec.dtype, spec.shape);
    }
}

fn run(node: &impl CustomNode, numbers: &[f32], factors: &[f32], params: NodeParams) -> Result<()> {
    let numbers_bytes = f32_bytes(numbers.iter().copied())?;
    let factors_bytes = f32_bytes(factors.iter().copied())?;
    let inputs = [
        TensorRef::new(
            NUMBERS.as_str(),
            DType::F32,
            Shape::from_slice(&[1, numbers.len()]),
            &numbers_bytes,
        ),
        TensorRef::new(
            FACTORS.as_str(),
            DType::F32,
            Shape::from_slice(&[1, factors.len()]),
            &factors_bytes,
        ),
    ];

    let outputs = node
        .execute(&inputs, &params)
        .with_context(|| format!("{} rejected the inputs", node.name()))?;
    tracing::info!(node = node.name(), outputs = outputs.len(), "execution finished");

    for tensor in &outputs {
        print_tensor(tensor);
    }
    Ok(())
}

/// One line per row of the innermost dimension.
fn print_tensor(tensor: &Tensor) {
    println!("{} {} {}", tensor.name, tensor.desc.dtype, tensor.desc.shape);
    let row = tensor.desc.shape.dims().last().copied().unwrap_or(1).max(1);
    for values in tensor.to_f32_vec().chunks(row) {
        let cells: Vec<String> = values.iter().map(f32::to_string).collect();
        println!("  [{}]", cells.join(", "));
    }
}
