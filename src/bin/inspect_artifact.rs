//! Artifact Inspection Tool
//!
//! Prints the tensor table of a converted model: name, shape, dtype and
//! quantization parameters, followed by the operator list.
//!
//! Usage:
//!   cargo run --release --bin inspect_artifact -- --artifact output/artifacts/model_quant.tedge

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;

use tinyedge::convert::{EdgeModel, Quantization};
use tinyedge::interpreter::Interpreter;
use tinyedge::utils::format_bytes;

/// Print the tensors and operators of an edge artifact
#[derive(Parser, Debug)]
#[command(name = "inspect_artifact")]
#[command(about = "Inspect a converted edge artifact")]
struct Args {
    /// Path to the artifact
    #[arg(short, long)]
    artifact: PathBuf,

    /// Write the tensor table as JSON instead of printing it
    #[arg(long)]
    json: Option<PathBuf>,

    /// Also list constant tensors (weights and biases)
    #[arg(long, default_value = "false")]
    constants: bool,
}

/// One row of the tensor table
#[derive(Serialize)]
struct TensorRow {
    index: usize,
    name: String,
    shape: Vec<usize>,
    dtype: String,
    constant: bool,
    /// Per-tensor scale, or the first per-channel scale
    scale: Option<f32>,
    zero_point: Option<i32>,
    channels: Option<usize>,
}

#[derive(Serialize)]
struct ArtifactSummary {
    description: String,
    size_bytes: u64,
    constant_bytes: usize,
    activation_bytes: usize,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    operators: Vec<String>,
    tensors: Vec<TensorRow>,
}

fn rows(model: &EdgeModel) -> Vec<TensorRow> {
    model
        .tensors
        .iter()
        .enumerate()
        .map(|(index, t)| {
            let (scale, zero_point, channels) = match &t.quantization {
                Some(Quantization::PerTensor(p)) => (Some(p.scale), Some(p.zero_point), None),
                Some(Quantization::PerChannel {
                    scales,
                    zero_points,
                    ..
                }) => (
                    scales.first().copied(),
                    zero_points.first().copied(),
                    Some(scales.len()),
                ),
                None => (None, None, None),
            };
            TensorRow {
                index,
                name: t.name.clone(),
                shape: t.shape.clone(),
                dtype: t.dtype.to_string(),
                constant: t.is_constant(),
                scale,
                zero_point,
                channels,
            }
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let bytes = fs::read(&args.artifact)
        .with_context(|| format!("Failed to read {:?}", args.artifact))?;
    let interpreter = Interpreter::from_bytes(&bytes)?;
    let model = interpreter.model();

    let summary = ArtifactSummary {
        description: model.description.clone(),
        size_bytes: bytes.len() as u64,
        constant_bytes: model.constant_bytes(),
        activation_bytes: interpreter.activation_bytes(),
        inputs: model.inputs.clone(),
        outputs: model.outputs.clone(),
        operators: model.operators.iter().map(|op| op.name().to_string()).collect(),
        tensors: rows(model),
    };

    if let Some(path) = &args.json {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        println!("Wrote {:?}", path);
        return Ok(());
    }

    println!("{}", summary.description.cyan().bold());
    println!(
        "  Size: {} ({} constants, {} activations)",
        format_bytes(summary.size_bytes),
        format_bytes(summary.constant_bytes as u64),
        format_bytes(summary.activation_bytes as u64)
    );
    println!("  Operators: {}", summary.operators.join(" → "));
    println!();

    println!(
        "{}",
        format!(
            "{:>4}  {:<28} {:<16} {:<8} {:>12} {:>6}",
            "#", "name", "shape", "dtype", "scale", "zp"
        )
        .bold()
    );
    for row in summary.tensors.iter().filter(|r| args.constants || !r.constant) {
        let mut name = row.name.clone();
        if summary.inputs.contains(&row.index) {
            name.push_str(" (in)");
        } else if summary.outputs.contains(&row.index) {
            name.push_str(" (out)");
        }
        let scale = match (row.scale, row.channels) {
            (Some(s), Some(c)) => format!("{:.3e}×{}", s, c),
            (Some(s), None) => format!("{:.3e}", s),
            _ => "-".to_string(),
        };
        println!(
            "{:>4}  {:<28} {:<16} {:<8} {:>12} {:>6}",
            row.index,
            name,
            format!("{:?}", row.shape),
            row.dtype,
            scale,
            row.zero_point.map_or("-".to_string(), |z| z.to_string())
        );
    }

    Ok(())
}
