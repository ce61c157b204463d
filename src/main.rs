use std::path::PathBuf;

use clap::Parser;
use rust_nnir_compiler::{
    ConvertOptions, GraphError, TensorKind, convert_to_dir, graph_to_dot, load_net_from_path,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compile a Caffe model into an NNIR graph", long_about = None)]
struct Cli {
    /// Path to the JSON rendition of the Caffe network, trained blobs included.
    model: PathBuf,
    /// Directory receiving `graph.nnir` and the `.raw` variable payloads.
    out_dir: PathBuf,
    /// Graph input dimensions as N,C,H,W. Defaults to the model's Input layer shape.
    #[arg(long, value_parser = parse_dims)]
    input_dims: Option<[usize; 4]>,
    /// Optional override for the tensor byte length limit.
    #[arg(long)]
    tensor_limit: Option<usize>,
    /// Optional path to write a Graphviz DOT export of the graph.
    #[arg(long)]
    export_dot: Option<PathBuf>,
}

fn parse_dims(value: &str) -> Result<[usize; 4], String> {
    let dims = value
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .map_err(|err| format!("invalid dimension `{}`: {}", dim, err))
        })
        .collect::<Result<Vec<_>, _>>()?;
    dims.try_into()
        .map_err(|dims: Vec<usize>| format!("expected N,C,H,W, got {} dimensions", dims.len()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("NNIR_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    let net = load_net_from_path(&cli.model)?;

    let mut options = ConvertOptions::default();
    options.input_dims = cli.input_dims;
    if let Some(limit) = cli.tensor_limit {
        options.tensor_byte_length_limit = limit;
    }
    let graph = convert_to_dir(&net, options, &cli.out_dir)?;

    println!(
        "Compiled `{}` into `{}` with {} tensors and {} nodes.",
        cli.model.display(),
        cli.out_dir.display(),
        graph.tensors.len(),
        graph.nodes.len()
    );
    for kind in [TensorKind::Input, TensorKind::Output] {
        for tensor in graph.tensors_of_kind(kind) {
            println!(
                "  {:?} {}: {} {:?}",
                kind, tensor.name, tensor.data_type, tensor.shape
            );
        }
    }

    if let Some(dot_path) = cli.export_dot {
        let dot = graph_to_dot(&graph);
        std::fs::write(&dot_path, dot).map_err(|err| GraphError::export(dot_path.clone(), err))?;
        println!("Exported Graphviz DOT to `{}`.", dot_path.display());
    }
    Ok(())
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
