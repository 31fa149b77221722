use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fragwcc::algorithms::analysis::boundary_analysis;
use fragwcc::algorithms::wcc::{WCCApp, WCCController, WCCResult, WCC};
use fragwcc::config::WCCConfig;
use fragwcc::context::WCCContext;
use fragwcc::driver::{BSPDriver, RunSummary};
use fragwcc::fragment::{Fragment, PartitionView, Partitioner};
use fragwcc::types::CSRGraph;

#[derive(Parser, Debug, Serialize)]
#[command(author, version, about)]
struct Args {
    /// Path of the graph file (t/v/e text format).
    #[arg(short, long, default_value_t = String::from("data/example.graph"))]
    dataset: String,

    /// The task to be performed: wcc, wccn, analysis or gen.
    #[arg(short, long, default_value_t = String::from("wcc"))]
    task: String,

    /// YAML run configuration. Flags below override its values.
    #[arg(short, long)]
    config: Option<String>,

    /// Threads per fragment.
    #[arg(short, long)]
    num_threads: Option<usize>,

    /// Number of fragments.
    #[arg(short, long)]
    fragment_num: Option<u32>,

    /// Partitioner: hash, segmented or community.
    #[arg(short, long)]
    partitioner: Option<String>,

    /// Directory receiving one `result_frag_<fid>` file per fragment.
    #[arg(short, long)]
    output: Option<String>,

    /// Vertex count of a generated graph.
    #[arg(long, default_value_t = 1000)]
    vertex_count: u64,

    /// Edge count of a generated graph.
    #[arg(long, default_value_t = 2000)]
    edge_count: usize,

    /// Seed of the graph generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn load_config(args: &Args) -> anyhow::Result<WCCConfig> {
    let mut wcc_config = match &args.config {
        Some(path) => WCCConfig::from_yaml_file(path)
            .with_context(|| format!("cannot load configuration {path}"))?,
        None => WCCConfig::default(),
    };
    if let Some(thread_num) = args.num_threads {
        wcc_config.thread_num = thread_num;
    }
    if let Some(fragment_num) = args.fragment_num {
        wcc_config.fragment_num = fragment_num;
    }
    if let Some(name) = &args.partitioner {
        wcc_config.partitioner = name.parse::<Partitioner>()?;
    }
    wcc_config.validate()?;
    Ok(wcc_config)
}

fn write_results(
    output: &str,
    fragments: &[Fragment],
    summary: &RunSummary<WCCContext>,
) -> anyhow::Result<()> {
    let dir = Path::new(output);
    fs::create_dir_all(dir).with_context(|| format!("cannot create {output}"))?;
    for (frag, ctx) in fragments.iter().zip(&summary.contexts) {
        let path = dir.join(format!("result_frag_{}", frag.fid()));
        let mut writer = BufWriter::new(fs::File::create(&path)?);
        ctx.output(frag, &mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), "result written");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Args = Args::parse();
    let wcc_config = load_config(&args)?;
    info!(?wcc_config, dataset = %args.dataset, task = %args.task, "starting");

    if args.task == "gen" {
        let graph = CSRGraph::random(args.vertex_count, args.edge_count, args.seed)?;
        graph.write_graph_file(&args.dataset)?;
        println!(
            "Generated {} vertices and {} edges into {}.",
            args.vertex_count, args.edge_count, args.dataset
        );
        return Ok(());
    }

    // Step 1: Load the graph.
    let graph = CSRGraph::from_graph_file(&args.dataset)
        .with_context(|| format!("cannot load graph {}", args.dataset))?;

    // Step 2. Perform the task, and report the time.
    if args.task == "wcc" {
        let start = Instant::now();
        let fragments = Fragment::build_fragments(&graph, wcc_config.partitioner, wcc_config.fragment_num)?;
        let summary = BSPDriver::new(&wcc_config).run(&WCCApp, &fragments)?;
        let duration = start.elapsed();

        if let Some(output) = &args.output {
            write_results(output, &fragments, &summary)?;
        }
        let result = WCCResult::from_summary(&fragments, &summary);
        println!(
            "WCC: {} components, {} supersteps, {} messages.",
            result.component_count(),
            result.supersteps,
            result.messages
        );
        println!("WCC Elapsed Time: {:?} us", duration.as_micros());
    } else if args.task == "wccn" {
        let wcc_controller = WCCController::new(Arc::new(graph));
        let start = Instant::now();
        let count = wcc_controller.count_wcc(&wcc_config)?;
        let duration = start.elapsed();
        println!("WCC Count: {count}");
        println!("WCC Elapsed Time: {:?} us", duration.as_micros());
    } else if args.task == "analysis" {
        let fragments = Fragment::build_fragments(&graph, wcc_config.partitioner, wcc_config.fragment_num)?;
        let stats = boundary_analysis(&fragments);
        println!(
            "Dataset: {}, Vertex Count: {}, Fragments: {}, Outer Vertices: {}, Cut Edges: {}",
            args.dataset,
            graph.vertex_count,
            fragments.len(),
            stats.outer_vertices,
            stats.cut_edges
        );
    } else {
        bail!("Task {} not supported.", args.task);
    }
    Ok(())
}
