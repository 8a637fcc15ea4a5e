use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use wirecore::{
    Comparison, ComparisonKind, ConditionSpec, Edge, ExecutionRecord, Handle, Id, Journal,
    Node, NodeError, NodeKind, NoOpKind, RecordState, Value, VarStore,
};
use wirenodes::{BuiltinFactory, MemoryEndpointStore};
use wireruntime::{Coordinator, FlowGraph, RecordSubscriber, RunOptions};

#[derive(Parser)]
#[command(name = "wireflow")]
#[command(about = "Wireflow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial flow variables as a JSON object
        #[arg(short, long)]
        vars: Option<String>,

        /// Show verbose output
        #[arg(short = 'V', long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List built-in node kinds
    Nodes,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

/// On-disk flow representation: metadata plus the node and edge lists.
#[derive(Serialize, Deserialize)]
struct FlowFile {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Prints each execution record as it is emitted.
struct PrintSubscriber;

#[async_trait]
impl RecordSubscriber for PrintSubscriber {
    async fn deliver(&self, record: ExecutionRecord) -> Result<(), NodeError> {
        match record.state {
            RecordState::Running => println!("  ⚡ {} started", record.name),
            RecordState::Success => println!("  ✅ {} succeeded", record.name),
            RecordState::Failure => println!(
                "  ❌ {} failed: {}",
                record.name,
                record.error.as_deref().unwrap_or("unknown error")
            ),
            RecordState::Canceled => println!("  🚫 {} canceled", record.name),
            RecordState::Unspecified => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            vars,
            verbose,
        } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            };
            tracing_subscriber::fmt().with_max_level(level).init();
            run_flow(file, vars).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn load_flow(file: &PathBuf) -> Result<(FlowFile, FlowGraph)> {
    let json = std::fs::read_to_string(file)?;
    let flow: FlowFile = serde_json::from_str(&json)?;
    let graph = FlowGraph::new(flow.nodes.clone(), flow.edges.clone());
    Ok((flow, graph))
}

async fn run_flow(file: PathBuf, vars_json: Option<String>) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());
    let (flow, graph) = load_flow(&file)?;

    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!();

    let vars = VarStore::new();
    if let Some(raw) = vars_json {
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("vars must be a JSON object: {e}"))?;
        for (name, value) in parsed {
            vars.set_flow_var(&name, value).await;
        }
    }

    let factory = Arc::new(BuiltinFactory::local(Arc::new(MemoryEndpointStore::new())));
    let coordinator = Coordinator::new(factory, Journal::new());

    let result = coordinator
        .run_flow(&graph, vars, Arc::new(PrintSubscriber), RunOptions::default())
        .await;

    println!();
    match result {
        Ok(()) => println!("✨ Flow completed successfully"),
        Err(e) => {
            println!("💥 Flow failed: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());
    let (flow, graph) = load_flow(&file)?;
    graph.validate()?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    Ok(())
}

fn list_nodes() {
    println!("📦 Built-in node kinds:");
    println!();
    for (kind, description) in [
        ("no_op", "structural marker; every flow starts with one"),
        ("request", "HTTP call from a bound endpoint template"),
        ("condition", "then/else branch on a comparison"),
        ("for", "counted loop over the `loop` handle's sub-graph"),
        ("for_each", "loop over an array or map from the variable store"),
        ("js", "JavaScript against the variable store"),
    ] {
        println!("  • {kind}");
        println!("    {description}");
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let flow_id = Id::now();
    let start = Node::new(flow_id, "start", NodeKind::NoOp(NoOpKind::Start))
        .with_position(100.0, 100.0);
    let check = Node::new(
        flow_id,
        "check",
        NodeKind::Condition(ConditionSpec {
            comparison: Comparison {
                path: "var.count".to_string(),
                kind: ComparisonKind::Greater,
                value: "2".to_string(),
                expression: String::new(),
            },
        }),
    )
    .with_position(300.0, 100.0);
    let yes = Node::new(flow_id, "yes", NodeKind::NoOp(NoOpKind::Then)).with_position(500.0, 40.0);
    let no = Node::new(flow_id, "no", NodeKind::NoOp(NoOpKind::Else)).with_position(500.0, 160.0);

    let edges = vec![
        Edge::new(flow_id, start.id, check.id, Handle::Unspecified),
        Edge::new(flow_id, check.id, yes.id, Handle::Then),
        Edge::new(flow_id, check.id, no.id, Handle::Else),
    ];
    let flow = FlowFile {
        name: "Example branch flow".to_string(),
        nodes: vec![start, check, yes, no],
        edges,
    };

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  wireflow run --file {} --vars '{{\"count\": 3}}'",
        output.display()
    );
    Ok(())
}
