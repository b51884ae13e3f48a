use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use transit_graph::configuration::{ImportConfiguration, StoreLocation, DEFAULT_BATCH_SIZE};
use transit_graph::graph_store::{GraphStore, MemoryGraphStore, SqliteGraphStore};
use transit_graph::import::{Importer, PhaseOutcome};

/// Rebuilds the transit graph from the feed files of a data directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the feed files
    #[arg(long, env = "TRANSIT_GRAPH_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    #[arg(long, default_value = "stops.txt")]
    stops: String,
    #[arg(long, default_value = "shapes.txt")]
    shapes: String,
    #[arg(long, default_value = "routes.txt")]
    routes: String,
    #[arg(long, default_value = "schedules.txt")]
    schedules: String,
    /// SQLite file, or `:memory:` for a graph that only lives during the run
    #[arg(long, env = "TRANSIT_GRAPH_DATABASE", default_value = "transit-graph.db")]
    database: String,
    /// Rows written to the store at once
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Do not ask for confirmation before wiping the graph
    #[arg(long)]
    yes: bool,
}

impl Args {
    fn configuration(self) -> ImportConfiguration {
        ImportConfiguration {
            data_dir: self.data_dir,
            stops_file: self.stops,
            shapes_file: self.shapes,
            routes_file: self.routes,
            schedules_file: self.schedules,
            store: StoreLocation::from_arg(&self.database),
            batch_size: self.batch_size,
            ..Default::default()
        }
    }
}

fn confirm_rebuild() -> anyhow::Result<bool> {
    print!("Rebuild the graph from scratch? (y/n) ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn open_store(location: &StoreLocation) -> anyhow::Result<Box<dyn GraphStore>> {
    Ok(match location {
        StoreLocation::Memory => Box::new(MemoryGraphStore::new()),
        StoreLocation::Sqlite(path) => Box::new(
            SqliteGraphStore::open(path).with_context(|| format!("Connect to {location}"))?,
        ),
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let yes = args.yes;
    let config = args.configuration();

    if !yes && !confirm_rebuild()? {
        bail!("rebuild cancelled, {} left untouched", config.store);
    }

    let mut store = open_store(&config.store)?;
    info!("rebuilding {} from {}", config.store, config.data_dir.display());
    let report = Importer::new(store.as_mut(), &config)
        .run_full_rebuild()
        .context("Rebuild graph")?;

    for outcome in &report.phases {
        match outcome {
            PhaseOutcome::Completed(phase) => info!("{phase}"),
            PhaseOutcome::Skipped { phase, path } => {
                warn!("{phase}: skipped, {} not found", path.display())
            }
        }
    }
    println!("{}", report.summary);
    Ok(())
}
