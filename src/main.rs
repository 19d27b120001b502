#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vibescout::providers::ChatTurn;
use vibescout::search::SearchOptions;
use vibescout::service::Service;

#[derive(Parser)]
#[command(name = "vibescout")]
#[command(about = "Code search and indexing engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a folder into the vector store
    Index {
        /// Folder to index
        path: PathBuf,
        /// Project name (defaults to the folder's basename)
        #[arg(long)]
        project: Option<String>,
        /// Collection to index into
        #[arg(long, default_value = "default")]
        collection: String,
        /// Skip LLM summarization of indexed chunks
        #[arg(long)]
        no_summarize: bool,
        /// Re-index files even when their content hash hasn't changed
        #[arg(long)]
        force: bool,
        /// Queue the run and return immediately instead of blocking
        #[arg(long)]
        background: bool,
    },

    /// Show the current indexing progress snapshot
    Status,

    /// Hybrid vector + keyword search
    Search {
        query: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 15)]
        limit: usize,
    },

    /// Ask a question; answers are grounded on search results
    Chat {
        query: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },

    /// Start watching a folder for incremental re-indexing
    Watch {
        path: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "default")]
        collection: String,
    },

    /// Move every record of a project to a different collection
    MoveProject {
        project: String,
        new_collection: String,
    },

    /// Show the recorded imports/exports of one file
    GetDeps { file_path: String },

    /// Find every file whose imports or exports reference a symbol
    FindUsages { symbol: String },

    /// List every collection and the projects indexed into it
    ListKb,

    /// Print a 1-based inclusive line range from a file on disk
    ReadRange {
        file_path: String,
        start_line: u32,
        end_line: u32,
    },

    /// Print the embedding model currently in use
    GetModel,

    /// Validate (and record intent to switch to) an embedding model
    SetModel { model_name: String },

    /// Delete every indexed record
    Clear,
}

fn init_logging(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vibescout={log_level}").into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let worker_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads((worker_threads / 2).max(2))
        .thread_name("vibescout-worker")
        .enable_all()
        .build()?;

    rt.block_on(run(cli.command))
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let service = Service::open().await?;

    match command {
        Commands::Index {
            path,
            project,
            collection,
            no_summarize,
            force,
            background,
        } => {
            let summary = service
                .index_folder(&path, project, collection, !no_summarize, background, force)
                .await?;
            match summary {
                Some(s) => println!("{}", serde_json::to_string_pretty(&summary_json(&s))?),
                None => println!("queued for background indexing"),
            }
        }
        Commands::Status => {
            let progress = service.get_indexing_status();
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::Search {
            query,
            collection,
            project,
            limit,
        } => {
            let opts = SearchOptions {
                collection,
                project_name: project,
                limit,
                ..Default::default()
            };
            let results = service.search_code(&query, opts).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Chat {
            query,
            collection,
            project,
        } => {
            let opts = SearchOptions {
                collection,
                project_name: project,
                ..Default::default()
            };
            let reply = service.chat(&query, opts, &[] as &[ChatTurn]).await?;
            println!("{reply}");
        }
        Commands::Watch {
            path,
            project,
            collection,
        } => {
            service.watch_folder(&path, project, collection).await?;
            println!("watching {}", path.display());
            tokio::signal::ctrl_c().await?;
        }
        Commands::MoveProject {
            project,
            new_collection,
        } => {
            service.move_project(&project, &new_collection).await?;
            println!("moved {project} to {new_collection}");
        }
        Commands::GetDeps { file_path } => {
            let deps = service.get_file_dependencies(&file_path).await?;
            println!("{}", serde_json::to_string_pretty(&deps)?);
        }
        Commands::FindUsages { symbol } => {
            let usages = service.find_symbol_usages(&symbol).await?;
            println!("{}", serde_json::to_string_pretty(&usages)?);
        }
        Commands::ListKb => {
            let kb = service.list_knowledge_base().await?;
            println!("{}", serde_json::to_string_pretty(&kb)?);
        }
        Commands::ReadRange {
            file_path,
            start_line,
            end_line,
        } => {
            let content = service.read_code_range(&file_path, start_line, end_line).await?;
            println!("{content}");
        }
        Commands::GetModel => {
            println!("{}", service.get_current_model());
        }
        Commands::SetModel { model_name } => {
            service.set_model(&model_name).await?;
            println!("model compatible: {model_name}");
        }
        Commands::Clear => {
            service.clear_index().await?;
            println!("cleared");
        }
    }

    Ok(())
}

fn summary_json(summary: &vibescout::pipeline::IndexSummary) -> serde_json::Value {
    serde_json::json!({
        "project_name": summary.project_name,
        "total_files": summary.total_files,
        "processed_files": summary.processed_files,
        "skipped_files": summary.skipped_files,
        "failed_files": summary.failed_files,
        "pruned_files": summary.pruned_files,
    })
}
