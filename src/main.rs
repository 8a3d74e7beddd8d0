//! repograph - code graph builder for Python repositories
//!
//! A command-line tool that builds containment, import and call graphs,
//! stores them in SQLite and answers structural queries over them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use repograph::core::batch::{self, BatchSummary, ProjectOutcome, ProjectResult};
use repograph::core::export;
use repograph::core::graph::{CodeGraph, Relationship};
use repograph::core::query::{Direction, QueryExecutor};
use repograph::core::{BuildReport, ProjectBuilder};
use repograph::{server, Config, Database, LanguageRegistry};

/// repograph - code graph builder for Python repositories
#[derive(Parser)]
#[command(name = "repograph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Gml,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Build the graph of one repository
    Build {
        /// Path to the repository root
        path: PathBuf,

        /// Repository name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Path to SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Also write the graph to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format of --output
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Do not store the graph in the database
        #[arg(long)]
        no_store: bool,

        /// Resolve calls without a language server
        #[arg(long)]
        no_oracle: bool,
    },

    /// Build every repository under a directory
    Batch {
        /// Directory holding the repositories
        parent: PathBuf,

        /// 1 = direct subdirectories, 2 = category/repo
        #[arg(long)]
        depth: Option<usize>,

        /// Projects built concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Path to SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Write one <repo>.json per project into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Resolve calls without a language server
        #[arg(long)]
        no_oracle: bool,
    },

    /// Query a stored graph
    Query {
        /// Path to SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Project name (defaults to the only stored project)
        #[arg(short, long)]
        project: Option<String>,

        /// Read the graph from a JSON export instead of the database
        #[arg(short, long, conflicts_with_all = ["database", "project"])]
        graph: Option<PathBuf>,

        #[command(subcommand)]
        query_type: QueryCommands,
    },

    /// List all projects
    Projects {
        /// Path to SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// List supported languages
    Languages,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        #[arg(default_value = "repograph.toml")]
        output: PathBuf,
    },

    /// Show server status
    Status {
        /// Host to connect to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to connect to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Show a node with its parent, module and children
    Node {
        /// Qualified name
        qname: String,
    },

    /// Show the siblings declared above and below a node
    Context {
        /// Qualified name
        qname: String,
    },

    /// Show the imports of the module enclosing a node
    Imports {
        /// Qualified name
        qname: String,
    },

    /// Show one-hop neighbours over a relationship
    Neighbors {
        /// Qualified name
        qname: String,

        /// contains, imports or calls
        #[arg(short, long, default_value = "calls")]
        relationship: Relationship,

        /// incoming, outgoing or both
        #[arg(short, long, default_value = "both")]
        direction: Direction,
    },
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("repograph={},tower_http={}", level, level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration: {:?}", path)),
        None => Ok(Config::default()),
    }
}

fn open_database(config: &Config, database: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = database.unwrap_or_else(|| config.database.path.clone());
    let db = Database::open(&path)?;
    db.init_schema()?;
    Ok(db)
}

/// Resolve an optional project name to a stored project
fn resolve_project(db: &Database, project: Option<&str>) -> anyhow::Result<String> {
    match project {
        Some(p) => db
            .get_project_by_name(p)?
            .map(|proj| proj.name)
            .ok_or_else(|| anyhow::anyhow!("Project '{}' not found", p)),
        None => {
            let projects = db.list_projects()?;
            if projects.is_empty() {
                anyhow::bail!("No projects found. Use 'repograph build' to create one.");
            }
            if projects.len() > 1 {
                eprintln!("Multiple projects found. Use --project to specify one:");
                for p in &projects {
                    eprintln!("  - {} (path={})", p.name, p.root_path);
                }
                anyhow::bail!("Please specify a project with --project <name>");
            }
            Ok(projects[0].name.clone())
        }
    }
}

fn write_output(graph: &CodeGraph, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => export::write_json(graph, path),
        OutputFormat::Gml => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            export::write_gml(graph, &mut file)?;
            Ok(())
        }
    }
}

fn report_of(result: &ProjectResult) -> Option<&BuildReport> {
    match &result.outcome {
        ProjectOutcome::Complete { report } | ProjectOutcome::Partial { report, .. } => {
            Some(report)
        }
        ProjectOutcome::Failed { .. } | ProjectOutcome::Cancelled => None,
    }
}

fn run_query(graph: &CodeGraph, query: QueryCommands) -> anyhow::Result<String> {
    let executor = QueryExecutor::new(graph);
    let output = match query {
        QueryCommands::Node { qname } => serde_json::to_string_pretty(&executor.node_detail(&qname)?)?,
        QueryCommands::Context { qname } => serde_json::to_string_pretty(&executor.context(&qname)?)?,
        QueryCommands::Imports { qname } => {
            serde_json::to_string_pretty(&executor.imports_of_module(&qname)?)?
        }
        QueryCommands::Neighbors {
            qname,
            relationship,
            direction,
        } => serde_json::to_string_pretty(&executor.neighbors(&qname, relationship, direction)?)?,
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            database,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(database) = database {
                config.database.path = database;
            }
            info!(
                "Starting repograph server on {}:{}",
                config.server.host, config.server.port
            );
            server::run_server(Arc::new(config)).await?;
        }

        Commands::Build {
            path,
            name,
            database,
            output,
            format,
            no_store,
            no_oracle,
        } => {
            if no_oracle {
                config.oracle.enabled = false;
            }
            let builder = ProjectBuilder::new(config.clone());
            let outcome =
                tokio::task::spawn_blocking(move || builder.build(&path, name.as_deref())).await??;

            if let Some(output) = output {
                write_output(&outcome.graph, &output, format)?;
                info!("Graph written to {:?}", output);
            }
            if !no_store {
                let mut db = open_database(&config, database)?;
                let root = outcome.report.root.to_string_lossy().into_owned();
                db.save_graph(&root, &outcome.graph, Some(&outcome.report))?;
            }
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }

        Commands::Batch {
            parent,
            depth,
            workers,
            database,
            output_dir,
            no_oracle,
        } => {
            if no_oracle {
                config.oracle.enabled = false;
            }
            if let Some(workers) = workers {
                config.batch.workers = workers;
            }
            let depth = depth.unwrap_or(config.batch.discovery_depth);
            let repositories = batch::discover_repositories(&parent, depth)?;
            info!("Discovered {} repositories under {:?}", repositories.len(), parent);

            if let Some(dir) = &output_dir {
                fs::create_dir_all(dir)?;
            }
            let mut db = open_database(&config, database)?;
            let cancel = batch::cancel_on_ctrl_c();

            let results = batch::run_batch(Arc::new(config), repositories, cancel, |result, graph| {
                let root = result.root.to_string_lossy().into_owned();
                db.save_graph(&root, graph, report_of(result))?;
                if let Some(dir) = &output_dir {
                    export::write_json(graph, &dir.join(format!("{}.json", graph.repo_name())))?;
                }
                Ok(())
            })
            .await;

            println!("{}", serde_json::to_string_pretty(&results)?);
            let summary = BatchSummary::of(&results);
            println!(
                "complete: {}, partial: {}, failed: {}, cancelled: {}",
                summary.complete, summary.partial, summary.failed, summary.cancelled
            );
        }

        Commands::Query {
            database,
            project,
            graph,
            query_type,
        } => {
            let graph = match graph {
                Some(path) => export::read_json(&path)?,
                None => {
                    let db = open_database(&config, database)?;
                    let name = resolve_project(&db, project.as_deref())?;
                    db.load_graph(&name)?
                        .ok_or_else(|| anyhow::anyhow!("Project '{}' has no stored graph", name))?
                }
            };
            println!("{}", run_query(&graph, query_type)?);
        }

        Commands::Projects { database } => {
            let db = open_database(&config, database)?;
            let projects = db.list_projects()?;

            if projects.is_empty() {
                println!("No projects found.");
            } else {
                println!("Projects:");
                for p in projects {
                    let status = db.get_project_status(&p.name)?;
                    let (nodes, edges, state) = status
                        .map(|s| (s.nodes_count, s.edges_count, s.status))
                        .unwrap_or_default();
                    println!(
                        "  - {} ({}, nodes={}, edges={}, path={})",
                        p.name, state, nodes, edges, p.root_path
                    );
                }
            }
        }

        Commands::Languages => {
            let registry = LanguageRegistry::new();
            println!("Supported languages:");
            for lang in registry.list_languages() {
                println!(
                    "  - {} (extensions: {})",
                    lang.language_id(),
                    lang.file_extensions().join(", ")
                );
            }
        }

        Commands::InitConfig { output } => {
            config.to_file(&output)?;
            println!("Configuration written to {:?}", output);
        }

        Commands::Status { host, port } => {
            let url = format!("http://{}:{}/api/v1/health", host, port);
            match reqwest::get(&url).await {
                Ok(resp) => {
                    if resp.status().is_success() {
                        println!("Server is running at {}:{}", host, port);
                    } else {
                        println!("Server returned status: {}", resp.status());
                    }
                }
                Err(e) => {
                    println!("Failed to connect to server: {}", e);
                }
            }
        }
    }

    Ok(())
}
