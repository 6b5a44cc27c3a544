use clap::{Parser, Subcommand};
use kb_retrieval::commands;
use kb_retrieval::config::{Config, get_config_dir};

#[derive(Parser)]
#[command(name = "kb-retrieval")]
#[command(about = "Hybrid vector + full-text retrieval over a chunked document corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the vector index from the chunk store
    BuildVector {
        /// Chunks per embedding request
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Rebuild the lexical full-text index from the chunk store
    BuildLexical,
    /// Run a query and print the ranked merged results
    Search {
        /// Query text
        query: String,
        /// Results to request from each engine
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Run a query and print the assembled context string
    Context {
        /// Query text
        query: String,
        /// Results to request from each engine
        #[arg(long)]
        top_k: Option<usize>,
        /// Approximate token budget for the context
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Show chunk store and index status
    Status,
    /// Show the active configuration
    Config {
        /// Print the configuration and exit
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(get_config_dir()?)?;

    match cli.command {
        Commands::BuildVector { batch_size } => {
            commands::build_vector(&config, batch_size).await?;
        }
        Commands::BuildLexical => {
            commands::build_lexical(&config).await?;
        }
        Commands::Search { query, top_k } => {
            commands::search(&config, &query, top_k).await?;
        }
        Commands::Context {
            query,
            top_k,
            max_tokens,
        } => {
            commands::context(&config, &query, top_k, max_tokens).await?;
        }
        Commands::Status => {
            commands::status(&config).await?;
        }
        Commands::Config { show } => {
            if show {
                commands::show_config(&config)?;
            } else {
                println!(
                    "Edit {} to change settings, or pass --show to print the active configuration",
                    config.base_dir.join("config.toml").display()
                );
            }
        }
    }

    Ok(())
}
