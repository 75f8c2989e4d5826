use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finrag::context::{LIMITER_SWEEP_INTERVAL, ServingContext, build_collaborators};
use finrag::{api, config, logging};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "finrag", version, about = "Question answering over an indexed document corpus")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Build and persist the index from the corpus, then exit.
    Ingest,
    /// Answer one question against the persisted index.
    Query {
        /// Question to answer.
        question: String,
        /// Number of chunks to cite.
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("invalid configuration")?;
    logging::init_tracing(config.environment);
    config.log_summary();

    let collaborators = build_collaborators(config).context("failed to initialise providers")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let context = ServingContext::bootstrap(config.clone(), collaborators).await;
            let _sweeper = context.spawn_limiter_sweep(LIMITER_SWEEP_INTERVAL);
            let app = api::create_router(context);

            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.server_port))
                .await
                .with_context(|| format!("failed to bind port {}", config.server_port))?;
            tracing::info!(
                environment = config.environment.as_str(),
                "Listening on http://0.0.0.0:{}",
                config.server_port
            );
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("server error")?;
        }
        Command::Ingest => {
            let context = ServingContext::new(config.clone(), collaborators);
            let chunks = context.ingestion.run_sync().await?;
            println!("Indexed {chunks} chunks into {}", config.index_path().display());
        }
        Command::Query { question, k } => {
            let context = ServingContext::new(config.clone(), collaborators);
            context
                .load_persisted()
                .await
                .context("failed to load the persisted index")?;
            let answer = context.query.answer(&question, k).await?;
            println!("{}", answer.answer);
            for citation in &answer.citations {
                match citation.page {
                    Some(page) => println!("  - {} (page {page}) [{}]", citation.source, citation.chunk_id),
                    None => println!("  - {} [{}]", citation.source, citation.chunk_id),
                }
            }
        }
    }

    Ok(())
}
