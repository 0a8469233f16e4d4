use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ai_client::{Gemini, GenerationConfig};
use apify_client::ApifyClient;
use github_client::{GithubClient, RepoRef};
use threadpress_common::Config;
use threadpress_pipeline::{
    generate::GeminiSummarizer,
    notify::build_notifier,
    publish::GithubPublisher,
    source::{default_categories, ApifyThreadSource},
    store::PgRunStore,
    traits::RunStore,
    PipelineDeps, PipelineOrchestrator, PipelineSettings, SchedulerHandle,
};

#[derive(Parser)]
#[command(name = "threadpress", about = "Collect threads, summarize them, publish to GitHub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run on RUN_SCHEDULE until SIGINT/SIGTERM (default)
    Serve,
    /// Run the pipeline once and exit non-zero on failure
    RunOnce,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("threadpress=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    info!("threadpress starting...");

    let config = Config::from_env().context("Failed to load configuration")?;

    // Preflight: database reachable and schema current
    let store = PgRunStore::connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database ready");

    let orchestrator = Arc::new(build_orchestrator(&config, Arc::new(store))?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(orchestrator, &config.run_schedule).await,
        Command::RunOnce => run_once(&orchestrator).await,
    }
}

fn build_orchestrator(config: &Config, store: Arc<dyn RunStore>) -> Result<PipelineOrchestrator> {
    let timeouts = config.timeouts;
    let categories = default_categories();

    let apify = ApifyClient::new(config.apify_api_token.clone());
    let source = ApifyThreadSource::new(apify, store.clone(), categories.clone());

    let gemini = Gemini::new(&config.gemini_api_key, &config.gemini_model)
        .with_config(GenerationConfig {
            max_output_tokens: Some(8192),
            ..GenerationConfig::default()
        })
        .with_timeout(timeouts.generate);
    let generator = GeminiSummarizer::new(gemini, config.gemini_concurrency);

    let repo = RepoRef::parse(&config.github_repo)?;
    let github = GithubClient::new(config.github_token.clone(), repo).with_timeout(timeouts.publish);
    let publisher = GithubPublisher::new(
        github,
        store.clone(),
        &config.github_branch,
        &config.github_base_folder,
    )
    .with_categories(categories);

    let deps = PipelineDeps::builder()
        .source(Arc::new(source))
        .generator(Arc::new(generator))
        .publisher(Arc::new(publisher))
        .notifier(build_notifier(config))
        .store(store)
        .build();

    Ok(PipelineOrchestrator::new(deps, PipelineSettings::from_config(config)))
}

async fn serve(orchestrator: Arc<PipelineOrchestrator>, schedule: &str) -> Result<()> {
    let handle = SchedulerHandle::start(orchestrator, schedule).await?;
    shutdown_signal().await;
    info!("Shutdown signal received, stopping scheduler");
    handle.stop().await
}

async fn run_once(orchestrator: &PipelineOrchestrator) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        ctrl_c.cancel();
    });

    let stats = orchestrator.run(&cancel).await?;
    println!("{stats}");
    if !stats.success() {
        error!(outcome = %stats.outcome, "Pipeline run failed");
        anyhow::bail!("pipeline run ended with outcome {}", stats.outcome);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
