use clap::Parser;
use eyre::Context;
use std::io::IsTerminal;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_uploader::config::{Cli, Command};
use youtube_uploader::credentials::CredentialStore;
use youtube_uploader::drivers::browser::{WebDriverLauncher, capture_login_session};
use youtube_uploader::session::SessionStore;
use youtube_uploader::{DeliveryError, JobRequest, Pipeline, PurgeOutcome, UploadJob};

fn print_json(value: &impl serde::Serialize) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(value).context("encode output")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let Cli { config, command } = Cli::parse();

    match command {
        Command::Authorize => {
            let Some(oauth) = config.oauth() else {
                eyre::bail!("authorize needs --client-id and --client-secret");
            };
            let credential = oauth.authenticate().await.context("authorize with Google")?;
            if credential.refresh_token.is_none() {
                tracing::warn!("Google returned no refresh token; the credential cannot be renewed unattended");
            }
            let store = CredentialStore::new(config.credentials_path());
            store.save(&credential).await?;
            eprintln!("stored API credential in {}", store.path().display());
        }
        Command::Login { wait_mins } => {
            let launcher =
                WebDriverLauncher::new(config.webdriver_url.clone(), false, config.step_timeout());
            let sessions = SessionStore::new(config.session_path());
            capture_login_session(&launcher, &sessions, Duration::from_secs(wait_mins * 60))
                .await?;
            eprintln!("stored browser session in {}", sessions.path().display());
        }
        Command::Deliver { job } => {
            let raw = tokio::fs::read_to_string(&job)
                .await
                .with_context(|| format!("read job file {}", job.display()))?;
            let request: JobRequest = serde_json::from_str(&raw)
                .with_context(|| format!("parse job file {}", job.display()))?;

            let pipeline = Pipeline::from_config(&config)?;
            match pipeline.dispatcher.deliver(UploadJob::new(request)).await {
                Ok(outcome) => print_json(&outcome)?,
                Err(DeliveryError::InvalidJob { job, reason }) => {
                    eyre::bail!("job {} was not attempted: {reason}", job.id);
                }
                Err(e) => return Err(e).context("deliver job"),
            }
        }
        Command::Retry(args) => {
            let pipeline = Pipeline::from_config(&config)?;
            let summary = pipeline
                .coordinator
                .retry_by_type(args.scope, args.max)
                .await
                .context("retry pending uploads")?;
            print_json(&summary)?;
        }
        Command::Schedule { every_mins, retry } => {
            let pipeline = Pipeline::from_config(&config)?;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("cannot listen for Ctrl-C, stopping: {}", e);
                }
            };
            tracing::info!(every_mins, scope = %retry.scope, "starting retry schedule");
            pipeline
                .coordinator
                .run_every(
                    Duration::from_secs(every_mins * 60),
                    retry.scope,
                    retry.max,
                    shutdown,
                )
                .await;
        }
        Command::Stats => {
            let pipeline = Pipeline::from_config(&config)?;
            let stats = pipeline.stats().await.context("collect statistics")?;
            print_json(&stats)?;
        }
        Command::Purge { id } => {
            let pipeline = Pipeline::from_config(&config)?;
            match pipeline.coordinator.purge(id).await.context("purge job")? {
                PurgeOutcome::Abandoned(job) => eprintln!(
                    "abandoned job {id} after {} attempts",
                    job.attempts().len()
                ),
                PurgeOutcome::NotFound => eprintln!("no queued job {id}"),
                PurgeOutcome::InFlight => eprintln!("job {id} is being delivered right now; try again later"),
            }
        }
    }

    Ok(())
}
