//! Command-line and environment configuration.

use crate::drivers::browser::BrowserTimeouts;
use crate::job::JobId;
use crate::oauth::OAuthManager;
use crate::queue::QueueScope;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "youtube-uploader",
    version,
    about = "Publishes rendered videos to YouTube, falling back to browser automation"
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Directory holding credentials, the browser session, the pending queue and the journal.
    #[arg(long, env = "YTU_DATA_DIR", default_value = "./data", global = true)]
    pub data_dir: PathBuf,

    /// OAuth client id. Without it and the secret, expired credentials cannot be refreshed.
    #[arg(long, env = "YOUTUBE_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    #[arg(long, env = "YOUTUBE_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    #[arg(
        long,
        env = "YTU_WEBDRIVER_URL",
        default_value = "http://localhost:4444",
        global = true
    )]
    pub webdriver_url: String,

    /// Show the browser window instead of running headless.
    #[arg(long, env = "YTU_HEADED", global = true)]
    pub headed: bool,

    /// Bound on one API upload, and on the browser's submit step.
    #[arg(long, env = "YTU_API_TIMEOUT_SECS", default_value_t = 900, global = true)]
    pub api_timeout_secs: u64,

    /// How long the browser may take to show the logged-in upload page.
    #[arg(long, env = "YTU_AUTH_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub auth_timeout_secs: u64,

    /// Bound on every other browser interaction.
    #[arg(long, env = "YTU_STEP_TIMEOUT_SECS", default_value_t = 60, global = true)]
    pub step_timeout_secs: u64,
}

impl Config {
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join("pending")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("attempts.jsonl")
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn browser_timeouts(&self) -> BrowserTimeouts {
        BrowserTimeouts {
            auth: Duration::from_secs(self.auth_timeout_secs),
            step: self.step_timeout(),
            upload: self.api_timeout(),
        }
    }

    /// The OAuth application, if both halves of it are configured.
    pub fn oauth(&self) -> Option<OAuthManager> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(OAuthManager::new(id, secret)),
            _ => None,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the OAuth consent flow and store the resulting API credential.
    Authorize,
    /// Open a browser, wait for a manual login and store the session.
    Login {
        /// Minutes to wait for the login to complete.
        #[arg(long, default_value_t = 10)]
        wait_mins: u64,
    },
    /// Deliver one job described by a JSON file.
    Deliver {
        /// `{videoType, mediaPath, metadata}`
        job: PathBuf,
    },
    /// Retry queued jobs once.
    Retry(RetryArgs),
    /// Retry queued jobs on a fixed interval until interrupted.
    Schedule {
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        every_mins: u64,

        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Show queue and journal statistics.
    Stats,
    /// Abandon a queued job.
    Purge { id: JobId },
}

#[derive(Debug, Clone, Args)]
pub struct RetryArgs {
    /// shortform, longform or all
    #[arg(long = "type", default_value = "all")]
    pub scope: QueueScope,

    /// Retry at most this many entries, oldest first.
    #[arg(long)]
    pub max: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::VideoType;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn retry_arguments() {
        let cli = Cli::try_parse_from([
            "youtube-uploader",
            "--data-dir",
            "/srv/uploads",
            "retry",
            "--type",
            "shortform",
            "--max",
            "2",
        ])
        .unwrap();
        let Command::Retry(args) = cli.command else {
            panic!("expected retry");
        };
        assert_eq!(args.scope, QueueScope::Only(VideoType::Shortform));
        assert_eq!(args.max, Some(2));
        assert_eq!(
            cli.config.journal_path(),
            PathBuf::from("/srv/uploads/attempts.jsonl")
        );
    }

    #[test]
    fn retry_defaults_to_everything() {
        let cli = Cli::try_parse_from(["youtube-uploader", "retry"]).unwrap();
        let Command::Retry(args) = cli.command else {
            panic!("expected retry");
        };
        assert_eq!(args.scope, QueueScope::All);
        assert_eq!(args.max, None);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["youtube-uploader", "retry", "--type", "mediumform"]).is_err());
        assert!(Cli::try_parse_from(["youtube-uploader", "schedule", "--every-mins", "0"]).is_err());
        assert!(Cli::try_parse_from(["youtube-uploader", "purge", "not-a-uuid"]).is_err());
    }

    #[test]
    fn timeouts_and_headed_take_flags() {
        let cli = Cli::try_parse_from([
            "youtube-uploader",
            "--headed",
            "--auth-timeout-secs",
            "5",
            "--step-timeout-secs",
            "7",
            "--api-timeout-secs",
            "120",
            "stats",
        ])
        .unwrap();
        assert!(cli.config.headed);
        let t = cli.config.browser_timeouts();
        assert_eq!(t.auth, Duration::from_secs(5));
        assert_eq!(t.step, Duration::from_secs(7));
        assert_eq!(t.upload, Duration::from_secs(120));
    }

    #[test]
    fn every_global_option_has_an_env_fallback() {
        let cmd = Cli::command();
        for arg in cmd.get_arguments().filter(|a| a.is_global_set()) {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            assert!(arg.get_env().is_some(), "--{} has no env fallback", arg.get_id());
        }
    }

    #[test]
    fn oauth_needs_both_halves() {
        let mut cli = Cli::try_parse_from(["youtube-uploader", "stats"]).unwrap();
        cli.config.client_id = Some("id".into());
        cli.config.client_secret = None;
        assert!(cli.config.oauth().is_none());
        cli.config.client_secret = Some("secret".into());
        assert!(cli.config.oauth().is_some());
    }
}
