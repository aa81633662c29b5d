//! pan_share CLI - Save shared cloud-storage links into your own storage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pan_share::config::validate_passcode;
use pan_share::models::ROOT_FOLDER_ID;
use pan_share::{
    parse_share_text, read_entries, AllOf, BatchCoordinator, Config, ConflictPolicy,
    CreateShareOptions, ExtensionFilter, FileCredentialStore, GlobFilter, HttpGateway, Outcome,
    PanApi, PanError, QrLoginAcquirer, SaveOptions, SessionManager, ShareTransfer, SizeFilter,
    TaskPoller,
};

/// CLI tool for saving shared cloud-storage links.
#[derive(Parser)]
#[command(name = "pan_share")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "PAN_SHARE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Where login cookies are persisted.
    #[arg(long, global = true)]
    cookie_file: Option<PathBuf>,

    /// Log debug output.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with a QR code (falls back to pasting a cookie header).
    Login {
        /// Ignore stored cookies and log in again.
        #[arg(long)]
        force: bool,
    },

    /// Remove stored login cookies.
    Logout,

    /// Show whether the stored session is accepted.
    Status,

    /// Extract the share link and extraction code from text.
    Parse {
        text: String,

        #[arg(long)]
        json: bool,
    },

    /// List the top-level contents of a share.
    Inspect { text: String },

    /// Save one share.
    Save {
        /// Text containing the share link.
        text: String,

        #[command(flatten)]
        save: SaveArgs,
    },

    /// Save every share listed in a file (one per line, note after a tab or " # ").
    Batch {
        file: PathBuf,

        /// Shares processed concurrently.
        #[arg(long)]
        workers: Option<usize>,

        /// Overall deadline for the batch, in seconds.
        #[arg(long)]
        batch_timeout: Option<u64>,

        #[command(flatten)]
        save: SaveArgs,
    },

    /// Manage shares of your own files.
    Share {
        #[command(subcommand)]
        action: ShareCommand,
    },
}

#[derive(Subcommand)]
enum ShareCommand {
    /// Share files or folders from your storage.
    Create {
        /// File or folder ids to share.
        #[arg(required = true)]
        fids: Vec<String>,

        /// Days until the link expires (0 = never).
        #[arg(long)]
        expire_days: Option<u32>,

        /// Extraction code required to open the link.
        #[arg(long)]
        passcode: Option<String>,

        /// Maximum number of downloads (0 = unlimited).
        #[arg(long)]
        download_limit: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// List your shares.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Cancel a share.
    Delete { share_id: String },
}

#[derive(Args)]
struct SaveArgs {
    /// Destination folder id.
    #[arg(long, short = 't', default_value = ROOT_FOLDER_ID)]
    to: String,

    /// Only save files with these extensions (e.g. mp4,mkv).
    #[arg(long)]
    ext: Option<String>,

    /// Only save files whose name matches this glob.
    #[arg(long)]
    glob: Option<String>,

    /// Minimum file size in bytes.
    #[arg(long)]
    min_size: Option<u64>,

    /// Maximum file size in bytes.
    #[arg(long)]
    max_size: Option<u64>,

    /// Save into a new subfolder named after the share.
    #[arg(long)]
    subfolder: bool,

    /// Subfolder name (implies --subfolder).
    #[arg(long)]
    name: Option<String>,

    /// What to do when the subfolder already exists: merge, suffix or overwrite.
    #[arg(long)]
    conflict: Option<ConflictPolicy>,

    /// Seconds to wait for each transfer task.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

impl SaveArgs {
    fn options(&self, config: &Config) -> Result<SaveOptions> {
        let mut options = SaveOptions::from_config(config, self.to.clone());

        let mut filter = AllOf::new();
        if let Some(ext) = &self.ext {
            filter = filter.with(ExtensionFilter::parse(ext));
        }
        if let Some(pattern) = &self.glob {
            filter = filter.with(GlobFilter::new(pattern)?);
        }
        if self.min_size.is_some() || self.max_size.is_some() {
            filter = filter.with(SizeFilter {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if !filter.is_empty() {
            options.filter = Some(Arc::new(filter));
        }

        options.create_subfolder = self.subfolder || self.name.is_some();
        options.subfolder_name = self.name.clone();
        if let Some(policy) = self.conflict {
            options.conflict_policy = policy;
        }
        if let Some(secs) = self.timeout {
            options.task_timeout = Duration::from_secs(secs);
        }
        Ok(options)
    }
}

struct App {
    config: Config,
    session: Arc<SessionManager>,
    api: PanApi,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let acquirer = QrLoginAcquirer::new(&config).context("Failed to set up login client")?;
        let store = FileCredentialStore::new(config.cookie_file());
        let session = Arc::new(SessionManager::new(
            Arc::new(acquirer),
            Arc::new(store),
            config.qr_timeout(),
        ));
        let gateway = HttpGateway::new(&config).context("Failed to set up HTTP client")?;
        let api = PanApi::new(Arc::new(gateway), session.clone(), config.page_size);
        Ok(Self {
            config,
            session,
            api,
        })
    }

    fn transfer(&self) -> ShareTransfer {
        let poller = TaskPoller::new(self.api.clone(), self.config.poll.clone());
        ShareTransfer::new(self.api.clone(), poller, self.config.transfer.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "pan_share=debug"
    } else {
        "pan_share=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.cookie_file {
        config.cookie_file = Some(path);
    }

    match cli.command {
        Commands::Parse { text, json } => {
            let share = parse_share_text(&text)
                .with_context(|| format!("No share link found in: {}", text))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&share)?);
            } else {
                println!("Share ID: {}", share.share_id);
                println!("Password: {}", share.password.as_deref().unwrap_or("-"));
                println!("URL:      {}", share.raw_url);
            }
        }

        Commands::Login { force } => {
            let app = App::new(config)?;
            app.session.login(force).await.context("Login failed")?;
            let account = app.api.account_info().await.context("Failed to verify login")?;
            println!(
                "Logged in as {}",
                account.nickname.as_deref().unwrap_or("(unknown)")
            );
        }

        Commands::Logout => {
            let app = App::new(config)?;
            app.session.logout().await.context("Failed to clear login state")?;
            println!("Logged out.");
        }

        Commands::Status => {
            let store = FileCredentialStore::new(config.cookie_file());
            let stored = pan_share::CredentialStore::load(&store)
                .with_context(|| format!("Failed to read {:?}", store.path()))?;
            if stored.is_none() {
                println!("Not logged in.");
                return Ok(());
            }

            let app = App::new(config)?;
            match app.api.account_info().await {
                Ok(account) => println!(
                    "Logged in as {}",
                    account.nickname.as_deref().unwrap_or("(unknown)")
                ),
                Err(PanError::Auth(message)) => println!("Session rejected: {}", message),
                Err(err) => return Err(err).context("Failed to check session"),
            }
        }

        Commands::Inspect { text } => {
            let share = parse_share_text(&text)
                .with_context(|| format!("No share link found in: {}", text))?;
            let app = App::new(config)?;
            let token = app
                .api
                .share_token(&share)
                .await
                .with_context(|| format!("Failed to open share: {}", share.raw_url))?;
            let entries = app
                .api
                .share_entries(&share, &token.stoken, ROOT_FOLDER_ID)
                .await
                .with_context(|| format!("Failed to list share: {}", share.raw_url))?;

            if let Some(title) = &token.title {
                println!("{}", title);
            }
            if entries.is_empty() {
                println!("No files found.");
            } else {
                println!("{:<34} {:>10} {:<5} {}", "ID", "SIZE", "TYPE", "NAME");
                println!("{}", "-".repeat(80));
                for entry in entries {
                    println!("{}", entry);
                }
            }
        }

        Commands::Save { text, save } => {
            let share = parse_share_text(&text)
                .with_context(|| format!("No share link found in: {}", text))?;
            let options = save.options(&config)?;
            let app = App::new(config)?;

            let outcome = app
                .transfer()
                .save_share(&share, &options, &CancellationToken::new())
                .await;
            if save.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}: {}", share.raw_url, outcome);
            }
            if matches!(outcome, Outcome::Failure { .. }) {
                bail!("Transfer of {} failed", share.raw_url);
            }
        }

        Commands::Batch {
            file,
            workers,
            batch_timeout,
            save,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read batch file: {:?}", file))?;
            let entries = read_entries(&text);
            if entries.is_empty() {
                println!("No entries in {:?}.", file);
                return Ok(());
            }

            let options = save.options(&config)?;
            let mut settings = config.batch.clone();
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            if batch_timeout.is_some() {
                settings.timeout_secs = batch_timeout;
            }

            let app = App::new(config)?;
            let coordinator = BatchCoordinator::new(Arc::new(app.transfer()), settings);
            let result = coordinator
                .save_many(entries, &options)
                .await
                .context("Batch could not start")?;

            if save.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for (key, item) in &result.per_reference {
                    match &item.note {
                        Some(note) => println!("{} ({}): {}", key, note, item.outcome),
                        None => println!("{}: {}", key, item.outcome),
                    }
                }
                println!(
                    "{} saved, {} failed, {} total",
                    result.success_count(),
                    result.failure_count(),
                    result.len()
                );
            }
            if result.failure_count() > 0 {
                bail!("{} of {} shares failed", result.failure_count(), result.len());
            }
        }

        Commands::Share { action } => {
            let app = App::new(config)?;
            run_share_command(&app, action).await?;
        }
    }

    Ok(())
}

async fn run_share_command(app: &App, action: ShareCommand) -> Result<()> {
    match action {
        ShareCommand::Create {
            fids,
            expire_days,
            passcode,
            download_limit,
            json,
        } => {
            let mut options = CreateShareOptions::from(&app.config.share);
            if let Some(days) = expire_days {
                options.expire_days = days;
            }
            if let Some(passcode) = passcode {
                validate_passcode(&passcode)?;
                options.passcode = Some(passcode);
            }
            if let Some(limit) = download_limit {
                options.download_limit = limit;
            }

            let created = app
                .api
                .create_share(&fids, &options)
                .await
                .context("Failed to create share")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else {
                match (&created.share_url, &created.share_id, &created.task_id) {
                    (Some(url), _, _) => println!("Share created: {}", url),
                    (None, Some(id), _) => println!("Share created: {}", id),
                    (None, None, Some(task)) => println!("Share is being created (task {})", task),
                    (None, None, None) => println!("Share created."),
                }
                if let Some(passcode) = &options.passcode {
                    println!("Passcode: {}", passcode);
                }
            }
        }

        ShareCommand::List { json } => {
            let shares = app.api.my_shares().await.context("Failed to list shares")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&shares)?);
            } else if shares.is_empty() {
                println!("No shares.");
            } else {
                println!("{:<34} {:>6} {:<40} {}", "ID", "VIEWS", "URL", "TITLE");
                println!("{}", "-".repeat(100));
                for share in shares {
                    println!("{}", share);
                }
            }
        }

        ShareCommand::Delete { share_id } => {
            app.api
                .delete_share(&share_id)
                .await
                .with_context(|| format!("Failed to delete share {}", share_id))?;
            println!("Deleted share {}", share_id);
        }
    }
    Ok(())
}
