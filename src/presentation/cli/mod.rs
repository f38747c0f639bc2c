pub mod menu;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::application::workflow::{OperationRequest, WorkflowOrchestrator};
use crate::domain::entities::conflict::ConflictChoice;
use crate::domain::entities::operation::OperationStatus;
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::config::{ConfigOverrides, ConfigStore, DEFAULT_CONFIG_FILE};
use crate::infrastructure::logging::OperationLog;
use crate::infrastructure::process::{CancellationSource, GitProcessRunner};
use crate::presentation::ui::DisplayHelper;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output (default)
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Resolution choices accepted by `resolve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolveChoice {
    Continue,
    Abort,
    Skip,
}

impl From<ResolveChoice> for ConflictChoice {
    fn from(choice: ResolveChoice) -> Self {
        match choice {
            ResolveChoice::Continue => ConflictChoice::Continue,
            ResolveChoice::Abort => ConflictChoice::Abort,
            ResolveChoice::Skip => ConflictChoice::Skip,
        }
    }
}

/// repoflow - safe, logged git workflows for configured repositories
#[derive(Parser, Debug)]
#[command(name = "repoflow")]
#[command(about = "Safe, logged git workflows for configured repositories")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_DATE"),
    " for ",
    env!("BUILD_TARGET"),
    ")"
))]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(short, long, global = true, env = "REPOFLOW_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Section of the configuration
    #[arg(short, long, global = true)]
    pub section: Option<String>,

    /// Entry number inside the section
    #[arg(short = 'n', long, global = true)]
    pub number: Option<u32>,

    /// Directory relative repository paths are joined to
    #[arg(long, global = true, env = "REPOFLOW_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Directory of the daily operation logs
    #[arg(long, global = true, env = "REPOFLOW_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Timeout of a single git command in seconds
    #[arg(long, global = true, env = "REPOFLOW_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output format of results
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured sections and repositories
    Sections,
    /// Interactive menu (default)
    Menu,
    /// Show working tree status
    Status,
    /// List local branches
    Branches,
    /// Switch to a branch, creating it when needed (defaults to the feature branch)
    Branch {
        name: Option<String>,
    },
    /// Pull a branch (defaults to the current branch)
    Pull {
        branch: Option<String>,

        /// Pull the configured base branch
        #[arg(long, conflicts_with = "branch")]
        base: bool,
    },
    /// Push the current branch, committing everything first when a message is given
    Push {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Rebase the feature branch onto the base branch
    Rebase,
    /// Resolve a pending rebase or merge conflict
    Resolve {
        #[arg(value_enum)]
        choice: ResolveChoice,
    },
    /// Abort an in-progress rebase or cherry-pick
    CancelRebase,
    /// Hard-reset the current branch to the base branch
    Reset {
        /// Skip the backup branch
        #[arg(long)]
        no_backup: bool,

        /// Confirm the reset
        #[arg(short, long)]
        yes: bool,
    },
    /// Stash operations
    Stash {
        #[command(subcommand)]
        action: StashCommand,
    },
    /// Delete a local branch and optionally its remote counterpart
    DeleteBranch {
        name: String,

        /// Also delete origin/<name>
        #[arg(long)]
        remote: bool,

        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
    /// Pull base, switch to the feature branch and rebase it
    Flow,
    /// Show the operation log of one day (defaults to today)
    Logs {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum StashCommand {
    /// Stash local changes including untracked files
    Save { label: Option<String> },
    /// Re-apply and drop the newest stash
    Pop,
    /// Drop the newest stash
    Drop,
}

/// Everything an operation needs once the configuration is loaded.
pub struct Session {
    pub store: ConfigStore,
    pub orchestrator: WorkflowOrchestrator,
}

impl Session {
    pub fn cancellation(&self) -> &CancellationSource {
        self.orchestrator.cancellation()
    }

    pub fn log(&self) -> &Arc<OperationLog> {
        self.orchestrator.log()
    }
}

/// CLI application runner
pub struct CliApp {
    cli: Cli,
    display: DisplayHelper,
}

impl CliApp {
    pub fn new() -> Self {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Self {
        let use_color = !cli.no_color && console::colors_enabled();
        Self {
            cli,
            display: DisplayHelper::new(use_color),
        }
    }

    pub async fn run(self) -> Result<()> {
        init_tracing(self.cli.verbose);
        if self.cli.no_color {
            colored::control::set_override(false);
        }

        match self.handle_command().await {
            Ok(0) => Ok(()),
            Ok(code) => exit(code),
            Err(e) => {
                self.display.error(&format!("{:#}", e));
                exit(1);
            }
        }
    }

    async fn handle_command(&self) -> Result<i32> {
        let command = self.cli.command.clone().unwrap_or(Commands::Menu);
        let request = match command {
            Commands::Sections => return self.handle_sections(),
            Commands::Logs { date } => return self.handle_logs(date),
            Commands::Menu => {
                let session = self.open_session()?;
                let menu = menu::InteractiveMenu::new(&self.display, session, self.cli.verbose);
                menu.run(self.cli.section.clone(), self.cli.number).await?;
                return Ok(0);
            }
            Commands::Status => OperationRequest::Status,
            Commands::Branches => OperationRequest::ListBranches,
            Commands::Branch { name } => OperationRequest::Branch {
                name: name.as_deref().map(parse_branch).transpose()?,
            },
            Commands::Pull { branch, base } => {
                if base {
                    return self.run_with_target(|target| OperationRequest::Pull {
                        branch: Some(target.base_branch().clone()),
                    })
                    .await;
                }
                OperationRequest::Pull {
                    branch: branch.as_deref().map(parse_branch).transpose()?,
                }
            }
            Commands::Push { message } => OperationRequest::Push { message },
            Commands::Rebase => OperationRequest::Rebase,
            Commands::Resolve { choice } => OperationRequest::ResolveConflict(choice.into()),
            Commands::CancelRebase => OperationRequest::CancelRebase,
            Commands::Reset { no_backup, yes } => OperationRequest::Reset {
                create_backup: !no_backup,
                confirmed: yes,
            },
            Commands::Stash { action } => match action {
                StashCommand::Save { label } => OperationRequest::StashSave { label },
                StashCommand::Pop => OperationRequest::StashPop,
                StashCommand::Drop => OperationRequest::StashDrop,
            },
            Commands::DeleteBranch { name, remote, yes } => OperationRequest::DeleteBranch {
                name: parse_branch(&name)?,
                also_remote: remote,
                confirmed: yes,
            },
            Commands::Flow => OperationRequest::FullFlow,
        };

        self.run_with_target(move |_| request).await
    }

    /// Resolves `--section/--number`, dispatches one request and prints the result.
    async fn run_with_target<F>(&self, build: F) -> Result<i32>
    where
        F: FnOnce(&RepositoryTarget) -> OperationRequest,
    {
        let mut session = self.open_session()?;
        let target = self.resolve_target(&session.store)?;
        let request = build(&target);
        debug!("dispatching {:?} for {}", request, target.label());

        let busy = Arc::new(AtomicBool::new(true));
        spawn_interrupt_handler(session.cancellation().clone(), busy);

        let spinner = self
            .display
            .create_spinner(&format!("{} on {}", request.kind(), target.label()));
        let result = session.orchestrator.dispatch(&target, request).await;
        spinner.finish_and_clear();

        self.print(&result, |display| display.render_result(&result, self.cli.verbose))?;
        Ok(exit_code(result.status()))
    }

    fn handle_sections(&self) -> Result<i32> {
        let store = self.load_store()?;
        self.print(store.sections(), |display| display.render_sections(store.sections()))?;
        Ok(0)
    }

    fn handle_logs(&self, date: Option<NaiveDate>) -> Result<i32> {
        let dir = match &self.cli.log_dir {
            Some(dir) => dir.clone(),
            None => self.load_store()?.log_dir(),
        };
        let log = OperationLog::open(dir)?;
        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let records = log.read_day(date)?;
        self.print(&records, |display| {
            display.section_header(&format!("operations on {}", date));
            display.render_records(&records);
        })?;
        Ok(0)
    }

    fn load_store(&self) -> Result<ConfigStore> {
        let mut store = ConfigStore::load(&self.cli.config)
            .with_context(|| format!("failed to load {}", self.cli.config.display()))?;
        store.apply_overrides(ConfigOverrides {
            base_path: self.cli.base_path.clone(),
            log_dir: self.cli.log_dir.clone(),
            timeout_secs: self.cli.timeout_secs,
        });
        Ok(store)
    }

    fn open_session(&self) -> Result<Session> {
        let store = self.load_store()?;
        let log = Arc::new(OperationLog::open(store.log_dir())?);
        let cancellation = CancellationSource::new();
        let runner = GitProcessRunner::new()
            .with_default_timeout(store.timeout())
            .with_cancellation(cancellation.clone());
        let orchestrator = WorkflowOrchestrator::new(Arc::new(runner), log, cancellation);

        Ok(Session {
            store,
            orchestrator,
        })
    }

    fn resolve_target(&self, store: &ConfigStore) -> Result<RepositoryTarget> {
        let (Some(section), Some(number)) = (self.cli.section.as_deref(), self.cli.number) else {
            return Err(anyhow!("--section and --number are required for this command"));
        };
        Ok(store.resolve(section, number)?)
    }

    fn print<T, F>(&self, value: &T, text: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&DisplayHelper),
    {
        match self.cli.output {
            OutputFormat::Text => text(&self.display),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        }
        Ok(())
    }
}

impl Default for CliApp {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_branch(name: &str) -> Result<BranchName> {
    BranchName::new(name).with_context(|| format!("invalid branch name: {}", name))
}

/// 0 for success and no-op, 2 for a suspended conflict, 1 otherwise.
pub fn exit_code(status: OperationStatus) -> i32 {
    match status {
        OperationStatus::Success | OperationStatus::Noop => 0,
        OperationStatus::Conflict => 2,
        OperationStatus::Failure | OperationStatus::Cancelled => 1,
    }
}

/// Ctrl-C cancels the running git command; when idle it exits.
pub fn spawn_interrupt_handler(cancellation: CancellationSource, busy: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if busy.load(Ordering::SeqCst) {
                cancellation.cancel();
            } else {
                exit(130);
            }
        }
    });
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "repoflow=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
