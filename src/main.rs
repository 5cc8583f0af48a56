use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use edusync::cache::{DomainCache, MemoryStore, SqliteStore, StoreHandle};
use edusync::chat::{SessionBook, SessionStore};
use edusync::config::Config;
use edusync::connectivity::ConnectivityMonitor;
use edusync::identity::{Identity, IdentityWatcher};
use edusync::net::ResilientClient;
use edusync::platform::types::DashboardBundle;
use edusync::platform::PlatformClient;
use edusync::sync::{SkipReason, SyncCoordinator, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "edusync")]
#[command(about = "Offline-aware sync client for the learning platform")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/edusync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Email of the signed-in user
  #[arg(short, long)]
  email: String,

  /// Display name (defaults to the email's local part)
  #[arg(long)]
  display_name: Option<String>,

  /// Start with connectivity reported as offline
  #[arg(long)]
  offline: bool,

  /// Keep the cache in memory instead of on disk
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh every domain and report per-domain outcomes
  Sync,
  /// Show the cached dashboard snapshot
  Dashboard,
  /// Work with chat sessions
  Chat {
    #[command(subcommand)]
    command: ChatCommand,
  },
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
  /// List sessions, the selected one starred
  List,
  /// Send a message in the selected session
  Send {
    message: String,
    /// Switch to this session first
    #[arg(long)]
    session: Option<String>,
  },
  /// Create a session and select it
  New {
    #[arg(long)]
    name: Option<String>,
  },
  /// Select a session
  Switch { id: String },
  /// Delete a session
  Delete { id: String },
  /// Push all server-backed sessions in one bulk save
  Save,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Cli::parse();
  let _guard = init_tracing()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let store: StoreHandle = if args.ephemeral {
    Arc::new(MemoryStore::new())
  } else if let Some(path) = &config.cache.db_path {
    Arc::new(SqliteStore::open_at(path)?)
  } else {
    Arc::new(SqliteStore::open()?)
  };

  let cache = Arc::new(DomainCache::new(store));
  let connectivity = Arc::new(ConnectivityMonitor::new(
    !args.offline,
    config.connectivity.reconnect_grace(),
  ));
  let identity = Arc::new(IdentityWatcher::new());
  let client = PlatformClient::new(ResilientClient::new(&config)?);
  let coordinator = Arc::new(SyncCoordinator::new(
    client.clone(),
    Arc::clone(&cache),
    Arc::clone(&connectivity),
    Arc::clone(&identity),
    config.cache.stale_after(),
  ));
  let sessions = SessionStore::new(
    client,
    Arc::clone(&cache),
    Arc::clone(&coordinator),
    Arc::clone(&identity),
  );

  // Sign in: scope the cache to this account, then resolve the identity.
  let display_name = args.display_name.clone().unwrap_or_else(|| {
    args
      .email
      .split('@')
      .next()
      .unwrap_or(&args.email)
      .to_string()
  });
  let me = Identity::new(args.email.clone(), display_name);
  cache.bind_scope(Some(me.scope()))?;
  identity.set(Some(me));

  match args.command.unwrap_or(Command::Sync) {
    Command::Sync => {
      for (key, outcome) in coordinator.refresh_all().await {
        println!("{:<18} {}", key.as_str(), describe(&outcome));
      }
    }
    Command::Dashboard => show_dashboard(&coordinator),
    Command::Chat { command } => run_chat(command, &sessions, &cache).await?,
  }

  Ok(())
}

async fn run_chat(
  command: ChatCommand,
  sessions: &SessionStore,
  cache: &Arc<DomainCache>,
) -> Result<()> {
  match command {
    ChatCommand::List => {
      let book = sessions.load().await;
      if book.sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
      }
      for session in &book.sessions {
        let marker = if book.current_session_id.as_deref() == Some(session.id.as_str()) {
          "*"
        } else {
          " "
        };
        let origin = if session.is_local() { " (device-local)" } else { "" };
        println!(
          "{} {:<42} {:<24} {:>3} messages, active {}{}",
          marker,
          session.id,
          session.name,
          session.message_count,
          session.last_activity.format("%Y-%m-%d %H:%M"),
          origin
        );
      }
    }
    ChatCommand::Send { message, session } => {
      if let Some(id) = session {
        sessions.switch_session(&id)?;
      }
      let report = sessions.send_message(&message).await?;
      let reply = cache.read::<SessionBook>().and_then(|entry| {
        entry
          .payload
          .session(&report.session_id)
          .and_then(|s| s.messages.last().cloned())
      });
      if let Some(reply) = reply {
        println!("assistant: {}", reply.content);
      }
      if !report.delivered {
        if let Some(error) = &report.error {
          eprintln!("(delivery failed: {})", error);
        }
      }
    }
    ChatCommand::New { name } => {
      let session = sessions.create_session(name.as_deref()).await?;
      let origin = if session.is_local() {
        "device-local until the next sync"
      } else {
        "on the server"
      };
      println!("Created '{}' ({}, {})", session.name, session.id, origin);
    }
    ChatCommand::Switch { id } => {
      sessions.switch_session(&id)?;
      println!("Switched to {}", id);
    }
    ChatCommand::Delete { id } => {
      sessions.delete_session(&id).await?;
      println!("Deleted {}", id);
    }
    ChatCommand::Save => {
      sessions.flush().await?;
      println!("Saved sessions to the server.");
    }
  }
  Ok(())
}

fn show_dashboard(coordinator: &Arc<SyncCoordinator>) {
  match coordinator.get::<DashboardBundle>() {
    Some(entry) => {
      let dashboard = &entry.payload;
      println!(
        "Stats: {} quizzes taken, {} active roadmaps, {} skills in progress",
        dashboard.stats.quizzes_taken,
        dashboard.stats.active_roadmaps,
        dashboard.stats.skills_learning
      );
      println!("Recent quizzes:");
      for quiz in &dashboard.recent_quizzes {
        println!(
          "  {:<32} {}/{} ({:.0}%)",
          quiz.quiz_title, quiz.correct_answers, quiz.total_questions, quiz.percentage
        );
      }
      println!("Roadmaps:");
      for roadmap in &dashboard.roadmaps {
        println!("  {}", roadmap.title);
      }
      println!(
        "(v{}, fetched {})",
        entry.version,
        entry.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
      );
    }
    None => println!("No dashboard data cached yet. Run `edusync sync` while online."),
  }
}

fn describe(outcome: &SyncOutcome) -> String {
  match outcome {
    SyncOutcome::Applied { version } => format!("synced (v{})", version),
    SyncOutcome::Skipped(SkipReason::Offline) => "skipped: offline, cached data stands".to_string(),
    SyncOutcome::Skipped(SkipReason::NoIdentity) => "skipped: no signed-in identity".to_string(),
    SyncOutcome::Failed(error) => format!("failed: {}", error),
  }
}

fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("edusync")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "edusync.log"));

  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(guard)
}
