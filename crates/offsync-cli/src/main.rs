use clap::{ArgAction, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "offsync", version, about = "Offline-first sync engine CLI")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pending operation log
    Queue {
        #[command(subcommand)]
        action: commands::queue::QueueAction,
    },
    /// Drain the operation log against the remote store
    Sync {
        /// Reload remote state afterwards and prune confirmed tombstones
        #[arg(long)]
        reload: bool,
    },
    /// Push and pull Google Calendar and Tasks
    Reconcile,
    /// Dispatcher health counters
    Stats,
    /// Confirmed deletes
    Tombstones {
        #[command(subcommand)]
        action: commands::tombstones::TombstonesAction,
    },
    /// Google credentials
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Preview the next occurrence of a recurring config
    Next {
        /// Recurring config as JSON
        #[arg(long)]
        config: String,
        /// Reference time (RFC 3339); defaults to now
        #[arg(long)]
        from: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("offsync=info,offsync_core=info"),
            1 => EnvFilter::new("offsync=debug,offsync_core=debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Queue { action } => commands::queue::run(action),
        Commands::Sync { reload } => commands::sync::run(reload),
        Commands::Reconcile => commands::sync::reconcile(),
        Commands::Stats => commands::stats::run(),
        Commands::Tombstones { action } => commands::tombstones::run(action),
        Commands::Auth { action } => commands::auth::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Next { config, from } => commands::next::run(&config, from.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
