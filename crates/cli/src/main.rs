use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// appbox - containerized desktop applications, declaratively
#[derive(Parser)]
#[command(name = "appbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Only print warnings and errors
  #[arg(short, long, global = true, conflicts_with = "verbose")]
  quiet: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install an application from a configuration file
  Install {
    /// Path to the application's YAML configuration
    config: PathBuf,
  },

  /// Reconcile an application with its stored configuration
  Apply {
    /// Container name of the application
    name: String,
  },

  /// Remove an application's integration, container, and image
  Remove {
    /// Container name of the application
    name: String,

    /// Also delete the configuration, home directory, and registry backup
    #[arg(long)]
    purge: bool,
  },

  /// Rebuild an application from scratch, keeping its home directory
  Reinstall {
    /// Container name of the application
    name: String,

    /// Replace the stored configuration with this file before rebuilding
    #[arg(long)]
    config: Option<PathBuf>,
  },

  /// Recreate the container and integration from the existing image
  Repair {
    /// Container name of the application
    name: String,
  },

  /// Upgrade the packages inside an application's container
  Upgrade {
    /// Container name of the application
    name: String,
  },

  /// Edit the stored configuration
  Configure {
    /// Container name of the application
    name: String,

    /// Updates of the form 'path:value' or 'path:action:value'
    /// (e.g. 'permissions.network:false', 'image.packages:add:firefox')
    #[arg(required = true)]
    updates: Vec<String>,
  },

  /// List managed applications
  List,

  /// Run a command inside an application's container
  Run {
    /// Container name of the application
    name: String,

    /// Command to run (defaults to the configured 'runtime.default_exec')
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
  },

  /// Toggle an application's network access
  Network {
    #[command(subcommand)]
    action: NetworkAction,
  },

  /// Inspect and maintain the backup registry
  Image {
    #[command(subcommand)]
    action: ImageAction,
  },

  /// Remove podman containers, images, and volumes not managed by appbox
  Prune {
    /// Actually delete; without this flag nothing happens
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum NetworkAction {
  /// Allow network access
  Allow { name: String },
  /// Deny network access
  Deny { name: String },
}

#[derive(Subcommand)]
enum ImageAction {
  /// List images backed up to the registry
  List,
  /// Restore an application's image and container from the registry
  Restore {
    /// Container name of the application
    name: String,
  },
  /// Delete unreferenced registry data
  Gc {
    /// Report what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose {
    "debug"
  } else if cli.quiet {
    "warn"
  } else {
    "info"
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .without_time()
    .init();

  match cli.command {
    Commands::Install { config } => cmd::cmd_install(&config),
    Commands::Apply { name } => cmd::cmd_apply(&name),
    Commands::Remove { name, purge } => cmd::cmd_remove(&name, purge),
    Commands::Reinstall { name, config } => cmd::cmd_reinstall(&name, config.as_deref()),
    Commands::Repair { name } => cmd::cmd_repair(&name),
    Commands::Upgrade { name } => cmd::cmd_upgrade(&name),
    Commands::Configure { name, updates } => cmd::cmd_configure(&name, &updates),
    Commands::List => cmd::cmd_list(),
    Commands::Run { name, command } => {
      let code = cmd::cmd_run(&name, &command)?;
      std::process::exit(code);
    }
    Commands::Network { action } => match action {
      NetworkAction::Allow { name } => cmd::cmd_network(&name, true),
      NetworkAction::Deny { name } => cmd::cmd_network(&name, false),
    },
    Commands::Image { action } => match action {
      ImageAction::List => cmd::cmd_image_list(),
      ImageAction::Restore { name } => cmd::cmd_image_restore(&name),
      ImageAction::Gc { dry_run } => cmd::cmd_image_gc(dry_run),
    },
    Commands::Prune { force } => cmd::cmd_prune(force),
  }
}
