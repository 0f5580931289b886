use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use danectl::logging::{self, LogFormat};
use danectl::models::config::DEFAULT_CONFIG_PATH;
use danectl::orchestrator::{EXIT_CONFIG, EXIT_FAILURE, EXIT_LOCKED, EXIT_OK};
use danectl::Result;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "danectl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keeps DANE TLSA records in step with certificate renewals", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Renewal pre-hook: hold renewed domains on their current certificate
    Pre,

    /// Renewal post-hook: publish new TLSA records and retire old ones
    #[command(alias = "deploy")]
    Post,

    /// Create or repair the dane symlink directory
    Init {
        /// Recreate every symlink and reassert directory ownership
        #[arg(short, long)]
        force: bool,
    },

    /// Point every domain back to live and clear the state file
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the TLSA records for the live certificates
    Print {
        /// Only this domain
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Show pending lifecycle records
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(
        logging::level_for(cli.verbose, cli.quiet),
        cli.log_format,
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", format!("Error: failed to start runtime: {}", e).red());
            std::process::exit(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run_async(cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", format!("Error: {:#}", e).red());
            std::process::exit(exit_code_for(&e));
        }
    }
}

async fn run_async(cli: Cli) -> Result<i32> {
    let config = cli.config.as_path();

    let code = match cli.command {
        Commands::Pre => danectl::cli::pre::run(config)?.exit_code(),
        Commands::Post => danectl::cli::post::run(config).await?.exit_code(),
        Commands::Init { force } => {
            danectl::cli::init::run(config, force)?;
            EXIT_OK
        }
        Commands::Reset { yes } => danectl::cli::reset::run(config, yes)?.exit_code(),
        Commands::Print { domain } => {
            danectl::cli::print::run(config, domain.as_deref())?;
            EXIT_OK
        }
        Commands::Status { json } => {
            danectl::cli::status::run(config, json)?;
            EXIT_OK
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "danectl", &mut io::stdout());
            EXIT_OK
        }
    };

    Ok(code)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<danectl::Error>() {
        Some(danectl::Error::Config(_)) => EXIT_CONFIG,
        Some(danectl::Error::LockBusy(_)) => EXIT_LOCKED,
        _ => EXIT_FAILURE,
    }
}
