mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::ack::AckArgs;
use commands::state::StateGetArgs;
use opts::StoreOpts;

#[derive(Parser, Debug)]
#[command(
    name = "charm",
    version,
    about = "Inspect and maintain a unit's stored state and deferred notices"
)]
struct Cli {
    #[command(flatten)]
    opts: StoreOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List queued deferred notices in delivery order
    Notices,

    /// Read stored-state bags
    #[command(subcommand)]
    State(StateCommand),

    /// Drop every queued notice bound to one observer
    Ack(AckArgs),
}

#[derive(Subcommand, Debug)]
enum StateCommand {
    /// List stored-state keys
    List,

    /// Print one stored-state bag
    Get(StateGetArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();
    let opts = &cli.opts;

    match cli.command {
        Command::Notices => commands::notices::cmd_notices(opts),
        Command::State(cmd) => match cmd {
            StateCommand::List => commands::state::cmd_state_list(opts),
            StateCommand::Get(args) => commands::state::cmd_state_get(opts, &args),
        },
        Command::Ack(args) => commands::ack::cmd_ack(opts, &args),
    }
}

/// Log to stderr, filtered by `RUST_LOG`; library `log` records are bridged in.
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}
