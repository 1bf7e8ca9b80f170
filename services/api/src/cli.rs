use crate::demo::{run_demo, run_poll, DemoArgs, PollArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use dunning::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Dunning Engine",
    about = "Run and demonstrate the collections workflow engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Simulate a collections campaign over a debtor roster, one poll per day
    Demo(DemoArgs),
    /// Run a single poll cycle against a freshly seeded store and print the summary
    Poll(PollArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Poll(args) => run_poll(args).await,
    }
}
