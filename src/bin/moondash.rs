use std::{
    io::{self, IsTerminal},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use tracing::info;

use moondash::{
    ConsoleOut, Devices, EditorConsole, Evaluation, HostConfig, HostError, LineSource, RawConsole,
    firmware,
};

#[derive(Parser)]
#[command(author, version, about = "Lua dashboard firmware host")]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Leave the shell when input ends instead of waiting for more
    #[arg(long, global = true)]
    exit_on_eof: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the firmware: modules, entry script, then the shell
    Boot,
    /// Start the shell without running the entry script
    Repl,
    /// Run a Lua script file against a booted runtime
    Run { script: PathBuf },
    /// Evaluate a Lua snippet and print its values
    Eval { source: String },
}

fn main() -> Result<(), HostError> {
    let args = Args::parse();
    moondash::logging::init(&args.log_level);

    let mut config = HostConfig::load(args.config.as_deref())?;
    if args.exit_on_eof {
        config.shell.exit_on_eof = true;
    }
    let devices = Devices::hosted(&config.devices)?;
    let console = ConsoleOut::stdout();

    match args.command.unwrap_or(Command::Boot) {
        Command::Boot => shell(&config, console, &devices),
        Command::Repl => {
            config.boot.entry = None;
            config.boot.after_entry = None;
            shell(&config, console, &devices)
        }
        Command::Run { script } => {
            let booted = firmware::boot(&headless(config), console, &devices)?;
            booted.host.execute_file(&script)?;
            Ok(())
        }
        Command::Eval { source } => {
            let booted = firmware::boot(&headless(config), console.clone(), &devices)?;
            match booted.host.evaluate(&source) {
                Evaluation::Values(values) => {
                    for value in values {
                        console.line(&value)?;
                    }
                }
                Evaluation::NotAnExpression => booted.host.execute_source("eval", &source)?,
                Evaluation::Failed(diag) => return Err(diag.into()),
            }
            Ok(())
        }
    }
}

/// Modules installed, no entry script and no shell.
fn headless(mut config: HostConfig) -> HostConfig {
    config.boot.entry = None;
    config.boot.after_entry = None;
    config.boot.shell = false;
    config
}

fn shell(config: &HostConfig, console: ConsoleOut, devices: &Devices) -> Result<(), HostError> {
    let stdin = io::stdin();
    let mut input: Box<dyn LineSource> = if stdin.is_terminal() {
        Box::new(EditorConsole::new()?)
    } else {
        Box::new(RawConsole::new(stdin, console.clone(), &config.shell))
    };
    let exit = firmware::run(config, console, devices, input.as_mut())?;
    info!(?exit, "shell ended");
    Ok(())
}
