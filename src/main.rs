//! Onekey CLI - one-click launcher for the xiaozhi server bundle.

use clap::Parser;
use onekey::cli::{Cli, Commands, ConfigCommands, DbCommands, MarkerCommands, UpdateCommands};
use onekey::commands::{self, CommandResult};
use onekey::config::Bundle;
use onekey::logging;
use std::process;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let bundle = match Bundle::resolve(cli.root) {
        Ok(bundle) => bundle,
        Err(e) => fail(&e, human),
    };

    let log_guard = logging::init(Some(&bundle.paths.logs_dir));
    tracing::debug!(
        "bundle root {} (from {})",
        bundle.paths.root.display(),
        bundle.root_source
    );

    let result = run_command(cli.command, &bundle, human);
    if let Err(e) = &result {
        tracing::debug!(fatal = e.is_fatal(), "command failed: {:?}", e);
    }
    // process::exit skips destructors; flush the file log first
    drop(log_guard);

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => fail(&e, human),
    }
}

/// Report an error in the requested format and exit 1.
fn fail(e: &onekey::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

/// Run the selected command and print its result. Returns the exit status.
fn run_command(command: Option<Commands>, bundle: &Bundle, human: bool) -> Result<i32, onekey::Error> {
    let code = match command.unwrap_or(Commands::Launch) {
        Commands::Launch => output(&commands::launch(bundle)?, human),
        Commands::Menu => output(&commands::menu(bundle)?, human),
        Commands::Start { target, yes } => output(&commands::start(bundle, target, yes)?, human),

        Commands::Config { command } => match command {
            ConfigCommands::Init {
                secret,
                yes,
                non_interactive,
                upgrade_mode,
            } => {
                let result =
                    commands::config_init(bundle, secret, yes, non_interactive, upgrade_mode)?;
                output(&result, human)
            }
            ConfigCommands::Status => output(&commands::config_status(bundle)?, human),
            ConfigCommands::SetSecret { secret, yes } => {
                output(&commands::config_set_secret(bundle, &secret, yes)?, human)
            }
        },

        Commands::Db { command } => match command {
            DbCommands::Init { yes, timeout } => {
                output(&commands::db_init(bundle, yes, timeout)?, human)
            }
            DbCommands::WritePassword { password } => {
                output(&commands::db_write_password(bundle, &password)?, human)
            }
        },

        Commands::Update { command } => match command {
            UpdateCommands::Check { source, no_prompt } => {
                output(&commands::update_check(bundle, source, no_prompt)?, human)
            }
        },

        Commands::Marker { command } => match command {
            MarkerCommands::List => output(&commands::marker_list(bundle)?, human),
        },

        Commands::FirstRun { yes } => output(&commands::first_run(bundle, yes)?, human),
    };
    Ok(code)
}

/// Print output in JSON or human-readable format.
fn output<T: CommandResult>(result: &T, human: bool) -> i32 {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
    result.exit_code()
}
