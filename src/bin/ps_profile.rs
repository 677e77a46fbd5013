use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use crossterm::style::Stylize;
use dialoguer::{Confirm, Input, Password};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pennsieve_client::agent::LOG_LEVEL_VAR;
use pennsieve_client::config::Settings;
use pennsieve_client::error::PennsieveError;
use pennsieve_client::output::{JsonOutput, OutputMode};
use pennsieve_client::profile::{
    NoPrompts, ProfileContents, ProfileList, ProfileManager, Prompter, Status, ValueSource,
};
use pennsieve_client::Pennsieve;

#[derive(Parser)]
#[command(name = "ps-profile")]
#[command(about = "Manage Pennsieve profiles and global settings")]
#[command(version, author)]
struct Cli {
    /// Use this profile instead of the default one
    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Create a profile")]
    Create { name: Option<String> },
    #[command(about = "Show the settings of a profile")]
    Show { name: Option<String> },
    #[command(about = "Delete a profile")]
    Delete(DeleteArgs),
    #[command(about = "List profiles")]
    List {
        /// Include the contents of each profile and the global settings
        #[arg(short, long)]
        contents: bool,
    },
    #[command(about = "Set the default profile")]
    SetDefault { name: Option<String> },
    #[command(about = "Unset the default profile")]
    UnsetDefault(ForceArgs),
    #[command(about = "Show the active profile and account")]
    Status,
    #[command(about = "Set a key in a profile, or globally with --profile global")]
    Set(SetArgs),
    #[command(about = "Unset a key in a profile")]
    Unset(UnsetArgs),
    #[command(about = "List available keys and their values")]
    Keys,
    #[command(about = "Print the version")]
    Version,
}

#[derive(Args)]
struct ForceArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct DeleteArgs {
    name: Option<String>,
    #[command(flatten)]
    force: ForceArgs,
}

#[derive(Args)]
struct SetArgs {
    key: String,
    value: String,
    #[command(flatten)]
    force: ForceArgs,
}

#[derive(Args)]
struct UnsetArgs {
    key: String,
    #[command(flatten)]
    force: ForceArgs,
}

struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PennsieveError> {
        let mut input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        input
            .interact_text()
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))
    }

    fn secret(&self, prompt: &str) -> Result<String, PennsieveError> {
        Password::new()
            .with_prompt(prompt)
            .interact()
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))
    }

    fn confirm(&self, prompt: &str) -> Result<bool, PennsieveError> {
        Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PennsieveError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PennsieveError) -> u8 {
    match error {
        PennsieveError::NotFound(_)
        | PennsieveError::UnknownProfile(_)
        | PennsieveError::ProfileExists(_)
        | PennsieveError::ReservedProfile(_)
        | PennsieveError::InvalidKey(_)
        | PennsieveError::KeyNotSet { .. }
        | PennsieveError::MissingCredentials => 2,
        PennsieveError::Http(_)
        | PennsieveError::Api { .. }
        | PennsieveError::Unauthorized
        | PennsieveError::Rejected(_)
        | PennsieveError::Agent(_)
        | PennsieveError::AgentVersion { .. } => 3,
        _ => 1,
    }
}

fn init_tracing() {
    let filter = std::env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).ok())
        .unwrap_or_else(EnvFilter::from_default_env);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> miette::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let command = cli
        .command
        .ok_or_else(|| miette::Report::msg("command required (try `ps-profile --help`)"))?;
    if let Command::Version = command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load(cli.profile.as_deref())?;
    let prompter: &dyn Prompter = match output_mode {
        OutputMode::Interactive => &TerminalPrompter,
        OutputMode::NonInteractive => &NoPrompts,
    };
    let mut manager = ProfileManager::open(&settings.config_file, Settings::user_defaults()?)?;

    if manager.needs_setup() {
        if matches!(output_mode, OutputMode::Interactive) {
            println!("{}", "Pennsieve profile setup assistant".bold());
        }
        let created = manager.setup(prompter)?;
        manager.save()?;
        return emit(output_mode, &created, || {
            println!("Default profile: {}", created.name.as_str().green());
            println!("Setup complete. Run `ps-profile --help` for available commands");
        });
    }

    let profile = cli.profile.as_deref();
    match command {
        Command::Create { name } => {
            let created = manager.create(name.as_deref(), prompter)?;
            manager.save()?;
            emit(output_mode, &created, || {
                println!("Created profile '{}'", created.name);
                if created.is_default {
                    println!("Default profile: {}", created.name.as_str().green());
                }
            })
        }
        Command::Show { name } => {
            let contents = manager.show(name.as_deref().or(profile))?;
            emit(output_mode, &contents, || print_contents(&contents))
        }
        Command::Delete(args) => {
            let deleted = manager.delete(args.name.as_deref(), args.force.force, prompter)?;
            manager.save()?;
            emit(output_mode, &deleted, || {
                println!("Deleted profile '{}'", deleted.name);
                if deleted.default_unset {
                    println!(
                        "{}",
                        "* Warning: default profile unset. Use `ps-profile set-default <name>` to set a new default"
                            .red()
                    );
                }
            })
        }
        Command::List { contents } => {
            let list = manager.list(contents);
            emit(output_mode, &list, || print_list(&list))
        }
        Command::SetDefault { name } => {
            let change = manager.set_default(name.as_deref(), prompter)?;
            manager.save()?;
            emit(output_mode, &change, || {
                println!(
                    "Default profile: {}",
                    change.current.as_deref().unwrap_or("none").green()
                );
            })
        }
        Command::UnsetDefault(args) => {
            let change = manager.unset_default(args.force, prompter)?;
            manager.save()?;
            emit(output_mode, &change, || {
                println!(
                    "Default profile '{}' unset. Using global settings and environment variables",
                    change.previous.as_deref().unwrap_or("none")
                );
            })
        }
        Command::Set(args) => {
            let change = manager.set_key(&args.key, &args.value, profile, args.force.force, prompter)?;
            manager.save()?;
            emit(output_mode, &change, || {
                println!(
                    "{}: {}={}",
                    change.profile,
                    change.key,
                    change.value.as_deref().unwrap_or_default()
                );
            })
        }
        Command::Unset(args) => {
            let change = manager.unset_key(&args.key, profile, args.force.force, prompter)?;
            manager.save()?;
            emit(output_mode, &change, || {
                println!("{}: {} unset", change.profile, change.key);
            })
        }
        Command::Keys => {
            let keys = manager.keys(profile)?;
            emit(output_mode, &keys, || {
                println!("Keys and values for '{}'", keys.profile);
                for (key, value) in &keys.values {
                    println!("  {key} : {value}");
                }
            })
        }
        Command::Status => {
            let mut client = Pennsieve::connect(settings)?;
            let status = Status::collect(&mut client)?;
            emit(output_mode, &status, || print_status(&status))
        }
        Command::Version => Ok(()),
    }
}

fn emit<T: Serialize>(
    output_mode: OutputMode,
    value: &T,
    interactive: impl FnOnce(),
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_json(value).into_diagnostic(),
        OutputMode::Interactive => {
            interactive();
            Ok(())
        }
    }
}

fn print_list(list: &ProfileList) {
    println!("Profiles:");
    for entry in &list.profiles {
        if entry.is_default {
            println!("* {}", entry.name.as_str().green());
        } else {
            println!("  {}", entry.name);
        }
        if let Some(contents) = &entry.contents {
            print_values(contents, 4);
        }
    }
    if let Some(global) = &list.global {
        println!("Global settings:");
        print_values(global, 2);
    }
}

fn print_values(values: &std::collections::BTreeMap<String, String>, indent: usize) {
    let width = values.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in values {
        println!("{:indent$}{key:width$} : {value}", "");
    }
}

fn print_contents(contents: &ProfileContents) {
    println!("{} contents:", contents.name);
    let width = contents
        .values
        .iter()
        .map(|value| value.key.len())
        .max()
        .unwrap_or(0);
    for setting in &contents.values {
        let line = format!("  {:width$} : ", setting.key);
        match setting.source {
            ValueSource::Profile => println!(
                "{line}{} ({})",
                setting.value.as_str().green(),
                contents.name
            ),
            ValueSource::Global => println!("{line}{} (global)", setting.value.as_str().blue()),
            ValueSource::Default => println!("{line}{}", setting.value),
        }
    }
}

fn print_status(status: &Status) {
    println!("Active profile:");
    println!(
        "  {}\n",
        status.active_profile.as_deref().unwrap_or("global").green()
    );
    if !status.environment.is_empty() {
        println!("Environment variables:");
        for (variable, value) in &status.environment {
            println!("  {variable} = {value}");
        }
        println!();
    }
    println!("Pennsieve environment:");
    println!(
        "  User               : {}",
        status.user.as_deref().unwrap_or("unknown")
    );
    println!(
        "  Organization       : {} (id: {})",
        status.organization.as_deref().unwrap_or("unknown"),
        status.organization_id.as_deref().unwrap_or("none")
    );
    println!("  API Location       : {}", status.api_host);
}
