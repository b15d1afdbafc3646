use crate::command;
use crate::payload::PayloadDescriptor;
use crate::server::NestRequest;
use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

#[derive(Parser)]
#[command(name = "nestbox")]
#[command(about = "Per-user sandbox environments backed by container snapshots")]
#[command(version)]
struct Cli {
    /// Server address for client commands (defaults to `listen` from config)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// A file previously uploaded to the host, addressed by its id
#[derive(Args, Debug)]
struct FileArgs {
    /// Content id of the uploaded file
    fileid: String,
    /// Name the file gets inside the sandbox
    filename: String,
    /// Content type, e.g. "text/x-python" or "bash"
    filetype: String,
}

impl From<FileArgs> for PayloadDescriptor {
    fn from(args: FileArgs) -> Self {
        PayloadDescriptor::new(args.fileid, args.filename, args.filetype)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the request server in the foreground
    Serve {
        /// Address to bind (overrides `listen` from config)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Start a user's environment from a saved version (default: latest)
    Acquire {
        user_id: String,

        /// Snapshot version to start from
        #[arg(long)]
        version: Option<u64>,
    },

    /// Replace a user's environment with a fresh baseline instance
    Bootstrap { user_id: String },

    /// Save a user's live environment as a new version
    Persist { user_id: String },

    /// Save, stop and forget a user's live environment
    Discard { user_id: String },

    /// Show a user's live environment, if any
    Current { user_id: String },

    /// List all live environments
    #[command(visible_alias = "ls")]
    List,

    /// Execute a file inside a user's live environment
    Run {
        user_id: String,
        #[command(flatten)]
        file: FileArgs,
    },

    /// Score a file in a throwaway baseline instance
    Trial {
        #[command(flatten)]
        file: FileArgs,
    },

    /// Manage users in the local store
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user or rename an existing one
    Add { id: String, name: String },
    /// Show a user's stored version
    Show { id: String },
}

// --- Public Entry Point ---
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let addr = cli.addr.as_deref();

    match cli.command {
        Commands::Serve { listen } => command::serve::run(listen.as_deref()),
        Commands::Acquire { user_id, version } => {
            command::request::run(addr, NestRequest::Acquire { user_id, version })
        }
        Commands::Bootstrap { user_id } => {
            command::request::run(addr, NestRequest::Bootstrap { user_id })
        }
        Commands::Persist { user_id } => {
            command::request::run(addr, NestRequest::Persist { user_id })
        }
        Commands::Discard { user_id } => {
            command::request::run(addr, NestRequest::Discard { user_id })
        }
        Commands::Current { user_id } => {
            command::request::run(addr, NestRequest::Current { user_id })
        }
        Commands::List => command::list::run(addr),
        Commands::Run { user_id, file } => command::request::run(
            addr,
            NestRequest::Run {
                user_id,
                file: file.into(),
            },
        ),
        Commands::Trial { file } => {
            command::request::run(addr, NestRequest::Trial { file: file.into() })
        }
        Commands::User { command: action } => match action {
            UserCommands::Add { id, name } => command::user::add(&id, &name),
            UserCommands::Show { id } => command::user::show(&id),
        },
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_file_args() {
        let cli = Cli::try_parse_from(["nestbox", "run", "u1", "abc", "main.py", "text/x-python"])
            .unwrap();
        match cli.command {
            Commands::Run { user_id, file } => {
                assert_eq!(user_id, "u1");
                let payload = PayloadDescriptor::from(file);
                assert_eq!(payload.file_id, "abc");
                assert_eq!(payload.file_name, "main.py");
            }
            _ => panic!("Wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_acquire_version_and_global_addr() {
        let cli = Cli::try_parse_from([
            "nestbox",
            "acquire",
            "u1",
            "--version",
            "7",
            "--addr",
            "10.0.0.2:9000",
        ])
        .unwrap();
        assert_eq!(cli.addr.as_deref(), Some("10.0.0.2:9000"));
        assert!(matches!(
            cli.command,
            Commands::Acquire { version: Some(7), .. }
        ));
    }
}
