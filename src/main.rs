//! Purpose: `archive-client` CLI entry point.
//! Role: Binary crate root; parses args, resolves settings, delegates to command dispatch.
//! Invariants: Data goes to stdout; diagnostics and errors go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use archive_client::api::{ClientConfig, Error, ErrorKind, to_exit_code};

mod command_dispatch;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `archive-client --help` for usage."));
            }
        },
    };

    command_dispatch::dispatch_command(cli)
}

#[derive(Parser)]
#[command(
    name = "archive-client",
    version,
    about = "Query and annotate a remote scientific-data archive",
    long_about = None,
    after_help = r#"EXAMPLES
  $ archive-client --server https://archive.example.org --user alice --password pw config save ~/.archive.json
  $ archive-client --config ~/.archive.json get /REST/projects
  $ archive-client --config ~/.archive.json attr get /REST/projects/P1/subjects/S1 S1 xnat:subjectData/group
  $ archive-client --config ~/.archive.json attr set /REST/projects/P1/subjects/S1 xnat:subjectData/group="control arm"

Logging goes to stderr and is controlled by RUST_LOG (default: warn)."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, help = "Saved connection settings (JSON)", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, help = "Server root url, e.g. https://archive.example.org/xnat")]
    server: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long, help = "Base cache directory (default: system temp dir)", value_hint = ValueHint::DirPath)]
    cachedir: Option<PathBuf>,
    #[arg(long, help = "Prefer cached responses; network calls are bounded to 10s")]
    offline: bool,
    #[arg(long, help = "Seconds a fetched uri is served from cache without a round-trip")]
    memory_ttl: Option<f64>,
    #[arg(long, help = "PEM bundle of trusted CA certificates", value_hint = ValueHint::FilePath)]
    ca_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a listing and print it as a table
    Get {
        uri: String,
        #[arg(long, value_enum, default_value_t = TableFormat::Csv)]
        format: TableFormat,
        #[arg(long = "column", help = "Keep only this column (repeatable)")]
        columns: Vec<String>,
        #[arg(long = "where", help = "Keep rows where COLUMN=VALUE (repeatable)")]
        equals: Vec<String>,
        #[arg(long, help = "Columns to print first")]
        order: Vec<String>,
    },
    /// Send a request and print the raw response body
    Raw {
        method: String,
        uri: String,
        #[arg(long, value_hint = ValueHint::FilePath)]
        body_file: Option<PathBuf>,
    },
    /// Read or write object attributes
    Attr {
        #[command(subcommand)]
        command: AttrCommand,
    },
    /// Manage saved connection settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Inspect the cross-process uri locks of the cache directory
    Locks {
        #[command(subcommand)]
        command: LockCommand,
    },
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum AttrCommand {
    /// Print attribute values, one per line
    Get {
        object: String,
        id: String,
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, help = "Bind to the closest column however weak the match")]
        permissive: bool,
    },
    /// Set attributes given as PATH=VALUE
    Set {
        object: String,
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write the resolved settings to a file
    Save {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum LockCommand {
    /// List held uri locks
    List,
    /// Remove locks older than the staleness threshold
    Purge,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum TableFormat {
    Csv,
    Json,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig, Error> {
        let mut config = match &self.config {
            Some(path) => Some(ClientConfig::load(path)?),
            None => None,
        };
        if let Some(config) = config.as_mut() {
            if let Some(server) = &self.server {
                config.server = server.clone();
            }
            if let Some(user) = &self.user {
                config.user = user.clone();
            }
            if let Some(password) = &self.password {
                config.password = password.clone();
            }
        }
        let mut config = match config {
            Some(config) => config,
            None => {
                let (Some(server), Some(user), Some(password)) =
                    (&self.server, &self.user, &self.password)
                else {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("missing connection settings")
                        .with_hint("Pass --config, or all of --server, --user, and --password."));
                };
                ClientConfig::new(server.clone(), user.clone(), password.clone())
            }
        };
        if let Some(cachedir) = &self.cachedir {
            config.cachedir = cachedir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or("invalid arguments");
    first.trim_start_matches("error: ").to_string()
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::ConcurrentAccess => "resource is locked by another process".to_string(),
        ErrorKind::Transport => "transport error".to_string(),
        ErrorKind::Server => "server error".to_string(),
        ErrorKind::AttributeResolution => "attribute could not be resolved".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(uri) = err.uri() {
        inner.insert("uri".to_string(), json!(uri));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(owner) = err.owner_pid() {
        inner.insert("owner_pid".to_string(), json!(owner));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let (Some(status), Some(reason)) = (err.status(), err.reason()) {
        lines.push(format!("status: {status} {reason}"));
    }
    if let Some(uri) = err.uri() {
        lines.push(format!("uri: {uri}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}
