//! Purpose: Hold top-level CLI command dispatch for `archive-client`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Only commands that talk to the server negotiate a session.

use std::io::Write;

use clap::CommandFactory;
use serde_json::json;

use super::*;
use archive_client::api::{
    ArchiveClient, LockStore, MatchPolicy, Method, Mode, ObjectRef, STALE_LOCK_SECS, SystemClock,
    Clock, UreqTransport,
};

pub(super) fn dispatch_command(cli: Cli) -> Result<RunOutcome, Error> {
    match &cli.command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(*shell, &mut cmd, "archive-client", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Config {
            command: ConfigCommand::Save { path },
        } => {
            cli.client_config()?.save(path)?;
            Ok(RunOutcome::ok())
        }
        Command::Locks { command } => {
            let config = cli.client_config()?;
            let locks = LockStore::open(config.user_cache_dir().join("lock.db"))?;
            let now = SystemClock.now();
            match command {
                LockCommand::List => {
                    for row in locks.rows()? {
                        emit_line(&json!({
                            "uri": row.uri,
                            "owner": row.owner,
                            "claimed_at": row.claimed_at,
                            "age_secs": row.age(now),
                            "stale": row.is_stale(now, STALE_LOCK_SECS),
                        })
                        .to_string())?;
                    }
                }
                LockCommand::Purge => {
                    let removed = locks.purge_stale(now, STALE_LOCK_SECS)?;
                    emit_line(&json!({ "purged": removed }).to_string())?;
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Get {
            uri,
            format,
            columns,
            equals,
            order,
        } => {
            let mut client = connect(&cli)?;
            let mut table = client.get_table(uri)?;
            let pairs = equals
                .iter()
                .map(|raw| split_assignment(raw, "--where"))
                .collect::<Result<Vec<_>, _>>()?;
            if !pairs.is_empty() {
                table = table.filter(&[], &pairs);
            }
            if !columns.is_empty() {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                table = table.select(&columns);
            }
            if !order.is_empty() {
                table = table.with_order(order.iter().cloned());
            }
            match format {
                TableFormat::Csv => emit_bytes(table.to_csv().as_bytes())?,
                TableFormat::Json => emit_line(&table.to_json()?)?,
            }
            Ok(RunOutcome::ok())
        }
        Command::Raw {
            method,
            uri,
            body_file,
        } => {
            let method = Method::parse(method)?;
            let body = match body_file {
                Some(path) => Some(std::fs::read(path).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read body file")
                        .with_path(path)
                        .with_source(err)
                })?),
                None => None,
            };
            let mut client = connect(&cli)?;
            let content = client.exec(uri, method, body.as_deref(), &[])?;
            emit_bytes(&content)?;
            Ok(RunOutcome::ok())
        }
        Command::Attr { command } => {
            let mut client = connect(&cli)?;
            match command {
                AttrCommand::Get {
                    object,
                    id,
                    paths,
                    permissive,
                } => {
                    let policy = if *permissive {
                        MatchPolicy::permissive()
                    } else {
                        MatchPolicy::default()
                    };
                    let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
                    let values = client
                        .attrs_with_policy(ObjectRef::new(object.clone(), id.clone()), policy)
                        .mget(&paths)?;
                    for value in values {
                        emit_line(&value)?;
                    }
                }
                AttrCommand::Set {
                    object,
                    assignments,
                } => {
                    let pairs = assignments
                        .iter()
                        .map(|raw| split_assignment(raw, "attr set"))
                        .collect::<Result<Vec<_>, _>>()?;
                    // The object id is not needed to write attributes.
                    client
                        .attrs(ObjectRef::new(object.clone(), String::new()))
                        .mset(&pairs)?;
                }
            }
            Ok(RunOutcome::ok())
        }
    }
}

fn connect(cli: &Cli) -> Result<ArchiveClient, Error> {
    let config = cli.client_config()?;
    let mut transport = UreqTransport::new().with_basic_auth(&config.user, &config.password);
    if let Some(ca_file) = &cli.ca_file {
        transport = transport.with_tls_ca_file(ca_file)?;
    }
    let mut builder = ArchiveClient::builder(config).transport(Box::new(transport));
    if cli.offline {
        builder = builder.mode(Mode::Offline);
    }
    if let Some(ttl) = cli.memory_ttl {
        builder = builder.memory_ttl(ttl);
    }
    builder.connect()
}

fn split_assignment<'a>(raw: &'a str, context: &str) -> Result<(&'a str, &'a str), Error> {
    raw.split_once('=').ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("expected PATH=VALUE for {context}, got `{raw}`"))
    })
}

fn emit_line(line: &str) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}").map_err(stdout_error)
}

fn emit_bytes(bytes: &[u8]) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(bytes)
        .and_then(|_| stdout.flush())
        .map_err(stdout_error)
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write stdout")
        .with_source(err)
}
