//! Tandem CLI Client
//!
//! Interactive command-line client for Tandem collaboration sessions.
//!
//! # Usage
//!
//! ```bash
//! # Connect to a local server
//! tandem
//!
//! # Connect to remote endpoints
//! tandem --ws-url wss://example.com/ws/collab --http-url https://example.com/api/collab
//!
//! # With a configuration file
//! tandem --config ~/.config/tandem.toml
//!
//! # Execute single command
//! tandem -e "get findings"
//! ```

mod command;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use tandem_client::{ClientConfig, CollabClient, SessionEvent};
use tandem_core::{ChangeSet, Selection, SelectionRange};
use tandem_transport::ConnectionState;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::command::Command;

/// Tandem Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(author, version, about = "Tandem CLI - collaborative document client")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket endpoint
    #[arg(long, env = "TANDEM_WS_URL")]
    ws_url: Option<String>,

    /// HTTP endpoint for polling and the initial fetch
    #[arg(long, env = "TANDEM_HTTP_URL")]
    http_url: Option<String>,

    /// Only fetch the document, never send changes
    #[arg(long, env = "TANDEM_READ_ONLY")]
    read_only: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "TANDEM_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Execute command and exit
    #[arg(short = 'e', long)]
    command: Option<String>,

    /// Quiet mode (no banner, no notifications)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    info!(
        websocket = %config.websocket_url,
        http = %config.http_url,
        read_only = config.read_only,
        "Starting Tandem CLI"
    );

    let client = CollabClient::new(config);
    if !args.quiet {
        tokio::spawn(print_notifications(client.subscribe()));
    }

    if let Err(e) = client.connect().await {
        eprintln!("{} {}", "Connection failed:".red(), e);
        if args.command.is_some() {
            return Err(e).context("Could not connect");
        }
    }

    if !args.quiet {
        print_banner(&client);
    }

    // Single command mode
    if let Some(line) = args.command {
        let command = Command::parse(&line)?;
        execute(&client, command).await?;
        client.disconnect().await;
        return Ok(());
    }

    // rustyline blocks, so the prompt runs on its own thread
    let handle = Handle::current();
    let repl_client = client.clone();
    tokio::task::spawn_blocking(move || repl(handle, repl_client))
        .await
        .context("REPL thread panicked")??;

    client.disconnect().await;
    Ok(())
}

fn init_logging(log_level: &str) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => {
            let level = match log_level.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::WARN,
            };
            builder.with_max_level(level).init();
        }
    }
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("Invalid configuration in {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = &args.ws_url {
        config.websocket_url = url.clone();
    }
    if let Some(url) = &args.http_url {
        config.http_url = url.clone();
    }
    if args.read_only {
        config.read_only = true;
    }
    Ok(config)
}

fn repl(handle: Handle, client: CollabClient) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = dirs_next::home_dir()
        .map(|p| p.join(".tandem_history"))
        .unwrap_or_default();

    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!("{}> ", "tandem".green());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                let command = match Command::parse(line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{} {}", "Error:".red(), e);
                        continue;
                    }
                };
                match command {
                    Command::Quit => break,
                    Command::Help => print_help(),
                    Command::Clear => print!("\x1B[2J\x1B[1;1H"),
                    command => {
                        if let Err(e) = handle.block_on(execute(&client, command)) {
                            eprintln!("{} {:#}", "Error:".red(), e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

fn text_len(client: &CollabClient, path: &str) -> Result<usize> {
    client
        .text(path)
        .map(|text| text.chars().count())
        .with_context(|| format!("{} does not hold text", path))
}

async fn execute(client: &CollabClient, command: Command) -> Result<()> {
    match command {
        Command::Get { path } => {
            let value = match &path {
                Some(path) => client.value(path),
                None => Some(client.snapshot().document),
            };
            match value {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{}", "(nil)".dimmed()),
            }
        }
        Command::Set { path, value } => {
            client.update_key(path, value, true)?;
            println!("{}", "OK".green());
        }
        Command::Insert { path, pos, text } => {
            let len = text_len(client, &path)?;
            let changes = ChangeSet::insert_at(len, pos, &text)?;
            let cursor = Selection::cursor(pos + text.chars().count());
            client.update_text(path, changes, Some(cursor))?;
            println!("{}", "OK".green());
        }
        Command::Remove { path, from, to } => {
            let len = text_len(client, &path)?;
            let changes = ChangeSet::delete_range(len, from, to)?;
            client.update_text(path, changes, Some(Selection::cursor(from)))?;
            println!("{}", "OK".green());
        }
        Command::Create { path, value } => {
            client.create(path, value)?;
            println!("{}", "Sent".green());
        }
        Command::Delete { path } => {
            client.delete(path)?;
            println!("{}", "Sent".green());
        }
        Command::Focus { path, selection } => {
            let selection = selection
                .map(|(anchor, head)| Selection::single(SelectionRange::new(anchor, head)));
            client.set_focus(path, selection)?;
        }
        Command::Who => print_clients(client),
        Command::Comments => {
            let comments = client.comments();
            if comments.is_empty() {
                println!("{}", "(no comments)".dimmed());
            }
            for comment in comments {
                let anchor = match comment.text_range {
                    Some(range) => format!("[{}, {})", range.from, range.to),
                    None => "unanchored".dimmed().to_string(),
                };
                println!("{} {} {}", comment.id.yellow(), comment.path, anchor);
            }
        }
        Command::Status => print_status(client),
        Command::Reconnect => {
            client.connect().await?;
            println!("{}", "Reconnected.".yellow());
        }
        Command::Help | Command::Clear | Command::Quit => {}
    }
    Ok(())
}

fn print_clients(client: &CollabClient) {
    let snapshot = client.snapshot();
    for info in &snapshot.clients {
        let me = snapshot.client_id.as_deref() == Some(info.client_id.as_str());
        let name = match &info.user {
            Value::Object(user) => user
                .get("username")
                .or_else(|| user.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(info.client_id.as_str())
                .to_string(),
            _ => info.client_id.clone(),
        };
        let focus = if me {
            snapshot.awareness.path.clone()
        } else {
            snapshot
                .others
                .get(&info.client_id)
                .and_then(|awareness| awareness.path.clone())
        };
        let marker = if me { " (you)" } else { "" };
        println!(
            "{}{} {}",
            name.cyan(),
            marker,
            focus.unwrap_or_else(|| "-".into()).dimmed()
        );
    }
}

fn print_status(client: &CollabClient) {
    let snapshot = client.snapshot();
    let state = match snapshot.connection {
        ConnectionState::Open => "open".green(),
        ConnectionState::Connecting => "connecting".yellow(),
        ConnectionState::Closed => "closed".red(),
    };
    let transport = client
        .transport_kind()
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "-".into());
    println!("connection  {} ({})", state, transport);
    println!("version     {}", snapshot.version);
    println!(
        "client      {}",
        snapshot.client_id.as_deref().unwrap_or("-")
    );
    println!(
        "access      {}",
        match (snapshot.permissions.read, snapshot.permissions.write) {
            (_, true) => "read-write",
            (true, false) => "read-only",
            (false, false) => "none",
        }
    );
    if let Some(error) = snapshot.error {
        println!("error       {}", error.to_string().red());
    }
}

async fn print_notifications(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                println!("{}", format!("({} notifications skipped)", skipped).dimmed());
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let line = match event {
            SessionEvent::Initialized { version } => format!("session loaded at version {}", version),
            SessionEvent::RemoteText { path, .. } => format!("{} edited remotely", path),
            SessionEvent::ClientsChanged => "participants changed".to_string(),
            SessionEvent::CommentsChanged => "comments changed".to_string(),
            SessionEvent::ConnectionChanged { state, error } => match error {
                Some(error) => format!("connection {:?}: {}", state, error),
                None => format!("connection {:?}", state),
            },
            SessionEvent::ValueChanged { .. } | SessionEvent::AwarenessChanged => continue,
        };
        println!("{}", format!("* {}", line).dimmed());
    }
}

fn print_banner(client: &CollabClient) {
    let config = client.config();
    let target = if config.read_only {
        format!("{} (read-only)", config.http_url)
    } else {
        config.websocket_url.clone()
    };
    println!(
        "{}",
        format!(
            r#"
  ╔╦╗╔═╗╔╗╔╔╦╗╔═╗╔╦╗   CLI
   ║ ╠═╣║║║ ║║║╣ ║║║   Session at {}
   ╩ ╩ ╩╝╚╝═╩╝╚═╝╩ ╩   Type 'help' for commands, 'quit' to exit
"#,
            target
        )
        .cyan()
    );
}

fn print_help() {
    println!(
        r#"
{}

{}
  get [path]                             Show a value or the whole document
  set <path> <value>                     Overwrite a value (JSON or text)
  create <path> <value>                  Append to a list or add a map entry
  delete <path>                          Remove a list or map entry

{}
  insert <path> <pos> <text>             Insert text at a character offset
  remove <path> <from> <to>              Remove the characters in [from, to)

{}
  focus [path] [anchor] [head]           Move your focus and selection
  who                                    List participants and their focus
  comments                               List comments and their anchors

{}
  status                                 Connection, version and access
  reconnect                              Connect again from a clean slate

{}
  help                                   Show this help
  clear                                  Clear screen
  quit/exit                              Exit CLI
"#,
        "Tandem Commands".cyan().bold(),
        "Document".yellow().bold(),
        "Text".yellow().bold(),
        "Presence".yellow().bold(),
        "Connection".yellow().bold(),
        "Local".yellow().bold(),
    );
}
