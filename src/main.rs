//! piemenud — pie-menu server and client.
//!
//! `piemenud serve` listens on the bus socket, shows one menu at a time
//! through an external picker and broadcasts the outcome.
//! `piemenud show` sends a menu description and waits for its outcome.

mod config;
mod ipc;
mod menu;
mod presenter;
mod session;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

use config::{DEFAULT_MAX_CONNECTIONS, PickerConfig, ServerConfig};
use ipc::client::BusClient;
use ipc::protocol::{SHOW_MENU_FAILED, Signal};
use ipc::server::{BusEndpoint, Server};
use presenter::CommandPresenter;
use session::SessionMachine;

/// Exit code when the user dismissed the menu.
const EXIT_CANCELLED: u8 = 2;

/// Pie-menu server
#[derive(Parser, Debug)]
#[command(name = "piemenud")]
#[command(about = "Show declarative menus and report the user's choice")]
#[command(version)]
struct Cli {
    /// Bus socket path
    #[arg(long, global = true, env = "PIEMENU_SOCKET")]
    socket: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the menu server
    Serve(ServeArgs),
    /// Send a menu to a running server and wait for the result
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Maximum concurrently connected clients
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// dmenu-compatible picker program
    #[arg(long, env = "PIEMENU_PICKER")]
    picker: Option<String>,

    /// Picker argument (repeatable); `{prompt}` becomes the submenu name
    #[arg(long = "picker-arg", allow_hyphen_values = true)]
    picker_args: Vec<String>,

    /// Pass icon hints to the picker (rofi)
    #[arg(long)]
    icons: bool,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Menu description file, or `-` for stdin
    #[arg(default_value = "-")]
    description: PathBuf,

    /// Print the session id and exit without waiting
    #[arg(long)]
    no_wait: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let socket_path = cli.socket.unwrap_or_else(config::default_socket_path);

    match cli.command {
        Command::Serve(args) => serve(socket_path, args).await,
        Command::Show(args) => show(socket_path, args).await,
    }
}

async fn serve(socket_path: PathBuf, args: ServeArgs) -> ExitCode {
    let defaults = PickerConfig::default();
    let picker = PickerConfig {
        program: args.picker.unwrap_or(defaults.program),
        args: if args.picker_args.is_empty() {
            defaults.args
        } else {
            args.picker_args
        },
        icons: args.icons,
    };
    let config = ServerConfig {
        socket_path,
        max_connections: args.max_connections,
        picker,
    };
    tracing::info!(picker = %config.picker.program, "piemenud starting");

    let machine = SessionMachine::new(Arc::new(CommandPresenter::new(config.picker.clone())));
    let server = match Server::bind(&config, BusEndpoint::new(machine)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            return ExitCode::FAILURE;
        }
    };
    server
        .run(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        })
        .await;

    ExitCode::SUCCESS
}

async fn read_description(source: &Path) -> std::io::Result<String> {
    if source.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        Ok(raw)
    } else {
        tokio::fs::read_to_string(source).await
    }
}

/// How a `show` invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShowResult {
    /// The id was printed, and the selected item after it when waiting.
    Done,
    Cancelled,
    Failed,
}

impl From<ShowResult> for ExitCode {
    fn from(result: ShowResult) -> Self {
        match result {
            ShowResult::Done => ExitCode::SUCCESS,
            ShowResult::Cancelled => ExitCode::from(EXIT_CANCELLED),
            ShowResult::Failed => ExitCode::FAILURE,
        }
    }
}

async fn show(socket_path: PathBuf, args: ShowArgs) -> ExitCode {
    let description = match read_description(&args.description).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(path = %args.description.display(), error = %e, "cannot read menu description");
            return ExitCode::FAILURE;
        }
    };

    let mut client = match BusClient::connect(&socket_path).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "is the server running?");
            return ExitCode::FAILURE;
        }
    };

    let mut out = std::io::stdout();
    run_show(&mut client, description, !args.no_wait, &mut out)
        .await
        .into()
}

/// Call `ShowMenu`, print the id, then optionally wait and print the item.
async fn run_show(
    client: &mut BusClient,
    description: String,
    wait: bool,
    out: &mut impl Write,
) -> ShowResult {
    let id = match client.show_menu(description).await {
        Ok(SHOW_MENU_FAILED) => {
            tracing::error!("menu rejected: invalid description or another menu is shown");
            return ShowResult::Failed;
        }
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "ShowMenu failed");
            return ShowResult::Failed;
        }
    };

    if let Err(e) = writeln!(out, "{id}").and_then(|()| out.flush()) {
        tracing::error!(id, error = %e, "cannot write to stdout");
        return ShowResult::Failed;
    }
    if !wait {
        return ShowResult::Done;
    }
    tracing::debug!(id, "waiting for the user");

    match client.wait_for(id).await {
        Ok(Signal::OnSelect { item, .. }) => match writeln!(out, "{item}") {
            Ok(()) => ShowResult::Done,
            Err(e) => {
                tracing::error!(id, error = %e, "cannot write to stdout");
                ShowResult::Failed
            }
        },
        Ok(Signal::OnCancel { .. }) => {
            tracing::info!(id, "menu cancelled");
            ShowResult::Cancelled
        }
        Err(e) => {
            tracing::error!(id, error = %e, "lost connection before the menu resolved");
            ShowResult::Failed
        }
    }
}
