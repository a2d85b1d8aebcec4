use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use corvid_client::{ClientConfig, ControlPlane, RpcClient, ServerStatus};
use corvid_protocol::TaskRequest;

#[derive(Parser, Debug)]
#[command(name = "corvid-client")]
#[command(about = "Corvid operator client")]
struct Cli {
    /// Config file (default: ~/.corvid/client.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the team server address.
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions.
    Sessions {
        /// Include dead sessions.
        #[arg(long)]
        all: bool,
    },
    /// List beacons.
    Beacons,
    /// Show the task history of a session or beacon.
    Tasks { session_id: String },
    /// Run a command on a session and wait for its result.
    Exec {
        #[arg(long)]
        session: String,
        /// Seconds to wait for the result.
        #[arg(long, default_value_t = 300)]
        wait: u64,
        /// Opaque input passed to the command.
        #[arg(long)]
        input: Option<String>,
        name: String,
        args: Vec<String>,
    },
    /// List operators connected to the server.
    Clients,
    /// Send a message to every connected operator.
    Broadcast { message: String },
    /// Print server events until the stream closes.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ClientConfig::load_or_default(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_addr = server;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rpc: Arc<dyn ControlPlane> =
        Arc::new(RpcClient::new(config.server_addr.clone(), config.token.clone()));
    let status = ServerStatus::new(Arc::clone(&rpc)).with_fetch_timeout(config.fetch_timeout());

    match cli.command {
        Command::Sessions { all } => {
            for s in status.update_sessions(all).await? {
                let state = if s.alive { "alive" } else { "dead" };
                println!("{}\t{}\t{}\t{}", s.session_id, s.name, s.remote_addr, state);
            }
        }
        Command::Beacons => {
            for b in status.update_beacons().await? {
                println!(
                    "{}\t{}\t{}\tnext check-in {}",
                    b.beacon_id,
                    b.name,
                    b.remote_addr,
                    b.next_checkin.to_rfc3339()
                );
            }
        }
        Command::Tasks { session_id } => {
            for t in rpc.tasks(&session_id).await? {
                let state = if t.finished { "done" } else { "pending" };
                println!("{}\t{}\t{}", t.task_id, t.name, state);
            }
        }
        Command::Exec { session, wait, input, name, args } => {
            let mut events = status.spawn_event_handler();
            let mut request = TaskRequest::new(session, name).with_args(args);
            if let Some(input) = input {
                request = request.with_input(input);
            }
            let result = status
                .execute(request, &mut events, Duration::from_secs(wait))
                .await;
            events.abort();
            let content = result?;
            println!("{}", serde_json::to_string_pretty(&content.body)?);
        }
        Command::Clients => {
            for client in status.update_clients().await? {
                println!("{}", client.name);
            }
        }
        Command::Broadcast { message } => {
            rpc.broadcast(&message).await?;
        }
        Command::Watch => {
            let reason = status.spawn_event_handler().await?;
            tracing::info!(?reason, "Done");
        }
    }

    Ok(())
}
