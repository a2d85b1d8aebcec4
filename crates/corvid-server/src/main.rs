use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use corvid_server::logging::init_tracing;
use corvid_server::operators::FileOperatorStore;
#[cfg(unix)]
use corvid_server::spawn_hangup_handler;
use corvid_server::{RpcServer, ServerConfig, ServerState};

#[derive(Parser, Debug)]
#[command(name = "corvid-server")]
#[command(about = "Corvid team server")]
struct Cli {
    /// Config file (default: ~/.corvid/server.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the RPC server.
    Serve {
        /// Override the listen address.
        #[arg(long)]
        bind: Option<String>,
        /// Trust every caller as the local operator.
        #[arg(long, conflicts_with = "remote_auth")]
        local: bool,
        /// Require bearer tokens.
        #[arg(long)]
        remote_auth: bool,
    },
    /// Manage operators.
    Operator {
        #[command(subcommand)]
        action: OperatorAction,
    },
}

#[derive(Subcommand, Debug)]
enum OperatorAction {
    /// Create an operator and print its token.
    Add { name: String },
    /// Delete an operator. Send SIGHUP to a running server to drop its
    /// cached identity.
    Remove { name: String },
    /// List operators.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logs);

    match cli.command {
        Command::Serve { bind, local, remote_auth } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if local {
                config.remote_auth = false;
            } else if remote_auth {
                config.remote_auth = true;
            }
            tracing::info!(
                bind = %config.bind_addr,
                remote_auth = config.remote_auth,
                operators = %config.operators_path.display(),
                "Starting corvid-server"
            );
            let state = Arc::new(ServerState::from_config(config));
            #[cfg(unix)]
            let _hangup = spawn_hangup_handler(Arc::clone(&state))?;
            let server = RpcServer::bind(state).await?;
            tokio::select! {
                result = server.run() => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
        Command::Operator { action } => {
            let store = FileOperatorStore::new(config.operators_path.clone());
            match action {
                OperatorAction::Add { name } => {
                    let (operator, token) = store.add_operator(&name).await?;
                    println!("operator: {}", operator.name);
                    println!("token:    {token}");
                    println!("The token is shown once. Store it now.");
                }
                OperatorAction::Remove { name } => {
                    if store.remove_operator(&name).await? {
                        println!("removed {name}");
                        println!("Send SIGHUP to a running server to revoke cached sessions.");
                    } else {
                        anyhow::bail!("no operator named {name}");
                    }
                }
                OperatorAction::List => {
                    for operator in store.load().await? {
                        println!("{}\t{}", operator.name, operator.created_at.to_rfc3339());
                    }
                }
            }
        }
    }

    Ok(())
}
