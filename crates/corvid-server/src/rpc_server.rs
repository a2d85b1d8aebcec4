//! JSON-RPC 2.0 server over TCP implementing the operator API.
//!
//! Provides the following methods to operator clients:
//! - `corvid.submit` - Schedule a command on a session or beacon
//! - `corvid.get_task_content` - Fetch the result of a finished task
//! - `corvid.events` - Turn the connection into the server event stream
//! - `corvid.get_sessions` / `corvid.get_alive_sessions` - List sessions
//! - `corvid.get_session` - One session by id
//! - `corvid.get_beacons` - List beacons
//! - `corvid.get_tasks` - Task history of a session or beacon
//! - `corvid.broadcast` - Send a message to every subscribed operator
//! - `corvid.get_clients` - Operators currently holding an event stream
//!
//! Each line received is a JSON-RPC request; each line sent is a response,
//! or on an event stream connection, one event.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

use corvid_protocol::*;

use crate::pipeline::{Call, CallOutcome, Handler, PeerInfo};
use crate::server::ServerState;

/// The JSON-RPC server.
pub struct RpcServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    /// Maximum concurrent connections.
    max_connections: usize,
}

impl RpcServer {
    /// Bind to `state.config.bind_addr`. Port 0 picks an ephemeral port.
    pub async fn bind(state: Arc<ServerState>) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(&state.config.bind_addr).await?;
        let max_connections = state.config.max_connections.max(1);
        Ok(Self { listener, state, max_connections })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let addr = self.local_addr()?;
        tracing::info!(addr = %addr, "JSON-RPC server listening");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_connections));

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            tracing::debug!(peer = %peer_addr, "RPC client connected");

            let state = Arc::clone(&self.state);
            let permit = semaphore.clone().acquire_owned().await?;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, PeerInfo::new(peer_addr), state).await {
                    tracing::warn!(
                        peer = %peer_addr,
                        error = %e,
                        "RPC connection error"
                    );
                }
                tracing::debug!(peer = %peer_addr, "RPC client disconnected");
                drop(permit);
            });
        }
    }
}

/// Handle a single RPC client connection.
async fn handle_connection(
    stream: TcpStream,
    peer: PeerInfo,
    state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let status = RpcStatus::invalid_argument(format!("Invalid JSON: {e}"));
                write_line(&mut writer, &RpcResponse::from_status(None, &status)).await?;
                continue;
            }
        };

        if request.method == METHOD_EVENTS {
            let call = Call::stream(
                request.id,
                request.method,
                request.params,
                request.metadata,
                peer,
            );
            return serve_events(call, lines, writer, &state).await;
        }

        let id = request.id.clone();
        let call = Call::unary(
            request.id,
            request.method,
            request.params,
            request.metadata,
            peer.clone(),
        );
        let response = match state.unary.run(call, &*state).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(status) => RpcResponse::from_status(id, &status),
        };
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

/// Push events on this connection until the client hangs up.
async fn serve_events<W>(
    mut call: Call,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: W,
    state: &ServerState,
) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    if let Err(status) = state.stream.admit(&mut call).await {
        write_line(&mut writer, &RpcResponse::from_status(call.id.clone(), &status)).await?;
        return Ok(());
    }

    let mut rx = state.broker.subscribe();
    let client = ClientInfo { name: call.operator().to_string() };
    let ack = SubscribeAck { subscribed: true, operator: client.name.clone() };
    write_line(&mut writer, &RpcResponse::success(call.id.clone(), serde_json::to_value(&ack)?))
        .await?;
    tracing::info!(operator = %client.name, peer = %call.peer.addr, "Event stream opened");
    let client_id = state.broker.join(client.clone());

    let log_payloads = state.config.logs.stream_payloads;
    let result: Result<(), anyhow::Error> = loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if log_payloads {
                        tracing::debug!(
                            operator = %client.name,
                            kind = event.kind(),
                            "Pushing event"
                        );
                    }
                    if let Err(e) = write_line(&mut writer, &event).await {
                        break Err(e);
                    }
                }
                // A gap could swallow a task-done; end the stream instead.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(operator = %client.name, skipped, "Event subscriber lagging");
                    break Err(anyhow::anyhow!("event stream lagged, {skipped} events dropped"));
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            line = lines.next_line() => match line {
                // Nothing is expected from the client on a stream connection.
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
        }
    };

    tracing::info!(operator = %client.name, "Event stream closed");
    state.broker.leave(client_id);
    let outcome: CallOutcome = match &result {
        Ok(()) => Ok(serde_json::Value::Null),
        Err(e) => Err(RpcStatus::new(StatusCode::Unavailable, e.to_string())),
    };
    state.stream.complete(&call, &outcome);
    result
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, RpcStatus> {
    serde_json::from_value(params.clone())
        .map_err(|e| RpcStatus::invalid_argument(format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> CallOutcome {
    serde_json::to_value(value).map_err(|e| RpcStatus::internal(e.to_string()))
}

#[async_trait]
impl Handler for ServerState {
    async fn handle(&self, call: &Call) -> CallOutcome {
        match call.method.as_str() {
            METHOD_SUBMIT => handle_submit(self, &call.params).await,
            METHOD_GET_TASK_CONTENT => handle_get_task_content(self, &call.params),
            METHOD_GET_SESSIONS => to_result(&self.directory.sessions().await),
            METHOD_GET_ALIVE_SESSIONS => to_result(&self.directory.alive_sessions().await),
            METHOD_GET_SESSION => handle_get_session(self, &call.params).await,
            METHOD_GET_BEACONS => to_result(&self.directory.beacons().await),
            METHOD_GET_TASKS => handle_get_tasks(self, &call.params).await,
            METHOD_BROADCAST => handle_broadcast(self, call),
            METHOD_GET_CLIENTS => to_result(&self.broker.clients()),
            _ => Err(RpcStatus::unimplemented(format!("Unknown method: {}", call.method))),
        }
    }
}

/// Handle `corvid.submit`.
async fn handle_submit(state: &ServerState, params: &serde_json::Value) -> CallOutcome {
    let SubmitParams { request } = parse_params(params)?;
    let handle = state.tasks.submit(request).await?;
    to_result(&handle)
}

/// Handle `corvid.get_task_content`.
fn handle_get_task_content(state: &ServerState, params: &serde_json::Value) -> CallOutcome {
    let TaskContentParams { task } = parse_params(params)?;
    to_result(&state.tasks.content(&task)?)
}

async fn handle_get_session(state: &ServerState, params: &serde_json::Value) -> CallOutcome {
    let SessionParams { session_id } = parse_params(params)?;
    match state.directory.session(&session_id).await {
        Some(session) => to_result(&session),
        None => Err(RpcStatus::not_found(format!("no session {session_id}"))),
    }
}

async fn handle_get_tasks(state: &ServerState, params: &serde_json::Value) -> CallOutcome {
    let SessionParams { session_id } = parse_params(params)?;
    to_result(&state.tasks.tasks_for(&session_id).await?)
}

fn handle_broadcast(state: &ServerState, call: &Call) -> CallOutcome {
    let BroadcastParams { message } = parse_params(&call.params)?;
    let receivers = state.broker.subscriber_count();
    state.broadcast(call.operator(), &message);
    Ok(serde_json::json!({ "receivers": receivers }))
}
