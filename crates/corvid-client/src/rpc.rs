//! Client side of the team server API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use corvid_protocol::*;

use crate::ClientError;

/// Idle connections kept for reuse; extra ones are closed on return.
const MAX_IDLE_CONNECTIONS: usize = 4;

/// Calls the client makes against the team server.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, ClientError>;

    async fn task_content(&self, task: &TaskRef) -> Result<TaskContent, ClientError>;

    /// Open the server event stream.
    async fn subscribe(&self) -> Result<Box<dyn EventStream>, ClientError>;

    /// All sessions, or only live ones.
    async fn sessions(&self, all: bool) -> Result<Vec<SessionRecord>, ClientError>;

    async fn session(&self, session_id: &str) -> Result<SessionRecord, ClientError>;

    async fn beacons(&self) -> Result<Vec<BeaconRecord>, ClientError>;

    async fn tasks(&self, session_id: &str) -> Result<Vec<TaskSummary>, ClientError>;

    async fn broadcast(&self, message: &str) -> Result<(), ClientError>;

    /// Operators currently subscribed to server events.
    async fn clients(&self) -> Result<Vec<ClientInfo>, ClientError>;
}

/// Server-push event source. `Ok(None)` is a clean end of stream.
#[async_trait]
pub trait EventStream: Send {
    async fn next_event(&mut self) -> Result<Option<Event>, ClientError>;
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        tracing::debug!(addr = %addr, "Connected to team server");
        Ok(Self { lines: BufReader::new(reader).lines(), writer })
    }

    async fn send(&mut self, request: &RpcRequest) -> Result<(), ClientError> {
        let mut json = serde_json::to_vec(request)?;
        json.push(b'\n');
        self.writer.write_all(&json).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send `request` and wait for the response carrying its id.
    async fn roundtrip(&mut self, request: &RpcRequest) -> Result<RpcResponse, ClientError> {
        self.send(request).await?;
        loop {
            let line = self.lines.next_line().await?.ok_or(ClientError::ConnectionClosed)?;
            if line.trim().is_empty() {
                continue;
            }
            let response: RpcResponse = serde_json::from_str(&line)?;
            if response.id == request.id {
                return Ok(response);
            }
            tracing::debug!(id = ?response.id, "Skipping response for another request");
        }
    }
}

/// JSON-RPC client over a small pool of persistent TCP connections.
///
/// Each call checks out an idle connection, or opens one when none is idle,
/// and owns it for the whole roundtrip, so a slow call never holds up
/// another. A call that does not finish (I/O error, or its future dropped by
/// a timeout) takes its connection with it.
pub struct RpcClient {
    addr: String,
    token: Option<String>,
    idle: Mutex<Vec<Connection>>,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>, token: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            token,
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> Result<Connection, ClientError> {
        let idle = self.idle.lock().await.pop();
        match idle {
            Some(conn) => Ok(conn),
            None => Connection::open(&self.addr).await,
        }
    }

    async fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    fn request(&self, method: &str, params: serde_json::Value) -> RpcRequest {
        let request = RpcRequest::new(method, params);
        match &self.token {
            Some(token) => request.with_bearer(token),
            None => request,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ClientError> {
        let request = self.request(method, params);
        let mut conn = self.checkout().await?;
        let response = conn.roundtrip(&request).await?;
        self.checkin(conn).await;

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ControlPlane for RpcClient {
    async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, ClientError> {
        let params = serde_json::to_value(SubmitParams { request })?;
        self.call(METHOD_SUBMIT, params).await
    }

    async fn task_content(&self, task: &TaskRef) -> Result<TaskContent, ClientError> {
        let params = serde_json::to_value(TaskContentParams { task: task.clone() })?;
        self.call(METHOD_GET_TASK_CONTENT, params).await
    }

    async fn subscribe(&self) -> Result<Box<dyn EventStream>, ClientError> {
        let mut conn = Connection::open(&self.addr).await?;
        let request = self.request(METHOD_EVENTS, serde_json::json!({}));
        let response = conn.roundtrip(&request).await?;
        let ack: SubscribeAck = serde_json::from_value(response.into_result()?)?;
        if !ack.subscribed {
            return Err(ProtocolError::UnexpectedResponse("subscription refused".into()).into());
        }
        tracing::info!(operator = %ack.operator, "Subscribed to server events");
        Ok(Box::new(TcpEventStream { conn }))
    }

    async fn sessions(&self, all: bool) -> Result<Vec<SessionRecord>, ClientError> {
        let method = if all { METHOD_GET_SESSIONS } else { METHOD_GET_ALIVE_SESSIONS };
        self.call(method, serde_json::json!({})).await
    }

    async fn session(&self, session_id: &str) -> Result<SessionRecord, ClientError> {
        let params = serde_json::to_value(SessionParams { session_id: session_id.to_string() })?;
        self.call(METHOD_GET_SESSION, params).await
    }

    async fn beacons(&self) -> Result<Vec<BeaconRecord>, ClientError> {
        self.call(METHOD_GET_BEACONS, serde_json::json!({})).await
    }

    async fn tasks(&self, session_id: &str) -> Result<Vec<TaskSummary>, ClientError> {
        let params = serde_json::to_value(SessionParams { session_id: session_id.to_string() })?;
        self.call(METHOD_GET_TASKS, params).await
    }

    async fn broadcast(&self, message: &str) -> Result<(), ClientError> {
        let params = serde_json::to_value(BroadcastParams { message: message.to_string() })?;
        let _: serde_json::Value = self.call(METHOD_BROADCAST, params).await?;
        Ok(())
    }

    async fn clients(&self) -> Result<Vec<ClientInfo>, ClientError> {
        self.call(METHOD_GET_CLIENTS, serde_json::json!({})).await
    }
}

/// Event stream on a dedicated connection.
struct TcpEventStream {
    conn: Connection,
}

#[async_trait]
impl EventStream for TcpEventStream {
    async fn next_event(&mut self) -> Result<Option<Event>, ClientError> {
        loop {
            let Some(line) = self.conn.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse server event, skipping");
                }
            }
        }
    }
}
