/// JSON-RPC version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Default address the team server listens on.
pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:5004";

/// Metadata key carrying the bearer credential.
pub const AUTHORIZATION_KEY: &str = "authorization";
/// Authentication scheme expected in the authorization metadata.
pub const BEARER_SCHEME: &str = "Bearer";

/// Operator name every call is attributed to when remote auth is disabled.
pub const LOCAL_OPERATOR: &str = "server";

/// Upper bound for fetching task content after a task-scoped event.
pub const TASK_FETCH_TIMEOUT_SECS: u64 = 10;

// ── RPC method names ──

pub const METHOD_SUBMIT: &str = "corvid.submit";
pub const METHOD_GET_TASK_CONTENT: &str = "corvid.get_task_content";
pub const METHOD_EVENTS: &str = "corvid.events";
pub const METHOD_GET_SESSIONS: &str = "corvid.get_sessions";
pub const METHOD_GET_ALIVE_SESSIONS: &str = "corvid.get_alive_sessions";
pub const METHOD_GET_SESSION: &str = "corvid.get_session";
pub const METHOD_GET_BEACONS: &str = "corvid.get_beacons";
pub const METHOD_GET_TASKS: &str = "corvid.get_tasks";
pub const METHOD_BROADCAST: &str = "corvid.broadcast";
pub const METHOD_GET_CLIENTS: &str = "corvid.get_clients";
