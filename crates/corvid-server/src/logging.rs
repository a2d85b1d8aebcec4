//! Call logging and tracing setup.

use async_trait::async_trait;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use corvid_protocol::{RpcStatus, StatusCode};

use crate::config::LogConfig;
use crate::pipeline::{Call, CallKind, CallOutcome, Interceptor};

/// Severity a completed call is logged at, by status code.
pub fn code_to_level(code: StatusCode) -> Level {
    match code {
        StatusCode::Ok
        | StatusCode::Canceled
        | StatusCode::InvalidArgument
        | StatusCode::NotFound
        | StatusCode::AlreadyExists
        | StatusCode::Unauthenticated => Level::INFO,

        StatusCode::DeadlineExceeded
        | StatusCode::PermissionDenied
        | StatusCode::ResourceExhausted
        | StatusCode::FailedPrecondition
        | StatusCode::Aborted
        | StatusCode::OutOfRange
        | StatusCode::Unavailable => Level::WARN,

        StatusCode::Unknown
        | StatusCode::Unimplemented
        | StatusCode::Internal
        | StatusCode::DataLoss => Level::ERROR,
    }
}

// tracing needs the level at compile time.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == Level::INFO {
            tracing::info!($($arg)+)
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `config.level`.
/// Calling it twice is harmless.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Last stage of both pipelines: one completion line per call.
pub struct LogInterceptor {
    unary_payloads: bool,
    stream_payloads: bool,
}

impl LogInterceptor {
    pub fn new(config: &LogConfig) -> Self {
        Self {
            unary_payloads: config.unary_payloads,
            stream_payloads: config.stream_payloads,
        }
    }

    fn payloads(&self, call: &Call) -> bool {
        match call.kind {
            CallKind::Unary => self.unary_payloads,
            CallKind::Stream => self.stream_payloads,
        }
    }
}

#[async_trait]
impl Interceptor for LogInterceptor {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn on_request(&self, call: &mut Call) -> Result<(), RpcStatus> {
        if self.payloads(call) {
            tracing::debug!(method = %call.method, params = %call.params, "Request payload");
        }
        Ok(())
    }

    fn on_response(&self, call: &Call, outcome: &CallOutcome) {
        let elapsed_ms = call.started.elapsed().as_millis() as u64;
        let (code, detail) = match outcome {
            Ok(value) => {
                if self.payloads(call) {
                    tracing::debug!(method = %call.method, result = %value, "Response payload");
                }
                (StatusCode::Ok, "")
            }
            Err(status) => (status.code, status.message.as_str()),
        };
        log_at!(
            code_to_level(code),
            method = %call.method,
            operator = %call.operator(),
            peer = %call.peer.addr,
            code = %code,
            elapsed_ms,
            tags = ?call.tags,
            detail,
            "Call finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_a_level() {
        for n in 0..=16 {
            let code = StatusCode::from_i32(n);
            let level = code_to_level(code);
            assert!(level == Level::INFO || level == Level::WARN || level == Level::ERROR);
        }
    }

    #[test]
    fn log_interceptor_gates_payloads_by_kind() {
        let log = LogInterceptor::new(&LogConfig {
            level: "info".into(),
            unary_payloads: true,
            stream_payloads: false,
        });
        let peer = crate::pipeline::PeerInfo::new("127.0.0.1:1".parse().unwrap());
        let unary =
            Call::unary(None, "m", serde_json::Value::Null, Default::default(), peer.clone());
        let stream = Call::stream(None, "m", serde_json::Value::Null, Default::default(), peer);
        assert!(log.payloads(&unary));
        assert!(!log.payloads(&stream));
    }
}
