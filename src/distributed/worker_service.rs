//! Worker service
//!
//! This module implements the long-running service that executes tasks on
//! behalf of a dispatch coordinator. The worker service:
//! - Binds its listen address up front (bind failure is fatal and reported
//!   before any connection is served)
//! - Accepts connections indefinitely, one task per connection
//! - Handles every connection on its own tokio task
//! - Runs operation bodies on the blocking pool
//! - Converts every decode or execution failure into an Err envelope

use crate::config::WorkerConfig;
use crate::distributed::protocol::*;
use crate::task::{DecodeError, OperationError, OperationRegistry, ResultEnvelope, TaskDescriptor};
use crate::Result;
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Pause after a failed accept (e.g. descriptor exhaustion) before retrying
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection settings shared by every connection handler
#[derive(Debug)]
struct ConnectionContext {
    registry: Arc<OperationRegistry>,
    node_id: String,
    io_timeout: Duration,
    max_frame_bytes: usize,
}

/// Worker service
///
/// Holds a bound listener; call [`WorkerService::run`] to start serving.
pub struct WorkerService {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
}

impl WorkerService {
    /// Bind the worker's listen address
    ///
    /// Fails if the address cannot be bound (port in use, permission denied).
    pub async fn bind(config: &WorkerConfig, registry: Arc<OperationRegistry>) -> Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind worker service on {}", addr))?;

        let node_id = match &config.node_id {
            Some(id) => id.clone(),
            None => get_node_id(),
        };

        let local = listener
            .local_addr()
            .context("Failed to read worker listen address")?;
        info!(addr = %local, node_id = %node_id, operations = registry.len(), "worker service listening");

        Ok(Self {
            listener,
            context: Arc::new(ConnectionContext {
                registry,
                node_id,
                io_timeout: config.io_timeout(),
                max_frame_bytes: config.max_frame_bytes,
            }),
        })
    }

    /// Address the listener is bound to (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read worker listen address")
    }

    /// Serve connections forever
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve connections until `shutdown` completes
    ///
    /// Connections already accepted keep running to completion on their own
    /// tasks; only the accept loop stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(node_id = %self.context.node_id, "worker service stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let context = self.context.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &context).await {
                                warn!(%peer, error = %e, "connection handling failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
}

/// Bind and serve forever
///
/// Returns only if binding fails.
pub async fn start(config: &WorkerConfig, registry: OperationRegistry) -> Result<()> {
    WorkerService::bind(config, Arc::new(registry)).await?.run().await
}

/// Why no task could be taken from a connection
enum Rejection {
    /// The task was unusable; the peer gets an Err envelope
    Decode(DecodeError),
    /// The connection itself failed; nothing can be sent back
    Disconnected(FrameError),
}

/// Handle one connection: read one task, reply with one envelope, close
async fn handle_connection(mut stream: TcpStream, context: &ConnectionContext) -> Result<()> {
    let envelope = match receive_task(&mut stream, context).await {
        Ok(task) => execute(task, &context.registry).await,
        Err(Rejection::Decode(e)) => {
            debug!(error = %e, "rejecting task");
            ResultEnvelope::err(e)
        }
        Err(Rejection::Disconnected(e)) => {
            debug!(error = %e, "connection closed before a task arrived");
            return Ok(());
        }
    };

    let reply = Message::Outcome(OutcomeMessage {
        node_id: context.node_id.clone(),
        envelope,
    });
    timeout(context.io_timeout, write_message(&mut stream, &reply))
        .await
        .context("Timed out writing reply")?
        .context("Failed to write reply")?;

    // Half-close so the peer sees EOF right after the reply
    let _ = stream.shutdown().await;
    Ok(())
}

/// Read and validate the task frame
async fn receive_task(
    stream: &mut TcpStream,
    context: &ConnectionContext,
) -> std::result::Result<TaskDescriptor, Rejection> {
    let frame = match timeout(context.io_timeout, read_frame(stream, context.max_frame_bytes)).await {
        Err(_) => {
            return Err(Rejection::Decode(DecodeError::Malformed(format!(
                "no complete frame within {:?}",
                context.io_timeout
            ))))
        }
        Ok(frame) => frame,
    };

    let payload = match frame {
        Ok(payload) => payload,
        Err(FrameError::TooLarge { len, max }) => {
            // Consume the body so the reply is not lost to a connection reset
            let mut body = tokio::io::AsyncReadExt::take(&mut *stream, len as u64);
            let drained = timeout(context.io_timeout, tokio::io::copy(&mut body, &mut tokio::io::sink())).await;
            if !matches!(drained, Ok(Ok(n)) if n == len as u64) {
                return Err(Rejection::Disconnected(FrameError::TooLarge { len, max }));
            }
            return Err(Rejection::Decode(DecodeError::Malformed(format!(
                "frame too large: {} bytes (max {})",
                len, max
            ))));
        }
        Err(e) => return Err(Rejection::Disconnected(e)),
    };

    let message = decode_payload(&payload)
        .map_err(|e| Rejection::Decode(DecodeError::Malformed(e.to_string())))?;

    match message {
        Message::Dispatch(dispatch) if dispatch.protocol_version != PROTOCOL_VERSION => {
            Err(Rejection::Decode(DecodeError::VersionMismatch {
                coordinator: dispatch.protocol_version,
                worker: PROTOCOL_VERSION,
            }))
        }
        Message::Dispatch(dispatch) => Ok(dispatch.task),
        other => Err(Rejection::Decode(DecodeError::UnexpectedMessage(other.kind()))),
    }
}

/// Resolve and run a task, catching every failure
async fn execute(task: TaskDescriptor, registry: &OperationRegistry) -> ResultEnvelope {
    let invocation = match registry.resolve(&task) {
        Ok(invocation) => invocation,
        Err(e) => {
            debug!(operation = %task.operation, error = %e, "task rejected");
            return ResultEnvelope::err(e);
        }
    };

    debug!(operation = invocation.operation(), task = %task, "executing task");
    let result = match tokio::task::spawn_blocking(move || invocation.run()).await {
        Ok(result) => result,
        Err(join_error) => Err(OperationError::Panicked(panic_message(join_error))),
    };

    if let Err(ref e) = result {
        debug!(operation = %task.operation, error = %e, "operation failed");
    }
    result.into()
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Get node identifier (hostname)
pub fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::builtins::builtin_registry;
    use crate::task::{Operation, Signature};
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            node_id: Some("test-worker".to_string()),
            io_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    async fn spawn_worker(config: WorkerConfig, registry: OperationRegistry) -> SocketAddr {
        let service = WorkerService::bind(&config, Arc::new(registry)).await.unwrap();
        let addr = service.local_addr().unwrap();
        tokio::spawn(service.run());
        addr
    }

    async fn roundtrip(addr: SocketAddr, frame: &[u8]) -> OutcomeMessage {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, frame).await.unwrap();
        match read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES).await.unwrap() {
            Message::Outcome(outcome) => outcome,
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    async fn send_task(addr: SocketAddr, task: TaskDescriptor) -> ResultEnvelope {
        let frame = encode_message(&Message::Dispatch(DispatchMessage::new(task))).unwrap();
        roundtrip(addr, &frame).await.envelope
    }

    #[tokio::test]
    async fn test_executes_task() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let envelope = send_task(addr, TaskDescriptor::new("add").arg(5).arg(3)).await;
        assert_eq!(envelope, ResultEnvelope::ok(8));
    }

    #[tokio::test]
    async fn test_reply_carries_node_id() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let frame = encode_message(&Message::Dispatch(DispatchMessage::new(TaskDescriptor::new("echo").arg(1)))).unwrap();
        let outcome = roundtrip(addr, &frame).await;
        assert_eq!(outcome.node_id, "test-worker");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let envelope = send_task(addr, TaskDescriptor::new("multiply").arg(5).arg(3)).await;
        assert_eq!(envelope, ResultEnvelope::err("unknown operation: multiply"));
    }

    #[tokio::test]
    async fn test_division_by_zero_keeps_serving() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;

        let envelope = send_task(addr, TaskDescriptor::new("divide").arg(1).arg(0)).await;
        assert!(envelope.error_message().unwrap().contains("division by zero"));

        let envelope = send_task(addr, TaskDescriptor::new("divide").arg(9).arg(3)).await;
        assert_eq!(envelope, ResultEnvelope::ok(3));
    }

    #[tokio::test]
    async fn test_arity_mismatch() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let envelope = send_task(addr, TaskDescriptor::new("add").arg(5)).await;
        assert_eq!(
            envelope,
            ResultEnvelope::err("arity mismatch for add: missing argument 'b'")
        );
    }

    #[tokio::test]
    async fn test_panicking_operation() {
        let mut registry = OperationRegistry::new();
        registry
            .register(Operation::new("explode", Signature::default(), |_| panic!("boom")))
            .unwrap();
        let addr = spawn_worker(test_config(), registry).await;

        let envelope = send_task(addr, TaskDescriptor::new("explode")).await;
        assert_eq!(envelope, ResultEnvelope::err("operation panicked: boom"));

        let envelope = send_task(addr, TaskDescriptor::new("explode")).await;
        assert!(!envelope.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;

        let garbage = [0xc1u8, 0xc1, 0xc1];
        let mut frame = (garbage.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(&garbage);

        let outcome = roundtrip(addr, &frame).await;
        assert!(outcome.envelope.error_message().unwrap().starts_with("malformed task"));
    }

    #[tokio::test]
    async fn test_protocol_version_mismatch() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let msg = Message::Dispatch(DispatchMessage {
            protocol_version: PROTOCOL_VERSION + 1,
            task: TaskDescriptor::new("echo").arg(1),
        });
        let outcome = roundtrip(addr, &encode_message(&msg).unwrap()).await;
        assert_eq!(
            outcome.envelope.error_message(),
            Some("protocol version mismatch: coordinator=2, worker=1")
        );
    }

    #[tokio::test]
    async fn test_unexpected_message() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let msg = Message::Outcome(OutcomeMessage {
            node_id: "peer".to_string(),
            envelope: ResultEnvelope::ok(1),
        });
        let outcome = roundtrip(addr, &encode_message(&msg).unwrap()).await;
        assert_eq!(
            outcome.envelope.error_message(),
            Some("unexpected message: expected Dispatch, got Outcome")
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let config = WorkerConfig {
            max_frame_bytes: 1024,
            ..test_config()
        };
        let addr = spawn_worker(config, builtin_registry("w").unwrap()).await;

        let envelope = send_task(addr, TaskDescriptor::new("len").arg("y".repeat(4096))).await;
        assert!(envelope.error_message().unwrap().contains("frame too large"));
    }

    #[tokio::test]
    async fn test_large_payload_byte_exact() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;
        let payload: String = (0..1024 * 1024).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

        let envelope = send_task(addr, TaskDescriptor::new("echo").arg(payload.clone())).await;
        assert_eq!(envelope, ResultEnvelope::ok(payload));
    }

    #[tokio::test]
    async fn test_stalled_connection_does_not_block_others() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;

        // Open a connection and send only half a length prefix
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(&[1, 0]).await.unwrap();

        let slow = tokio::spawn(send_task(addr, TaskDescriptor::new("sleep").arg(300)));
        let envelope = send_task(addr, TaskDescriptor::new("echo").arg("fast")).await;
        assert_eq!(envelope, ResultEnvelope::ok("fast"));
        assert_eq!(slow.await.unwrap(), ResultEnvelope::ok(300));
        drop(stalled);
    }

    #[tokio::test]
    async fn test_empty_connection_is_ignored() {
        let addr = spawn_worker(test_config(), builtin_registry("w").unwrap()).await;

        drop(TcpStream::connect(addr).await.unwrap());

        let envelope = send_task(addr, TaskDescriptor::new("echo").arg(json!({"k": [1, 2]}))).await;
        assert_eq!(envelope, ResultEnvelope::ok(json!({"k": [1, 2]})));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = WorkerService::bind(&test_config(), Arc::new(OperationRegistry::new()))
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let config = WorkerConfig { port, ..test_config() };
        let err = match WorkerService::bind(&config, Arc::new(OperationRegistry::new())).await {
            Ok(_) => panic!("Expected bind failure"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Failed to bind worker service"));
    }

    #[tokio::test]
    async fn test_start_returns_bind_error() {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = WorkerConfig {
            port: blocker.local_addr().unwrap().port(),
            ..test_config()
        };
        assert!(start(&config, OperationRegistry::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let service = WorkerService::bind(&test_config(), Arc::new(OperationRegistry::new()))
            .await
            .unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(service.run_until(async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
