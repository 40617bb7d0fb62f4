//! Capability discovery handshake
//!
//! One discovery request per connection, no retries. Handshakes with all
//! servers run concurrently and every one settles before the registry is
//! built.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument};

use crate::connection::{Connection, RequestError};
use crate::error::{DiscoveryError, TransportError};
use crate::protocol::{Frame, ToolDescriptor};

/// Ask one worker for its tool list
#[instrument(skip(connection), fields(server = %connection.server()))]
pub async fn discover(
    connection: &Connection,
    timeout: Duration,
) -> Result<Vec<ToolDescriptor>, DiscoveryError> {
    let reply = connection
        .request(|id| Frame::DiscoveryRequest { id }, timeout)
        .await
        .map_err(|e| match e {
            RequestError::Timeout(t) => DiscoveryError::Timeout(t),
            RequestError::Closed => DiscoveryError::Transport(TransportError::Closed),
            RequestError::Malformed(reason) => DiscoveryError::UnexpectedReply(reason),
            RequestError::Transport(e) => DiscoveryError::Transport(e),
        })?;

    match reply {
        Frame::DiscoveryResponse { tools, .. } => {
            debug!(count = tools.len(), "Discovery response received");
            Ok(tools)
        }
        Frame::CallError { message, .. } => Err(DiscoveryError::UnexpectedReply(message)),
        other => Err(DiscoveryError::UnexpectedReply(format!(
            "expected discovery_response, got {}",
            other.kind()
        ))),
    }
}

/// Run discovery against every connection concurrently
///
/// Results come back in the order of `connections`.
pub async fn discover_all(
    connections: &[(String, Arc<Connection>)],
    timeout: Duration,
) -> Vec<(String, Result<Vec<ToolDescriptor>, DiscoveryError>)> {
    info!(servers = connections.len(), "Discovering tools");

    let handshakes = connections.iter().map(|(name, connection)| async move {
        (name.clone(), discover(connection, timeout).await)
    });
    join_all(handshakes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, TransportChannel};
    use crate::codec::Inbound;
    use crate::protocol::{ParamSpec, ParamType};
    use std::time::Instant;

    fn connect(name: &str) -> (Arc<Connection>, MemoryChannel) {
        let (client, worker) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (worker_read, worker_write) = tokio::io::split(worker);
        (
            Connection::open(name, client_read, client_write),
            TransportChannel::new(worker_read, worker_write),
        )
    }

    fn echo_tool() -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echo text back")
            .param(ParamSpec::required("text", ParamType::String, "text to echo"))
    }

    /// Answer one discovery request after `delay`
    fn serve_discovery(mut worker: MemoryChannel, tools: Vec<ToolDescriptor>, delay: Duration) -> tokio::task::JoinHandle<MemoryChannel> {
        tokio::spawn(async move {
            let id = match worker.receive().await.unwrap() {
                Some(Inbound::Frame(Frame::DiscoveryRequest { id })) => id,
                other => panic!("expected discovery request, got {other:?}"),
            };
            tokio::time::sleep(delay).await;
            worker.send(Frame::DiscoveryResponse { id, tools }).await.unwrap();
            worker
        })
    }

    #[tokio::test]
    async fn test_discover_tools() {
        let (conn, worker) = connect("echo");
        let server = serve_discovery(worker, vec![echo_tool()], Duration::ZERO);

        let tools = discover(&conn, Duration::from_secs(5)).await.unwrap();
        assert_eq!(tools, vec![echo_tool()]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_wrong_reply_kind() {
        let (conn, mut worker) = connect("odd");
        let server = tokio::spawn(async move {
            let id = match worker.receive().await.unwrap() {
                Some(Inbound::Frame(frame)) => frame.id(),
                other => panic!("unexpected {other:?}"),
            };
            worker.send(Frame::CallResponse { id, content: "hi".into() }).await.unwrap();
            worker
        });

        let err = discover(&conn, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::UnexpectedReply(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_silent_worker_times_out() {
        let (conn, _worker) = connect("silent");

        let err = discover(&conn, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_discover_closed_worker() {
        let (conn, worker) = connect("gone");
        drop(worker);

        let err = discover(&conn, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_discover_all_runs_concurrently() {
        let delay = Duration::from_millis(300);
        let mut connections = Vec::new();
        let mut servers = Vec::new();
        for name in ["a", "b", "c"] {
            let (conn, worker) = connect(name);
            let tool = ToolDescriptor::new(format!("{name}_tool"), "tool");
            servers.push(serve_discovery(worker, vec![tool], delay));
            connections.push((name.to_string(), conn));
        }

        let started = Instant::now();
        let results = discover_all(&connections, Duration::from_secs(5)).await;
        let elapsed = started.elapsed();

        // Serialized handshakes would take at least three delays
        assert!(elapsed < delay * 3, "discovery took {elapsed:?}");
        let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        for server in servers {
            server.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_discover_all_partial_failure() {
        let (good, worker) = connect("good");
        let server = serve_discovery(worker, vec![echo_tool()], Duration::ZERO);
        let (bad, _silent) = connect("bad");

        let results = discover_all(
            &[("good".to_string(), good), ("bad".to_string(), bad)],
            Duration::from_millis(100),
        )
        .await;

        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(DiscoveryError::Timeout(_))));
        server.await.unwrap();
    }
}
