//! Live channel client.
//!
//! One task owns the WebSocket and its reconnect timer. Connection decisions
//! come from `streaming::Link`; this module only performs the I/O and turns
//! frames into `LiveEvent`s, delivered in transport order.

use std::time::Duration;

use futures_util::StreamExt;
use streaming::{decode, BackoffPolicy, Delta, Link};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Connected,
    Disconnected,
    Delta(Delta),
}

/// Handle to the running live task.
#[derive(Debug)]
pub struct LiveHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LiveHandle {
    /// Ask the task to stop without waiting for it.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop reconnecting, close the socket and wait for the task to exit.
    pub async fn shutdown(self) {
        self.signal_shutdown();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!("live task ended abnormally: {err}");
            }
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn the live client. Requires a tokio runtime.
///
/// A handshake that has not completed within `connect_timeout` counts as a
/// failed attempt.
pub fn spawn(
    url: Url,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<LiveEvent>,
) -> LiveHandle {
    let (shutdown, signal) = watch::channel(false);
    let task = tokio::spawn(run(url, policy, connect_timeout, events, signal));
    LiveHandle { shutdown, task }
}

enum Ended {
    Closed,
    Failed,
    Shutdown,
    ConsumerGone,
}

async fn run(
    url: Url,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<LiveEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut link = Link::new(policy);

    while !*shutdown.borrow() && link.start() {
        debug!("connecting to {url} (attempt {})", link.attempts());

        let connected = tokio::select! {
            res = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => res,
            _ = shutdown.changed() => {
                link.shutdown();
                break;
            }
        };

        let delay = match connected {
            Ok(Ok((socket, _))) => {
                link.opened();
                info!("live channel connected to {url}");
                if events.send(LiveEvent::Connected).await.is_err() {
                    link.shutdown();
                    break;
                }
                let delay = match read_frames(socket, &events, &mut shutdown).await {
                    Ended::Closed => link.closed(),
                    Ended::Failed => link.failed(),
                    Ended::Shutdown | Ended::ConsumerGone => {
                        link.shutdown();
                        break;
                    }
                };
                if events.send(LiveEvent::Disconnected).await.is_err() {
                    link.shutdown();
                    break;
                }
                delay
            }
            Ok(Err(err)) => {
                warn!("live channel connect to {url} failed: {err}");
                link.failed()
            }
            Err(_) => {
                warn!("live channel connect to {url} timed out after {connect_timeout:?}");
                link.failed()
            }
        };

        let Some(delay) = delay else {
            break;
        };
        debug!("reconnecting in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                link.shutdown();
                break;
            }
        }
    }

    debug!("live task for {url} stopped");
}

async fn read_frames(
    mut socket: Socket,
    events: &mpsc::Sender<LiveEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Ended {
    loop {
        let frame = tokio::select! {
            frame = socket.next() => frame,
            _ = shutdown.changed() => {
                if let Err(err) = socket.close(None).await {
                    debug!("close on shutdown failed: {err}");
                }
                return Ended::Shutdown;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match decode(&text) {
                Ok(delta) => {
                    if events.send(LiveEvent::Delta(delta)).await.is_err() {
                        return Ended::ConsumerGone;
                    }
                }
                Err(err) => warn!("dropping live message: {err}"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!("live channel closed by peer: {frame:?}");
                return Ended::Closed;
            }
            // Pings are answered by tungstenite on the next read.
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!("live channel error: {err}");
                return Ended::Failed;
            }
            None => return Ended::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use streaming::{BackoffPolicy, Delta, SpotPatch, SpotStatus};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;

    use super::{spawn, LiveEvent};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    fn quick_retry() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(20), Duration::from_millis(200))
    }

    async fn next_event(rx: &mut mpsc::Receiver<LiveEvent>) -> LiveEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("live task alive")
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        // Nothing listens on port 9; every attempt fails.
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn(url, policy, CONNECT_TIMEOUT, tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("live task stops promptly");

        // No connection was ever made, and the sender is gone.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn reconnects_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut first = accept_async(tcp).await.unwrap();
            first.close(None).await.unwrap();

            let (tcp, _) = listener.accept().await.unwrap();
            let mut second = accept_async(tcp).await.unwrap();
            second
                .send(Message::text(r#"{"id": 1, "status": "Occupied"}"#))
                .await
                .unwrap();
            second
                .send(Message::text(r#"{"id": 2, "status": "Reserved"}"#))
                .await
                .unwrap();
            // Hold the session open until the client goes away.
            while let Some(Ok(_)) = second.next().await {}
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn(url, quick_retry(), CONNECT_TIMEOUT, tx);

        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(next_event(&mut rx).await);
        }
        assert_eq!(
            events,
            vec![
                LiveEvent::Connected,
                LiveEvent::Disconnected,
                LiveEvent::Connected,
                LiveEvent::Delta(Delta::Patch(SpotPatch::status(1, SpotStatus::Occupied))),
                LiveEvent::Delta(Delta::Patch(SpotPatch::status(2, SpotStatus::Reserved))),
            ]
        );

        timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("live task stops");
        server.abort();
    }

    #[tokio::test]
    async fn stalled_handshake_counts_as_failure() {
        // Accepts TCP but never answers the upgrade request.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, mut accepted_rx) = mpsc::channel(8);
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (tcp, _) = listener.accept().await.unwrap();
                held.push(tcp);
                if accepted_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn(url, quick_retry(), Duration::from_millis(100), tx);

        // A second attempt only happens once the first one has timed out.
        for _ in 0..2 {
            timeout(Duration::from_secs(5), accepted_rx.recv())
                .await
                .expect("connection attempt in time")
                .expect("server alive");
        }
        assert!(rx.try_recv().is_err());

        timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("live task stops");
        server.abort();
    }
}
