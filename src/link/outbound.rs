//! Outbound link - commands from the bridge to the remote application
//!
//! `enqueue` never blocks: it appends a complete line to an in-memory queue.
//! A single send task owns the socket, so lines are written whole and in
//! order. While disconnected the queue keeps filling, bounded by age and
//! length, and is flushed in order once the link reconnects.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::frame::encode_frame;
use super::LinkState;
use crate::config::LinkConfig;
use crate::error::{BridgeError, FrameError};

#[derive(Debug)]
struct Pending {
    line: String,
    enqueued_at: Instant,
}

struct Shared {
    config: LinkConfig,
    addr: String,
    queue: Mutex<VecDeque<Pending>>,
    wake: Notify,
    state: watch::Sender<LinkState>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Outbound link {} → {}", current, state);
            *current = state;
            true
        });
    }

    /// Drop queued lines older than the configured age
    fn prune_expired(&self, queue: &mut VecDeque<Pending>) {
        let max_age = self.config.max_queue_age();
        let now = Instant::now();
        let before = queue.len();
        while queue
            .front()
            .is_some_and(|p| now.duration_since(p.enqueued_at) > max_age)
        {
            queue.pop_front();
        }
        let dropped = before - queue.len();
        if dropped > 0 {
            warn!(
                "Dropped {} queued command(s) older than {}ms",
                dropped, self.config.max_queue_age_ms
            );
        }
    }
}

enum PumpExit {
    Shutdown,
    Lost(std::io::Error),
}

/// Managed connection carrying commands to the remote application
pub struct OutboundLink {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundLink {
    pub fn new(config: &LinkConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                addr: format!("{}:{}", config.host, config.outbound_port),
                config: config.clone(),
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                state,
                shutdown,
            }),
            task: Mutex::new(None),
        }
    }

    /// Queue one command line. Never blocks.
    ///
    /// Fails only when `command` is not a valid identifier.
    pub fn enqueue(&self, command: &str, value: impl fmt::Display) -> Result<(), FrameError> {
        let line = encode_frame(command, &value.to_string())?;
        {
            let mut queue = self.shared.queue.lock();
            self.shared.prune_expired(&mut queue);
            if queue.len() >= self.shared.config.max_queue_len {
                if let Some(oldest) = queue.pop_front() {
                    warn!("Outbound queue full, dropping {}", oldest.line.trim_end());
                }
            }
            trace!("Queued {}", line.trim_end());
            queue.push_back(Pending {
                line,
                enqueued_at: Instant::now(),
            });
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Start the send task. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        self.shared.shutdown.send_replace(false);
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
        info!("Outbound link started ({})", self.shared.addr);
    }

    /// Flush what can be flushed within the flush timeout, then close
    ///
    /// Lines still queued after that are dropped. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(mut handle) = self.task.lock().take() else {
            return;
        };
        self.shared.shutdown.send_replace(true);

        let timeout = self.shared.config.flush_timeout();
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!("Outbound flush did not finish within {}ms", timeout.as_millis());
            handle.abort();
            let _ = handle.await;
        }

        let unsent = std::mem::take(&mut *self.shared.queue.lock());
        if !unsent.is_empty() {
            warn!("Outbound link stopped with {} unsent command(s)", unsent.len());
        }
        self.shared.set_state(LinkState::Disconnected);
        info!("Outbound link stopped");
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// State changes, starting from the current state
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Lines waiting to be written, oldest first, without terminators
    pub fn pending(&self) -> Vec<String> {
        self.shared
            .queue
            .lock()
            .iter()
            .map(|p| p.line.trim_end_matches('\n').to_string())
            .collect()
    }
}

impl Drop for OutboundLink {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(LinkState::Connecting);
        match connect(&shared).await {
            Ok(stream) => {
                if attempt > 0 {
                    info!("✅ Outbound link reconnected to {}", shared.addr);
                } else {
                    info!("✅ Outbound link connected to {}", shared.addr);
                }
                attempt = 0;
                shared.set_state(LinkState::Connected);

                let exit = pump(&shared, stream, &mut shutdown).await;
                shared.set_state(LinkState::Disconnected);
                match exit {
                    PumpExit::Shutdown => return,
                    PumpExit::Lost(e) => {
                        warn!("{}", BridgeError::ConnectionLost(e));
                    }
                }
            }
            Err(e) => {
                shared.set_state(LinkState::Disconnected);
                if attempt == 0 {
                    warn!("Outbound link: {}", e);
                } else {
                    debug!("Outbound reconnect #{} failed: {}", attempt, e);
                }
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = shared.config.backoff(attempt);
        debug!("⏳ Outbound reconnect #{} in {}ms", attempt, delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }
    shared.set_state(LinkState::Disconnected);
}

async fn connect(shared: &Shared) -> Result<TcpStream, BridgeError> {
    let connect_failed = |source| BridgeError::ConnectFailed {
        addr: shared.addr.clone(),
        source,
    };
    let stream = tokio::time::timeout(
        shared.config.connect_timeout(),
        TcpStream::connect(&shared.addr),
    )
    .await
    .map_err(|_| {
        connect_failed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ))
    })?
    .map_err(connect_failed)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Write queued lines until the connection drops or shutdown is requested
async fn pump(
    shared: &Shared,
    stream: TcpStream,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 512];

    loop {
        if let Err(e) = write_queued(shared, &mut writer).await {
            return PumpExit::Lost(e);
        }
        if *shutdown.borrow() {
            let _ = writer.shutdown().await;
            return PumpExit::Shutdown;
        }

        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = shutdown.changed() => {}
            read = reader.read(&mut scratch) => match read {
                // The peer does not talk on this connection; EOF means it went away
                Ok(0) => {
                    return PumpExit::Lost(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "remote closed the connection",
                    ))
                }
                Ok(n) => trace!("Ignoring {} bytes on outbound connection", n),
                Err(e) => return PumpExit::Lost(e),
            },
        }
    }
}

/// Drain the queue onto the socket, one whole line per write
///
/// A line whose write fails goes back to the front so the next connection
/// sends it first.
async fn write_queued(shared: &Shared, writer: &mut OwnedWriteHalf) -> std::io::Result<()> {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            shared.prune_expired(&mut queue);
            queue.pop_front()
        };
        let Some(pending) = next else {
            return Ok(());
        };

        if let Err(e) = writer.write_all(pending.line.as_bytes()).await {
            shared.queue.lock().push_front(pending);
            return Err(e);
        }
        debug!("TX {}", pending.line.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> LinkConfig {
        LinkConfig {
            outbound_port: port,
            inbound_port: port.wrapping_add(1),
            reconnect_min_ms: 20,
            reconnect_max_ms: 100,
            connect_timeout_ms: 500,
            flush_timeout_ms: 300,
            ..LinkConfig::default()
        }
    }

    async fn wait_for(link: &OutboundLink, state: LinkState) {
        let mut rx = link.watch();
        tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == state))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(3), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_enqueue_writes_whole_lines_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let link = OutboundLink::new(&test_config(listener.local_addr().unwrap().port()));
        link.start();

        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        wait_for(&link, LinkState::Connected).await;

        link.enqueue("Exposure", 64).unwrap();
        link.enqueue("Contrast", -12.5).unwrap();
        assert_eq!(read_line(&mut reader).await, "Exposure 64\n");
        assert_eq!(read_line(&mut reader).await, "Contrast -12.5\n");

        link.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_never_interleaves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let link = Arc::new(OutboundLink::new(&test_config(listener.local_addr().unwrap().port())));
        link.start();
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let link = link.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        link.enqueue(&format!("Cmd{}", t), i).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let mut last = [-1i32; 4];
        for _ in 0..100 {
            let line = read_line(&mut reader).await;
            let (cmd, value) = line.trim_end().split_once(' ').unwrap();
            let t: usize = cmd.trim_start_matches("Cmd").parse().unwrap();
            let value: i32 = value.parse().unwrap();
            assert_eq!(value, last[t] + 1);
            last[t] = value;
        }
        link.stop().await;
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(listener.local_addr().unwrap().port());
        config.reconnect_min_ms = 200;
        config.reconnect_max_ms = 200;
        let link = OutboundLink::new(&config);
        link.start();

        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        wait_for(&link, LinkState::Connected).await;
        link.enqueue("Exposure", 1).unwrap();
        assert_eq!(read_line(&mut reader).await, "Exposure 1\n");

        // Remote goes away mid-session
        drop(reader);
        wait_for(&link, LinkState::Disconnected).await;

        link.enqueue("Contrast", 2).unwrap();
        link.enqueue("Shadows", 3).unwrap();
        assert_eq!(link.pending(), vec!["Contrast 2", "Shadows 3"]);

        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        assert_eq!(read_line(&mut reader).await, "Contrast 2\n");
        assert_eq!(read_line(&mut reader).await, "Shadows 3\n");
        assert_eq!(link.state(), LinkState::Connected);

        link.stop().await;
    }

    #[tokio::test]
    async fn test_queue_is_bounded_while_disconnected() {
        // Nothing listens on this port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = test_config(port);
        config.max_queue_len = 3;
        config.max_queue_age_ms = 50;
        let link = OutboundLink::new(&config);

        for i in 0..5 {
            link.enqueue("Exposure", i).unwrap();
        }
        assert_eq!(link.pending(), vec!["Exposure 2", "Exposure 3", "Exposure 4"]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        link.enqueue("Contrast", 1).unwrap();
        assert_eq!(link.pending(), vec!["Contrast 1"]);
    }

    #[tokio::test]
    async fn test_invalid_command_is_rejected() {
        let link = OutboundLink::new(&test_config(1));
        assert!(link.enqueue("not valid", 1).is_err());
        assert!(link.pending().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_bounded() {
        // Nothing listens: the task sits in its reconnect loop
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let link = OutboundLink::new(&test_config(port));
        link.stop().await;
        link.start();
        link.start();
        link.enqueue("Exposure", 1).unwrap();

        let started = Instant::now();
        link.stop().await;
        link.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.pending().is_empty());
    }
}
