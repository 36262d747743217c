//! Inbound link - updates from the remote application
//!
//! Reads its own connection, reassembles lines across arbitrary read
//! boundaries and hands each parsed message to the registered handlers.
//! Every new connection starts with an empty line buffer.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{InboundMessage, LineFramer};
use super::LinkState;
use crate::config::LinkConfig;
use crate::error::BridgeError;
use crate::subscription::{Registry, Subscription};

/// What inbound handlers are told
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    Message(InboundMessage),
    Disconnected,
}

/// Handler callback. Runs on a runtime worker and must not block.
pub type LinkHandler = dyn Fn(&LinkEvent) + Send + Sync;

struct Shared {
    config: LinkConfig,
    addr: String,
    handlers: Registry<LinkHandler>,
    state: watch::Sender<LinkState>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn emit(&self, event: &LinkEvent) {
        for handler in self.handlers.snapshot() {
            handler(event);
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Inbound link {} → {}", current, state);
            *current = state;
            true
        });
    }
}

/// Managed connection carrying updates from the remote application
pub struct InboundLink {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InboundLink {
    pub fn new(config: &LinkConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                addr: format!("{}:{}", config.host, config.inbound_port),
                config: config.clone(),
                handlers: Registry::new(),
                state,
                shutdown,
            }),
            task: Mutex::new(None),
        }
    }

    /// Register a handler for every link event
    pub fn subscribe(&self, handler: Arc<LinkHandler>) -> Subscription {
        self.shared.handlers.subscribe(handler)
    }

    /// Start the read task. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        self.shared.shutdown.send_replace(false);
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
        info!("Inbound link started ({})", self.shared.addr);
    }

    /// Close the connection and wait for the read task to end
    ///
    /// No handler runs after this returns. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(mut handle) = self.task.lock().take() else {
            return;
        };
        self.shared.shutdown.send_replace(true);

        let timeout = self.shared.config.flush_timeout();
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.set_state(LinkState::Disconnected);
        info!("Inbound link stopped");
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }
}

impl Drop for InboundLink {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut framer = LineFramer::new(shared.config.max_line_len);
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(LinkState::Connecting);
        let connected = tokio::time::timeout(
            shared.config.connect_timeout(),
            TcpStream::connect(&shared.addr),
        )
        .await;

        match connected {
            Ok(Ok(stream)) => {
                info!("✅ Inbound link connected to {}", shared.addr);
                attempt = 0;
                framer.reset();
                shared.set_state(LinkState::Connected);
                shared.emit(&LinkEvent::Connected);

                let lost = read_loop(&shared, stream, &mut framer, &mut shutdown).await;

                // Bytes of a half-received line belong to the dead connection
                framer.reset();
                shared.set_state(LinkState::Disconnected);
                shared.emit(&LinkEvent::Disconnected);
                match lost {
                    Some(e) => warn!("Inbound link: {}", BridgeError::ConnectionLost(e)),
                    None => return,
                }
            }
            Ok(Err(e)) => {
                shared.set_state(LinkState::Disconnected);
                let err = BridgeError::ConnectFailed {
                    addr: shared.addr.clone(),
                    source: e,
                };
                if attempt == 0 {
                    warn!("Inbound link: {}", err);
                } else {
                    debug!("Inbound reconnect #{} failed: {}", attempt, err);
                }
            }
            Err(_) => {
                shared.set_state(LinkState::Disconnected);
                debug!("Inbound connect to {} timed out", shared.addr);
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = shared.config.backoff(attempt);
        debug!("⏳ Inbound reconnect #{} in {}ms", attempt, delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }
    shared.set_state(LinkState::Disconnected);
}

/// Read until EOF, error (`Some`) or shutdown (`None`)
async fn read_loop(
    shared: &Shared,
    mut stream: TcpStream,
    framer: &mut LineFramer,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<std::io::Error> {
    let mut buf = vec![0u8; 4096];
    loop {
        if *shutdown.borrow() {
            return None;
        }
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    return Some(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "remote closed the connection",
                    ))
                }
                Ok(n) => n,
                Err(e) => return Some(e),
            },
            _ = shutdown.changed() => return None,
        };

        framer.push(&buf[..n]);
        while let Some(line) = framer.next_line() {
            match line.and_then(|l| InboundMessage::parse(&l)) {
                Ok(message) => {
                    debug!("RX {}", message);
                    shared.emit(&LinkEvent::Message(message));
                }
                Err(e) => warn!("Dropping {}", BridgeError::MalformedFrame(e)),
            }
        }
    }
}
