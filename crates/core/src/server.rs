//! Relay server: control listener, session registry, frame fan-out.
//!
//! The server owns no media source. Frames enter through sessions in the
//! Recording state, land on a shared ingest channel, and a dispatcher
//! worker routes each one to the private channel of every session
//! currently Playing. Each session reorders and re-paces its own copy,
//! so one slow viewer never stalls the others.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use parking_lot::{Mutex, RwLock};

use crate::config::ServerConfig;
use crate::error::{Result, StreamError};
use crate::media::{FrameCompressor, PassthroughCompressor};
use crate::runtime::TaskHandle;
use crate::session::{ServerSession, SessionContext, SessionId, SessionState};
use crate::wire::rtp::RtpPacket;

/// Capacity of the shared ingest channel recorded frames arrive on.
const FAN_OUT_CAPACITY: usize = 64;

/// Registry of live sessions and their frame channels.
///
/// The dispatcher walks it on every ingested frame, so reads vastly
/// outnumber writes.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

struct SessionEntry {
    state: Arc<RwLock<SessionState>>,
    frames: Sender<RtpPacket>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        id: SessionId,
        state: Arc<RwLock<SessionState>>,
        frames: Sender<RtpPacket>,
    ) {
        self.entries.write().insert(id, SessionEntry { state, frames });
        let total = self.entries.read().len();
        tracing::debug!(session_id = %id, total_sessions = total, "session registered");
    }

    fn remove(&self, id: SessionId) {
        if self.entries.write().remove(&id).is_some() {
            let total = self.entries.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
    }

    /// Routes one ingested frame to every playing session. A session
    /// whose channel is full misses the frame rather than stalling the
    /// rest.
    fn dispatch(&self, packet: &RtpPacket) {
        for (id, entry) in self.entries.read().iter() {
            if *entry.state.read() != SessionState::Playing {
                continue;
            }
            if entry.frames.try_send(packet.clone()).is_err() {
                tracing::debug!(session_id = %id, "session lagging, frame dropped");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ids of the sessions currently playing.
    pub fn playing(&self) -> Vec<SessionId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| *entry.state.read() == SessionState::Playing)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Relay server: accepts control connections and hosts one
/// [`ServerSession`] per connection.
pub struct StreamServer {
    config: ServerConfig,
    registry: SessionRegistry,
    compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    dispatcher: Option<TaskHandle>,
}

impl StreamServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_compressor(config, Box::new(PassthroughCompressor))
    }

    /// Server whose sessions re-encode outgoing frames through
    /// `compressor` when congestion calls for it.
    pub fn with_compressor(config: ServerConfig, compressor: Box<dyn FrameCompressor>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            compressor: Arc::new(Mutex::new(compressor)),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            dispatcher: None,
        }
    }

    /// Binds the control listener and starts accepting sessions.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        self.running.store(true, Ordering::SeqCst);

        let (ingest_tx, ingest_rx) = bounded::<RtpPacket>(FAN_OUT_CAPACITY);
        let registry = self.registry.clone();
        self.dispatcher = Some(TaskHandle::spawn_consumer(
            "dispatcher",
            ingest_rx,
            move |packet| registry.dispatch(&packet),
        ));

        let context = SessionContext {
            forward: ingest_tx,
            compressor: self.compressor.clone(),
            config: self.config.stream.clone(),
            control_port: local_addr.port(),
        };
        let registry = self.registry.clone();
        let running = self.running.clone();
        let capacity = self.config.session_channel_capacity;

        tracing::info!(addr = %local_addr, "control listener up");

        thread::spawn(move || {
            accept_loop(listener, context, registry, capacity, running);
        });

        Ok(())
    }

    /// Stops accepting connections and the fan-out dispatcher.
    ///
    /// Sessions already live keep serving until their peers disconnect.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the control listener is bound to. `None` before `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Non-blocking accept loop.
///
/// Checks `running` between accepts with a 50 ms poll so
/// [`StreamServer::stop`] takes effect promptly.
fn accept_loop(
    listener: TcpListener,
    context: SessionContext,
    registry: SessionRegistry,
    channel_capacity: usize,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let id = SessionId::generate();
                let state = Arc::new(RwLock::new(SessionState::Init));
                let (frames_tx, frames_rx) = bounded::<RtpPacket>(channel_capacity);
                let mut session =
                    match ServerSession::new(stream, id, state.clone(), frames_rx, &context) {
                        Ok(session) => session,
                        Err(error) => {
                            tracing::warn!(%peer, %error, "failed to open session");
                            continue;
                        }
                    };
                registry.register(id, state, frames_tx);
                let r = registry.clone();
                thread::spawn(move || {
                    session.run();
                    r.remove(id);
                });
            }
            Err(ref error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(error) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(%error, "accept failed");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::rtp::RtpHeader;

    #[test]
    fn dispatch_reaches_only_playing_sessions() {
        let registry = SessionRegistry::new();
        let playing = Arc::new(RwLock::new(SessionState::Playing));
        let ready = Arc::new(RwLock::new(SessionState::Ready));
        let (playing_tx, playing_rx) = bounded(4);
        let (ready_tx, ready_rx) = bounded(4);
        registry.register(SessionId::generate(), playing, playing_tx);
        registry.register(SessionId::generate(), ready, ready_tx);

        let packet = RtpPacket::new(RtpHeader::new(26, 1, 33), vec![1, 2, 3]);
        registry.dispatch(&packet);

        assert_eq!(playing_rx.len(), 1);
        assert!(ready_rx.is_empty());
        assert_eq!(registry.playing().len(), 1);
    }

    #[test]
    fn lagging_session_misses_frames_without_blocking() {
        let registry = SessionRegistry::new();
        let state = Arc::new(RwLock::new(SessionState::Playing));
        let (tx, rx) = bounded(1);
        registry.register(SessionId::generate(), state, tx);

        let packet = RtpPacket::new(RtpHeader::new(26, 1, 33), vec![0]);
        registry.dispatch(&packet);
        registry.dispatch(&packet);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut server = StreamServer::new(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        });
        server.start().unwrap();
        assert!(matches!(server.start(), Err(StreamError::AlreadyRunning)));
        server.stop();
    }
}
