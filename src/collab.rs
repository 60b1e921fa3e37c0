//! Collaboration channel: shares interactions with other canvases.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::Result;
use crate::interaction::InteractionEvent;

pub type EventHandler = Box<dyn Fn(&str, &InteractionEvent) + Send + Sync>;
pub type PeerHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Transport for sharing interactions between canvases.
pub trait CollaborationChannel: Send {
    /// Broadcasts a local interaction.
    fn send(&self, event: &InteractionEvent) -> Result<()>;

    fn on_receive(&mut self, handler: EventHandler);

    fn on_peer_join(&mut self, handler: PeerHandler);

    fn on_peer_leave(&mut self, handler: PeerHandler);

    fn peers(&self) -> Vec<String>;
}

#[derive(Default)]
struct Loopback {
    receive: Vec<EventHandler>,
    join: Vec<PeerHandler>,
    leave: Vec<PeerHandler>,
    peers: Vec<String>,
    sent: Vec<InteractionEvent>,
}

/// In-process channel. Clones share state, so one clone can act as the
/// "remote side" of another.
#[derive(Clone, Default)]
pub struct LoopbackChannel {
    inner: Arc<Mutex<Loopback>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Loopback> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers an event as if `peer` had sent it.
    pub fn inject_remote(&self, peer: &str, event: &InteractionEvent) {
        let inner = self.lock();
        debug!("Loopback delivering event from {}", peer);
        for handler in &inner.receive {
            handler(peer, event);
        }
    }

    pub fn join(&self, peer: &str) {
        let mut inner = self.lock();
        if inner.peers.iter().any(|p| p == peer) {
            return;
        }
        inner.peers.push(peer.to_string());
        info!("Peer {} joined", peer);
        for handler in &inner.join {
            handler(peer);
        }
    }

    pub fn leave(&self, peer: &str) {
        let mut inner = self.lock();
        let before = inner.peers.len();
        inner.peers.retain(|p| p != peer);
        if inner.peers.len() == before {
            return;
        }
        info!("Peer {} left", peer);
        for handler in &inner.leave {
            handler(peer);
        }
    }

    /// Everything broadcast so far.
    pub fn sent(&self) -> Vec<InteractionEvent> {
        self.lock().sent.clone()
    }
}

impl CollaborationChannel for LoopbackChannel {
    fn send(&self, event: &InteractionEvent) -> Result<()> {
        self.lock().sent.push(event.clone());
        Ok(())
    }

    fn on_receive(&mut self, handler: EventHandler) {
        self.lock().receive.push(handler);
    }

    fn on_peer_join(&mut self, handler: PeerHandler) {
        self.lock().join.push(handler);
    }

    fn on_peer_leave(&mut self, handler: PeerHandler) {
        self.lock().leave.push(handler);
    }

    fn peers(&self) -> Vec<String> {
        self.lock().peers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::Origin;
    use crate::notes::NoteRef;

    fn event() -> InteractionEvent {
        InteractionEvent::new(5, 1.0, 2.0, 0.5, NoteRef::Midi(64), Origin::Pointer)
    }

    #[test]
    fn test_receive_handlers_see_injected_events() {
        let mut channel = LoopbackChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.on_receive(Box::new(move |peer, event| {
            sink.lock().unwrap().push((peer.to_string(), event.note.clone()));
        }));

        channel.clone().inject_remote("alice", &event());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("alice".to_string(), NoteRef::Midi(64))]
        );
    }

    #[test]
    fn test_send_is_recorded() {
        let channel = LoopbackChannel::new();
        channel.send(&event()).unwrap();
        assert_eq!(channel.sent(), vec![event()]);
    }

    #[test]
    fn test_peer_join_and_leave() {
        let mut channel = LoopbackChannel::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let joins = log.clone();
        let leaves = log.clone();
        channel.on_peer_join(Box::new(move |p| joins.lock().unwrap().push(format!("+{}", p))));
        channel.on_peer_leave(Box::new(move |p| leaves.lock().unwrap().push(format!("-{}", p))));

        channel.join("bob");
        channel.join("bob");
        assert_eq!(channel.peers(), vec!["bob".to_string()]);
        channel.leave("bob");
        channel.leave("carol");
        assert!(channel.peers().is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["+bob".to_string(), "-bob".to_string()]);
    }
}
