//! Observer fan-out for a single match

use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

struct Observer {
    tx: mpsc::Sender<ServerMsg>,
    /// Buffer slot held for the final message
    final_slot: OwnedPermit<ServerMsg>,
}

/// Outbound channels of every connection watching a match.
///
/// Sends never wait: a full buffer drops that message for that connection
/// only, and closed connections are pruned on the next broadcast. Each
/// connection keeps one slot in reserve, so `finish` always lands.
pub struct ConnectionRegistry {
    match_id: Uuid,
    connections: Vec<Observer>,
}

impl ConnectionRegistry {
    pub fn new(match_id: Uuid) -> Self {
        Self {
            match_id,
            connections: Vec::new(),
        }
    }

    pub fn add(&mut self, tx: mpsc::Sender<ServerMsg>) {
        match tx.clone().try_reserve_owned() {
            Ok(final_slot) => self.connections.push(Observer { tx, final_slot }),
            Err(_) => debug!(match_id = %self.match_id, "Observer has no free slot, not attached"),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn broadcast(&mut self, msg: &ServerMsg) {
        let match_id = self.match_id;
        self.connections.retain(|observer| match observer.tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(match_id = %match_id, "Observer buffer full, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Deliver the last message through the reserved slots, then drop every
    /// sender so observer streams end
    pub fn finish(&mut self, msg: &ServerMsg) {
        for observer in self.connections.drain(..) {
            observer.final_slot.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_and_closed_connections() {
        let mut registry = ConnectionRegistry::new(Uuid::nil());
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let (slow_tx, mut slow_rx) = mpsc::channel(2);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        registry.add(fast_tx);
        registry.add(slow_tx);
        registry.add(closed_tx);
        drop(closed_rx);

        registry.broadcast(&ServerMsg::Pong { tick: 1 });
        registry.broadcast(&ServerMsg::Pong { tick: 2 });

        assert_eq!(registry.len(), 2);
        assert!(matches!(fast_rx.recv().await, Some(ServerMsg::Pong { tick: 1 })));
        assert!(matches!(fast_rx.recv().await, Some(ServerMsg::Pong { tick: 2 })));
        assert!(matches!(slow_rx.recv().await, Some(ServerMsg::Pong { tick: 1 })));
        assert!(slow_rx.try_recv().is_err());

        registry.finish(&ServerMsg::Pong { tick: 9 });
        assert_eq!(registry.len(), 0);
        assert!(matches!(fast_rx.recv().await, Some(ServerMsg::Pong { tick: 9 })));
        assert!(fast_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_backlogged_observer_still_gets_final_message() {
        let mut registry = ConnectionRegistry::new(Uuid::nil());
        let (tx, mut rx) = mpsc::channel(2);
        registry.add(tx);

        for tick in 1..=5 {
            registry.broadcast(&ServerMsg::Pong { tick });
        }
        registry.finish(&ServerMsg::Pong { tick: 99 });

        assert!(matches!(rx.recv().await, Some(ServerMsg::Pong { tick: 1 })));
        assert!(matches!(rx.recv().await, Some(ServerMsg::Pong { tick: 99 })));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_observer_without_room_is_not_attached() {
        let mut registry = ConnectionRegistry::new(Uuid::nil());
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(ServerMsg::Pong { tick: 0 }).unwrap();
        registry.add(tx);
        assert_eq!(registry.len(), 0);
    }
}
