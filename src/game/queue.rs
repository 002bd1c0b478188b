//! Per-actor bounded action queues

use std::collections::{BTreeMap, VecDeque};

use super::state::{ActorId, AgentAction};

/// Admission failures for a queue push
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Unknown actor: {0}")]
    UnknownActor(ActorId),

    #[error("Queue full for {actor_id} (max depth {max_depth})")]
    Full { actor_id: ActorId, max_depth: usize },
}

/// One FIFO per actor, fixed at creation
#[derive(Debug, Clone)]
pub struct ActionQueues {
    queues: BTreeMap<ActorId, VecDeque<AgentAction>>,
    max_depth: usize,
}

impl ActionQueues {
    pub fn new<I>(actor_ids: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = ActorId>,
    {
        Self {
            queues: actor_ids.into_iter().map(|id| (id, VecDeque::new())).collect(),
            max_depth,
        }
    }

    /// Enqueue `action` for `actor_id`, stamping the owner onto it.
    /// Returns the depth after the push.
    pub fn push(&mut self, actor_id: &str, mut action: AgentAction) -> Result<usize, QueueError> {
        let queue = self
            .queues
            .get_mut(actor_id)
            .ok_or_else(|| QueueError::UnknownActor(actor_id.to_string()))?;

        if queue.len() >= self.max_depth {
            return Err(QueueError::Full {
                actor_id: actor_id.to_string(),
                max_depth: self.max_depth,
            });
        }

        action.actor_id = actor_id.to_string();
        queue.push_back(action);
        Ok(queue.len())
    }

    /// Remove the oldest entry, `None` when empty or unknown
    pub fn pop(&mut self, actor_id: &str) -> Option<AgentAction> {
        self.queues.get_mut(actor_id).and_then(VecDeque::pop_front)
    }

    pub fn depth(&self, actor_id: &str) -> usize {
        self.queues.get(actor_id).map_or(0, VecDeque::len)
    }

    pub fn actor_ids(&self) -> impl Iterator<Item = &ActorId> {
        self.queues.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::ActionKind;
    use tokio_test::{assert_err, assert_ok};

    fn action(kind: ActionKind) -> AgentAction {
        AgentAction {
            actor_id: "spoofed".to_string(),
            tick: 0,
            kind,
            direction: None,
            target: None,
        }
    }

    #[test]
    fn test_capacity_enforced() {
        let mut queues = ActionQueues::new(vec!["a".to_string(), "b".to_string()], 2);
        assert_eq!(assert_ok!(queues.push("a", action(ActionKind::Guard))), 1);
        assert_eq!(assert_ok!(queues.push("a", action(ActionKind::Melee))), 2);

        let err = assert_err!(queues.push("a", action(ActionKind::Ranged)));
        assert_eq!(
            err,
            QueueError::Full {
                actor_id: "a".into(),
                max_depth: 2
            }
        );
        assert_eq!(queues.depth("a"), 2);
        assert_eq!(queues.depth("b"), 0);
    }

    #[test]
    fn test_unknown_actor_is_distinct() {
        let mut queues = ActionQueues::new(vec!["a".to_string()], 0);
        let err = assert_err!(queues.push("z", action(ActionKind::Noop)));
        assert_eq!(err, QueueError::UnknownActor("z".into()));
    }

    #[test]
    fn test_fifo_and_owner_stamp() {
        let mut queues = ActionQueues::new(vec!["a".to_string()], 4);
        queues.push("a", action(ActionKind::Guard)).unwrap();
        queues.push("a", action(ActionKind::Melee)).unwrap();

        let first = queues.pop("a").unwrap();
        assert_eq!(first.kind, ActionKind::Guard);
        assert_eq!(first.actor_id, "a");
        assert_eq!(queues.pop("a").unwrap().kind, ActionKind::Melee);
        assert!(queues.pop("a").is_none());
        assert!(queues.pop("nobody").is_none());
    }
}
