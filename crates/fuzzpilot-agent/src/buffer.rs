use serde::{Deserialize, Serialize};

use crate::encoder::StateVector;

/// One control-loop step as seen by the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StateVector,
    pub action: usize,
    pub reward: f64,
    /// Log-probability of `action` under the policy at selection time.
    pub log_prob: f64,
    /// Critic estimate at selection time.
    pub value: f64,
    /// Episode boundary; returns do not accumulate across it.
    pub done: bool,
}

/// Ordered transitions collected since the last update.
///
/// Owned by the agent; `&mut` access is the only way to append or drain,
/// so an update can never observe a half-drained buffer.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryBuffer {
    transitions: Vec<Transition>,
}

impl TrajectoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Take every stored transition, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    /// Put drained transitions back in front of anything appended since.
    pub fn restore(&mut self, mut drained: Vec<Transition>) {
        drained.append(&mut self.transitions);
        self.transitions = drained;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::STATE_DIM;

    fn transition(reward: f64) -> Transition {
        Transition {
            state: StateVector([0.0; STATE_DIM]),
            action: 0,
            reward,
            log_prob: -1.0,
            value: 0.0,
            done: false,
        }
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut buffer = TrajectoryBuffer::new();
        for r in [1.0, 2.0, 3.0] {
            buffer.append(transition(r));
        }
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain();
        let rewards: Vec<f64> = drained.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_restore_puts_drained_first() {
        let mut buffer = TrajectoryBuffer::new();
        buffer.append(transition(1.0));
        let drained = buffer.drain();
        buffer.append(transition(2.0));
        buffer.restore(drained);

        let rewards: Vec<f64> = buffer.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0]);
    }
}
