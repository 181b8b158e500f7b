use serde::{Deserialize, Serialize};

/// Mutation strategies the agent can hand to the fuzzer.
///
/// The discriminant is the action id used by the policy network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStrategy {
    BitFlip = 0,
    ByteFlip = 1,
    Arithmetic = 2,
    Havoc = 3,
    Splice = 4,
}

impl MutationStrategy {
    /// Every strategy, ordered by action id.
    pub const ALL: [MutationStrategy; 5] = [
        MutationStrategy::BitFlip,
        MutationStrategy::ByteFlip,
        MutationStrategy::Arithmetic,
        MutationStrategy::Havoc,
        MutationStrategy::Splice,
    ];

    /// Size of the action space.
    pub const COUNT: usize = Self::ALL.len();

    pub fn from_action(action: usize) -> Option<Self> {
        Self::ALL.get(action).copied()
    }

    pub fn action_id(self) -> usize {
        self as usize
    }

    /// Name understood by the custom mutator.
    pub fn name(self) -> &'static str {
        match self {
            MutationStrategy::BitFlip => "bitflip",
            MutationStrategy::ByteFlip => "byteflip",
            MutationStrategy::Arithmetic => "arithmetic",
            MutationStrategy::Havoc => "havoc",
            MutationStrategy::Splice => "splice",
        }
    }
}

impl std::fmt::Display for MutationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
