//! Expected outbound car counts of every signal phase of the corridor.

use strum::{Display, EnumString, VariantArray};

use crate::role::AgentRole;

/// Direction from which traffic enters an intersection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, VariantArray)]
#[repr(usize)]
pub enum Approach {
    N,
    S,
    E,
    W,
}

impl Approach {
    pub fn ix(self) -> usize {
        self as usize
    }
}

/// Car counts in N, S, E, W order
pub type Flow = [u32; 4];

const WC_FLOWS: [Flow; 8] = [
    [0, 0, 4, 4],
    [0, 0, 4, 0],
    [1, 0, 4, 0],
    [1, 0, 0, 0],
    [4, 4, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 0, 4],
    [0, 0, 0, 4],
];

const CC_FLOWS: [Flow; 4] = [[0, 0, 3, 2], [0, 0, 0, 1], [2, 0, 1, 1], [0, 0, 1, 0]];

const EC_FLOWS: [Flow; 4] = [[0, 0, 4, 4], [0, 0, 0, 0], [4, 4, 0, 0], [0, 0, 0, 0]];

/// Flow of every phase of `role`'s signal program, indexed by phase
pub fn flows(role: AgentRole) -> &'static [Flow] {
    match role {
        AgentRole::WC => &WC_FLOWS,
        AgentRole::CC => &CC_FLOWS,
        AgentRole::EC => &EC_FLOWS,
    }
}

/// `None` for a phase outside the signal program
pub fn flow(role: AgentRole, phase: usize) -> Option<Flow> {
    flows(role).get(phase).copied()
}

pub fn phase_count(role: AgentRole) -> usize {
    flows(role).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(flow(AgentRole::CC, 2), Some([2, 0, 1, 1]));
        assert_eq!(flow(AgentRole::WC, 7), Some([0, 0, 0, 4]));
        assert_eq!(flow(AgentRole::EC, 4), None);
    }
}
