use crate::role::{AgentRole, RoleMap};

/// Running penalty of every intersection within one scoring round. Starts at
/// zero and only ever decreases.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PenaltyTable(RoleMap<f64>);

impl PenaltyTable {
    pub fn debit(&mut self, role: AgentRole, amount: f64) {
        self.0[role] -= amount;
    }

    pub fn get(&self, role: AgentRole) -> f64 {
        self.0[role]
    }

    /// Final scores. A non-finite penalty has no defined score.
    pub fn scores(&self) -> RoleMap<Option<f64>> {
        RoleMap::from_fn(|role| Some(self.0[role]).filter(|x| x.is_finite()))
    }
}
