use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantArray};

/// Signalized intersection along the corridor, each controlled by its own
/// independently evolved policy. The simulator identifies the intersection's
/// traffic light by the same name.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    VariantArray,
)]
#[repr(usize)]
pub enum AgentRole {
    WC,
    CC,
    EC,
}

impl AgentRole {
    pub const COUNT: usize = Self::VARIANTS.len();

    pub fn all() -> impl Iterator<Item = AgentRole> {
        Self::VARIANTS.iter().copied()
    }

    fn ix(self) -> usize {
        self as usize
    }
}

/// One value per [`AgentRole`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleMap<T>([T; AgentRole::COUNT]);

impl<T> RoleMap<T> {
    pub fn from_fn(mut f: impl FnMut(AgentRole) -> T) -> Self {
        Self([f(AgentRole::WC), f(AgentRole::CC), f(AgentRole::EC)])
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(AgentRole) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self([f(AgentRole::WC)?, f(AgentRole::CC)?, f(AgentRole::EC)?]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentRole, &T)> {
        AgentRole::all().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (AgentRole, &mut T)> {
        AgentRole::all().zip(self.0.iter_mut())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(AgentRole, T) -> U) -> RoleMap<U> {
        let [wc, cc, ec] = self.0;
        RoleMap([
            f(AgentRole::WC, wc),
            f(AgentRole::CC, cc),
            f(AgentRole::EC, ec),
        ])
    }
}

impl<T> Index<AgentRole> for RoleMap<T> {
    type Output = T;

    fn index(&self, role: AgentRole) -> &Self::Output {
        &self.0[role.ix()]
    }
}

impl<T> IndexMut<AgentRole> for RoleMap<T> {
    fn index_mut(&mut self, role: AgentRole) -> &mut Self::Output {
        &mut self.0[role.ix()]
    }
}
