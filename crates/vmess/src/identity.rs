use rand::Rng;
use uuid::Uuid;

use crate::id::{alter_ids, ID};

/// A registered principal: a primary ID and the alternates derived from
/// it. Any of them authenticates as this identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    label: Option<String>,
    level: u32,
    primary: ID,
    alternates: Vec<ID>,
}

impl Identity {
    pub fn new(uuid: Uuid, alter_id_count: u16) -> Self {
        let primary = ID::new(uuid);
        let alternates = alter_ids(&primary, alter_id_count);
        Self {
            label: None,
            level: 0,
            primary,
            alternates,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Owner of the header key.
    pub fn primary(&self) -> &ID {
        &self.primary
    }

    pub fn alternates(&self) -> &[ID] {
        &self.alternates
    }

    /// Primary first, then the alternates in derivation order.
    pub fn ids(&self) -> impl Iterator<Item = &ID> {
        std::iter::once(&self.primary).chain(self.alternates.iter())
    }

    /// A uniformly chosen ID to authenticate a new connection with.
    pub fn any_id(&self) -> &ID {
        match rand::thread_rng().gen_range(0..=self.alternates.len()) {
            0 => &self.primary,
            i => &self.alternates[i - 1],
        }
    }
}
