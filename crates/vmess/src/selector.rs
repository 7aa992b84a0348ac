use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use types::Destination;

use crate::{
    clock::Clock,
    error::{Error, Result},
    identity::Identity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Always,
    /// Valid while the clock reads strictly less than this unix second.
    Until(i64),
}

impl Validity {
    fn is_valid(&self, now: i64) -> bool {
        match self {
            Validity::Always => true,
            Validity::Until(deadline) => now < *deadline,
        }
    }
}

/// A remote endpoint and the identities it accepts.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub destination: Destination,
    pub identities: Vec<Arc<Identity>>,
    pub validity: Validity,
}

impl EndpointSpec {
    pub fn new(destination: Destination, identities: Vec<Arc<Identity>>) -> Self {
        Self {
            destination,
            identities,
            validity: Validity::Always,
        }
    }

    pub fn until(mut self, deadline: i64) -> Self {
        self.validity = Validity::Until(deadline);
        self
    }

    fn is_valid(&self, now: i64) -> bool {
        !self.identities.is_empty() && self.validity.is_valid(now)
    }

    // same destination and at least one shared secret
    fn overlaps(&self, other: &EndpointSpec) -> bool {
        self.destination == other.destination
            && self.identities.iter().any(|a| {
                other
                    .identities
                    .iter()
                    .any(|b| a.primary().uuid() == b.primary().uuid())
            })
    }
}

/// What [`EndpointSelector::pick`] hands out.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub destination: Destination,
    pub identity: Arc<Identity>,
}

struct SelectorState {
    endpoints: Vec<EndpointSpec>,
    cursor: usize,
}

impl SelectorState {
    /// Index of the first valid entry at or after `index`, removing the
    /// invalid ones found on the way.
    fn valid_index(&mut self, index: usize, now: i64) -> Option<usize> {
        while index < self.endpoints.len() {
            if self.endpoints[index].is_valid(now) {
                return Some(index);
            }
            let gone = self.endpoints.swap_remove(index);
            debug!("dropped expired endpoint {}", gone.destination);
        }
        None
    }
}

/// Round-robin over endpoints, dropping expired ones as it meets them.
pub struct EndpointSelector {
    clock: Arc<dyn Clock>,
    state: Mutex<SelectorState>,
}

impl EndpointSelector {
    pub fn new(clock: Arc<dyn Clock>, endpoints: Vec<EndpointSpec>) -> Self {
        Self {
            clock,
            state: Mutex::new(SelectorState {
                endpoints,
                cursor: 0,
            }),
        }
    }

    pub fn add(&self, spec: EndpointSpec) {
        self.state.lock().endpoints.push(spec);
    }

    /// Adds `spec` unless a valid entry already reaches the same destination
    /// with one of its secrets. Returns whether it was added.
    pub fn add_if_absent(&self, spec: EndpointSpec) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state
            .endpoints
            .iter()
            .any(|known| known.is_valid(now) && known.overlaps(&spec))
        {
            return false;
        }
        state.endpoints.push(spec);
        true
    }

    pub fn pick(&self) -> Result<Endpoint> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let cursor = state.cursor;
        let index = match state.valid_index(cursor, now) {
            Some(index) => index,
            None => state.valid_index(0, now).ok_or(Error::Empty)?,
        };
        state.cursor = if index + 1 >= state.endpoints.len() {
            0
        } else {
            index + 1
        };

        let spec = &state.endpoints[index];
        let identity = spec
            .identities
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(Error::Empty)?;
        Ok(Endpoint {
            destination: spec.destination.clone(),
            identity,
        })
    }

    /// Number of entries, including expired ones not yet met by `pick`.
    pub fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
