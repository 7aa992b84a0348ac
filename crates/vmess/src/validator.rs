//! Authentication cache for request lookup hashes.
//!
//! Every sub-identity owns a pair of cursors over unix seconds. The
//! generate cursor inserts `auth_hash(second)` and the evict cursor, a fixed
//! distance behind it, deletes the hash it passes. Advancing both in
//! lockstep keeps `[now - CACHE_WINDOW_SECS, now + CACHE_WINDOW_SECS]`
//! resident, and a sweep only pays for the seconds elapsed since the
//! previous one.
//!
//! Removing an identity drops it from the registry at once but lets its
//! hashes age out behind the evict cursor, so it keeps authenticating for
//! up to one full window.

use std::{sync::Arc, time::Duration};

use fnv::FnvHashMap;
use log::{debug, trace};
use parking_lot::RwLock;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    error::{Error, Result},
    id::ID,
    identity::Identity,
};

/// Half width of the authentication window.
pub const CACHE_WINDOW_SECS: i64 = 120;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// seconds resident per sub-identity after a sweep
const RESIDENT_SPAN: i64 = 2 * CACHE_WINDOW_SECS + 1;

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct AuthMatch {
    pub identity: Arc<Identity>,
    pub timestamp: i64,
}

struct HashEntry {
    owner: u64,
    identity: Arc<Identity>,
    timestamp: i64,
}

type HashIndex = FnvHashMap<[u8; 16], HashEntry>;

struct Cursor {
    owner: u64,
    id: ID,
    identity: Arc<Identity>,
    next_generate: i64,
    next_evict: i64,
}

impl Cursor {
    fn new(owner: u64, id: ID, identity: Arc<Identity>, now: i64) -> Self {
        let next_generate = now - CACHE_WINDOW_SECS;
        Self {
            owner,
            id,
            identity,
            next_generate,
            next_evict: next_generate - RESIDENT_SPAN,
        }
    }

    /// Generates every second up to and including `until`, evicting in
    /// lockstep. Returns the number of steps taken.
    fn advance(&mut self, index: &mut HashIndex, until: i64) -> usize {
        if until - self.next_generate >= RESIDENT_SPAN {
            // the clock jumped past the whole resident span
            self.evict_before(index, self.next_generate);
            self.next_generate = until - RESIDENT_SPAN + 1;
            self.next_evict = self.next_generate - RESIDENT_SPAN;
        }

        let mut steps = 0;
        while self.next_generate <= until {
            self.insert(index, self.next_generate);
            self.evict(index, self.next_evict);
            self.next_generate += 1;
            self.next_evict += 1;
            steps += 1;
        }
        steps
    }

    /// Evicts without generating. Returns true once nothing of this cursor
    /// is left in the index.
    fn retire(&mut self, index: &mut HashIndex, until: i64) -> bool {
        let end = (until - RESIDENT_SPAN + 1).min(self.next_generate);
        self.evict_before(index, end);
        self.next_evict >= self.next_generate
    }

    fn evict_before(&mut self, index: &mut HashIndex, end: i64) {
        while self.next_evict < end {
            self.evict(index, self.next_evict);
            self.next_evict += 1;
        }
    }

    fn insert(&self, index: &mut HashIndex, second: i64) {
        index.insert(
            self.id.auth_hash(second),
            HashEntry {
                owner: self.owner,
                identity: Arc::clone(&self.identity),
                timestamp: second,
            },
        );
    }

    fn evict(&self, index: &mut HashIndex, second: i64) {
        let hash = self.id.auth_hash(second);
        if index.get(&hash).map_or(false, |entry| entry.owner == self.owner) {
            index.remove(&hash);
        }
    }
}

struct Registered {
    serial: u64,
    identity: Arc<Identity>,
}

#[derive(Default)]
struct State {
    next_serial: u64,
    registry: Vec<Registered>,
    index: HashIndex,
    active: Vec<Cursor>,
    retiring: Vec<Cursor>,
}

impl State {
    fn sweep(&mut self, now: i64) {
        let until = now + CACHE_WINDOW_SECS;
        let State {
            index,
            active,
            retiring,
            ..
        } = self;

        let steps: usize = active
            .iter_mut()
            .map(|cursor| cursor.advance(index, until))
            .sum();
        retiring.retain_mut(|cursor| !cursor.retire(index, until));

        trace!(
            "swept to {}: {} steps, {} hashes, {} retiring cursors",
            until,
            steps,
            index.len(),
            retiring.len()
        );
    }
}

struct Inner {
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
}

impl Inner {
    fn sweep(&self) {
        let now = self.clock.now();
        self.state.write().sweep(now);
    }
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Maps lookup hashes to `(identity, timestamp)`.
///
/// Lookups take a shared lock; registration, removal and sweeps take the
/// exclusive one. A cache built with [`AuthCache::spawn`] owns its
/// background sweep task and stops it when dropped.
pub struct AuthCache {
    inner: Arc<Inner>,
    sweeper: Option<Sweeper>,
}

impl AuthCache {
    /// A cache that only sweeps when [`AuthCache::sweep`] is called.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                state: RwLock::new(State::default()),
            }),
            sweeper: None,
        }
    }

    /// A cache swept every `period` by a task on the current tokio runtime.
    pub fn spawn(clock: Arc<dyn Clock>, period: Duration) -> Self {
        let mut cache = Self::new(clock);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&cache.inner),
            period,
            token.clone(),
        ));
        cache.sweeper = Some(Sweeper { token, handle });
        cache
    }

    pub fn add(&self, identity: Identity) -> Result<()> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.write();

        if let Some(label) = identity.label() {
            if state
                .registry
                .iter()
                .any(|r| r.identity.label() == Some(label))
            {
                return Err(Error::DuplicateLabel(label.to_string()));
            }
        }

        let serial = state.next_serial;
        state.next_serial += 1;
        let identity = Arc::new(identity);

        let State {
            registry,
            index,
            active,
            ..
        } = &mut *state;
        for id in identity.ids() {
            let mut cursor = Cursor::new(serial, *id, Arc::clone(&identity), now);
            cursor.advance(index, now + CACHE_WINDOW_SECS);
            active.push(cursor);
        }
        debug!(
            "registered identity {} with {} alternate ids",
            identity.label().unwrap_or("<unlabeled>"),
            identity.alternates().len()
        );
        registry.push(Registered { serial, identity });

        Ok(())
    }

    /// Unregisters the identity labelled `label`. Its hashes already in the
    /// index expire with the sweep, not here.
    pub fn remove(&self, label: &str) -> bool {
        let mut state = self.inner.state.write();
        let Some(pos) = state
            .registry
            .iter()
            .position(|r| r.identity.label() == Some(label))
        else {
            return false;
        };
        let serial = state.registry.swap_remove(pos).serial;

        let State {
            active, retiring, ..
        } = &mut *state;
        let mut i = 0;
        while i < active.len() {
            if active[i].owner == serial {
                retiring.push(active.swap_remove(i));
            } else {
                i += 1;
            }
        }

        debug!("removed identity {}", label);
        true
    }

    /// `None` says nothing about why the lookup missed.
    pub fn get(&self, hash: &[u8; 16]) -> Option<AuthMatch> {
        self.inner
            .state
            .read()
            .index
            .get(hash)
            .map(|entry| AuthMatch {
                identity: Arc::clone(&entry.identity),
                timestamp: entry.timestamp,
            })
    }

    /// Advances every window to the clock's current time.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.inner.state.read().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background sweep and waits for it to finish.
    pub async fn shutdown(&mut self) {
        if let Some(Sweeper { token, handle }) = self.sweeper.take() {
            token.cancel();
            if let Err(e) = handle.await {
                debug!("authentication cache sweeper ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AuthCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.token.cancel();
        }
    }
}

async fn run_sweeper(inner: Arc<Inner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => inner.sweep(),
        }
    }
    debug!("authentication cache sweeper stopped");
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;

    const T0: i64 = 1000;

    fn setup(alter_ids: u16) -> (Arc<ManualClock>, AuthCache, Identity) {
        let clock = Arc::new(ManualClock::new(T0));
        let cache = AuthCache::new(clock.clone());
        let identity = Identity::new(Uuid::new_v4(), alter_ids).with_label("alice");
        cache.add(identity.clone()).unwrap();
        (clock, cache, identity)
    }

    fn lookup(cache: &AuthCache, id: &ID, second: i64) -> Option<i64> {
        cache.get(&id.auth_hash(second)).map(|m| m.timestamp)
    }

    #[test]
    fn window_is_resident_right_after_add() {
        let (_, cache, identity) = setup(0);
        let id = identity.primary();
        for t in T0 - CACHE_WINDOW_SECS..=T0 + CACHE_WINDOW_SECS {
            assert_eq!(lookup(&cache, id, t), Some(t), "second {t}");
        }
        assert_eq!(lookup(&cache, id, T0 - CACHE_WINDOW_SECS - 1), None);
        assert_eq!(lookup(&cache, id, T0 + CACHE_WINDOW_SECS + 1), None);
        assert_eq!(lookup(&cache, id, T0 - 131), None);
        assert_eq!(lookup(&cache, id, T0 + 131), None);
    }

    #[test]
    fn sweep_slides_the_window() {
        let (clock, cache, identity) = setup(0);
        let id = identity.primary();
        clock.advance(10);
        cache.sweep();

        assert_eq!(lookup(&cache, id, T0 + 130), Some(T0 + 130));
        assert_eq!(lookup(&cache, id, T0 - 110), Some(T0 - 110));
        assert_eq!(lookup(&cache, id, T0 - 111), None);
        assert_eq!(cache.inner.state.read().index.len(), RESIDENT_SPAN as usize);
    }

    #[test]
    fn alternates_authenticate_as_the_same_identity() {
        let (_, cache, identity) = setup(3);
        for id in identity.ids() {
            let found = cache.get(&id.auth_hash(T0)).unwrap();
            assert_eq!(found.identity.label(), Some("alice"));
            assert_eq!(found.timestamp, T0);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let (_, cache, _) = setup(0);
        let other = Identity::new(Uuid::new_v4(), 0).with_label("alice");
        assert!(matches!(cache.add(other), Err(Error::DuplicateLabel(l)) if l == "alice"));

        // unlabeled identities never conflict
        cache.add(Identity::new(Uuid::new_v4(), 0)).unwrap();
        cache.add(Identity::new(Uuid::new_v4(), 0)).unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn removed_identity_expires_lazily() {
        let (clock, cache, identity) = setup(1);
        let id = identity.alternates()[0];

        assert!(cache.remove("alice"));
        assert!(!cache.remove("alice"));
        assert!(cache.is_empty());

        clock.set(T0 + 10);
        cache.sweep();
        assert_eq!(lookup(&cache, &id, T0), Some(T0));

        while clock.now() < T0 + 300 {
            clock.advance(10);
            cache.sweep();
        }
        assert_eq!(lookup(&cache, &id, T0), None);
        assert_eq!(lookup(&cache, &id, T0 + CACHE_WINDOW_SECS), None);

        let state = cache.inner.state.read();
        assert!(state.retiring.is_empty());
        assert!(state.index.is_empty());
    }

    #[test]
    fn readding_a_secret_survives_old_evictions() {
        let (clock, cache, identity) = setup(0);
        let uuid = identity.primary().uuid();
        assert!(cache.remove("alice"));
        cache.add(Identity::new(uuid, 0).with_label("bob")).unwrap();

        clock.advance(200);
        cache.sweep();
        let found = cache.get(&identity.primary().auth_hash(T0 + 150)).unwrap();
        assert_eq!(found.identity.label(), Some("bob"));
        assert!(cache.get(&identity.primary().auth_hash(T0 + 100)).is_some());
    }

    #[test]
    fn clock_jump_reseeds_instead_of_walking() {
        let (clock, cache, identity) = setup(0);
        let id = identity.primary();
        clock.set(T0 + 86_400);
        cache.sweep();

        assert_eq!(lookup(&cache, id, T0), None);
        assert_eq!(lookup(&cache, id, T0 + 86_400), Some(T0 + 86_400));
        assert_eq!(
            lookup(&cache, id, T0 + 86_400 - CACHE_WINDOW_SECS),
            Some(T0 + 86_400 - CACHE_WINDOW_SECS)
        );
        assert_eq!(cache.inner.state.read().index.len(), RESIDENT_SPAN as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_follows_the_clock_until_shutdown() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = AuthCache::spawn(clock.clone(), SWEEP_INTERVAL);
        let identity = Identity::new(Uuid::new_v4(), 0);
        cache.add(identity.clone()).unwrap();
        let id = identity.primary();

        clock.advance(30);
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(lookup(&cache, id, T0 + 150), Some(T0 + 150));

        cache.shutdown().await;
        clock.advance(30);
        tokio::time::sleep(SWEEP_INTERVAL * 3).await;
        assert_eq!(lookup(&cache, id, T0 + 180), None);
    }
}
