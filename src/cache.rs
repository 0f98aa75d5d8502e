//! Bounded cache of decoded, surface-scaled image buffers.
//!
//! Lookups never decode inline. A miss reserves a [`DecodeJob`] that the
//! caller runs off-thread and later hands back to [`DecodeCache::complete`].
//! While a job is outstanding every further request for the same identity
//! attaches a [`Ticket`] to it instead of starting a second decode.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::DecodeFailure;
use crate::events::DecodedImage;
use crate::scan::ImageIdentity;

pub const DEFAULT_MAX_ENTRIES: usize = 10;
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Identifies one dispatched decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

/// Identifies one request waiting on a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Work the caller must run and report back through [`DecodeCache::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeJob {
    pub id: JobId,
    pub identity: ImageIdentity,
}

#[derive(Debug)]
pub enum Lookup {
    /// Cached; the entry's access generation was refreshed.
    Ready(Arc<DecodedImage>),
    /// A decode for this identity is already running; `Ticket` is attached to it.
    Pending(Ticket),
    /// Nothing cached or running; the caller must run `DecodeJob`.
    Dispatch(Ticket, DecodeJob),
}

/// Result of a finished decode together with every ticket that waited on it.
#[derive(Debug)]
pub struct Completion {
    pub identity: ImageIdentity,
    pub result: Result<Arc<DecodedImage>, DecodeFailure>,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug)]
struct CacheEntry {
    image: Arc<DecodedImage>,
    bytes: u64,
    last_access: u64,
    inserted: u64,
}

#[derive(Debug)]
struct PendingDecode {
    job: JobId,
    tickets: Vec<Ticket>,
}

#[derive(Debug)]
pub struct DecodeCache {
    limits: CacheLimits,
    entries: HashMap<ImageIdentity, CacheEntry>,
    pending: HashMap<ImageIdentity, PendingDecode>,
    total_bytes: u64,
    clock: u64,
    next_job: u64,
    next_ticket: u64,
}

impl DecodeCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            entries: HashMap::new(),
            pending: HashMap::new(),
            total_bytes: 0,
            clock: 0,
            next_job: 0,
            next_ticket: 0,
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn contains(&self, identity: &ImageIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn is_pending(&self, identity: &ImageIdentity) -> bool {
        self.pending.contains_key(identity)
    }

    /// Cached buffer for `identity`, or a ticket for the decode that will produce it.
    pub fn get_or_decode(&mut self, identity: &ImageIdentity) -> Lookup {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.last_access = now;
            trace!(path = %identity.path().display(), "cache hit");
            return Lookup::Ready(Arc::clone(&entry.image));
        }

        let ticket = self.issue_ticket();
        if let Some(pending) = self.pending.get_mut(identity) {
            pending.tickets.push(ticket);
            debug!(path = %identity.path().display(), waiters = pending.tickets.len(), "attached to in-flight decode");
            return Lookup::Pending(ticket);
        }

        let job = JobId(self.next_job);
        self.next_job += 1;
        self.pending.insert(
            identity.clone(),
            PendingDecode {
                job,
                tickets: vec![ticket],
            },
        );
        debug!(path = %identity.path().display(), "cache miss; dispatching decode");
        Lookup::Dispatch(
            ticket,
            DecodeJob {
                id: job,
                identity: identity.clone(),
            },
        )
    }

    /// Record the outcome of `job`.
    ///
    /// Successful buffers are inserted and the eviction pass runs; failures
    /// are never cached. Returns `None` for a job the cache no longer tracks
    /// (it was reserved before a [`clear`](Self::clear)); such results are
    /// discarded.
    pub fn complete(
        &mut self,
        job: JobId,
        identity: ImageIdentity,
        result: Result<DecodedImage, DecodeFailure>,
    ) -> Option<Completion> {
        match self.pending.get(&identity) {
            Some(pending) if pending.job == job => {}
            _ => {
                debug!(path = %identity.path().display(), "discarding result of forgotten decode job");
                return None;
            }
        }
        let tickets = self
            .pending
            .remove(&identity)
            .map(|p| p.tickets)
            .unwrap_or_default();

        let result = result.map(|image| {
            let image = Arc::new(image);
            self.insert(identity.clone(), Arc::clone(&image));
            image
        });
        Some(Completion {
            identity,
            result,
            tickets,
        })
    }

    /// Drop every cached buffer. Outstanding decode jobs stay tracked, so
    /// later requests still attach to them and their results are kept.
    ///
    /// Returns the number of buffers released.
    pub fn release_buffers(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        debug!(released, in_flight = self.pending.len(), "cached buffers released");
        released
    }

    /// Drop every cached buffer and forget outstanding decode jobs, whose
    /// results will be discarded on arrival.
    ///
    /// Returns the number of buffers released.
    pub fn clear(&mut self) -> usize {
        let released = self.release_buffers();
        self.pending.clear();
        debug!("pending decodes forgotten");
        released
    }

    fn insert(&mut self, identity: ImageIdentity, image: Arc<DecodedImage>) {
        let now = self.tick();
        let bytes = image.byte_size();
        let entry = CacheEntry {
            image,
            bytes,
            last_access: now,
            inserted: now,
        };
        if let Some(old) = self.entries.insert(identity, entry) {
            self.total_bytes -= old.bytes;
        }
        self.total_bytes += bytes;
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.limits.max_entries
            || self.total_bytes > self.limits.max_bytes
        {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.inserted))
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.total_bytes -= entry.bytes;
                debug!(
                    path = %victim.path().display(),
                    bytes = entry.bytes,
                    remaining = self.entries.len(),
                    "evicted least recently used buffer"
                );
            }
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn issue_ticket(&mut self) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    fn id(name: &str) -> ImageIdentity {
        ImageIdentity::new(PathBuf::from("/pics").join(name), UNIX_EPOCH, 1)
    }

    fn image(name: &str, bytes: usize) -> DecodedImage {
        DecodedImage {
            path: PathBuf::from("/pics").join(name),
            width: 1,
            height: 1,
            pixels: vec![0; bytes],
        }
    }

    fn load(cache: &mut DecodeCache, name: &str, bytes: usize) {
        match cache.get_or_decode(&id(name)) {
            Lookup::Dispatch(_, job) => {
                cache
                    .complete(job.id, job.identity, Ok(image(name, bytes)))
                    .expect("job tracked");
            }
            other => panic!("expected dispatch for {name}, got {other:?}"),
        }
    }

    #[test]
    fn miss_then_hit() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        load(&mut cache, "a.jpg", 4);
        match cache.get_or_decode(&id("a.jpg")) {
            Lookup::Ready(img) => assert_eq!(img.pixels.len(), 4),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(cache.total_bytes(), 4);
    }

    #[test]
    fn second_request_attaches_to_pending_decode() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        let (first, job) = match cache.get_or_decode(&id("a.jpg")) {
            Lookup::Dispatch(t, job) => (t, job),
            other => panic!("expected dispatch, got {other:?}"),
        };
        let second = match cache.get_or_decode(&id("a.jpg")) {
            Lookup::Pending(t) => t,
            other => panic!("expected pending, got {other:?}"),
        };
        assert_ne!(first, second);

        let done = cache
            .complete(job.id, job.identity, Ok(image("a.jpg", 8)))
            .unwrap();
        assert_eq!(done.tickets, vec![first, second]);
        assert!(done.result.is_ok());
        assert!(!cache.is_pending(&id("a.jpg")));
    }

    #[test]
    fn failures_are_not_cached() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        let Lookup::Dispatch(_, job) = cache.get_or_decode(&id("bad.jpg")) else {
            panic!("expected dispatch");
        };
        let failure = DecodeFailure::new("/pics/bad.jpg", "corrupt");
        let done = cache.complete(job.id, job.identity, Err(failure.clone())).unwrap();
        assert_eq!(done.result.unwrap_err(), failure);
        assert!(cache.is_empty());
        assert!(matches!(cache.get_or_decode(&id("bad.jpg")), Lookup::Dispatch(..)));
    }

    #[test]
    fn evicts_least_recently_accessed_by_count() {
        let mut cache = DecodeCache::new(CacheLimits {
            max_entries: 3,
            max_bytes: u64::MAX,
        });
        load(&mut cache, "a.jpg", 1);
        load(&mut cache, "b.jpg", 1);
        load(&mut cache, "c.jpg", 1);
        // touch a so b becomes the oldest access
        assert!(matches!(cache.get_or_decode(&id("a.jpg")), Lookup::Ready(_)));
        load(&mut cache, "d.jpg", 1);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&id("a.jpg")));
        assert!(!cache.contains(&id("b.jpg")));
        assert!(cache.contains(&id("c.jpg")));
        assert!(cache.contains(&id("d.jpg")));
    }

    #[test]
    fn evicts_until_byte_budget_holds() {
        let mut cache = DecodeCache::new(CacheLimits {
            max_entries: 10,
            max_bytes: 100,
        });
        load(&mut cache, "a.jpg", 40);
        load(&mut cache, "b.jpg", 40);
        load(&mut cache, "c.jpg", 70);
        assert!(cache.total_bytes() <= 100);
        assert!(cache.contains(&id("c.jpg")));
        assert!(!cache.contains(&id("a.jpg")));
        assert!(!cache.contains(&id("b.jpg")));
    }

    #[test]
    fn oversized_buffer_is_returned_but_not_retained() {
        let mut cache = DecodeCache::new(CacheLimits {
            max_entries: 10,
            max_bytes: 10,
        });
        let Lookup::Dispatch(_, job) = cache.get_or_decode(&id("huge.jpg")) else {
            panic!("expected dispatch");
        };
        let done = cache
            .complete(job.id, job.identity, Ok(image("huge.jpg", 11)))
            .unwrap();
        assert_eq!(done.result.unwrap().pixels.len(), 11);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn never_exceeds_default_limits() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        for i in 0..40 {
            load(&mut cache, &format!("{i}.jpg"), 9 * 1024 * 1024);
            assert!(cache.len() <= DEFAULT_MAX_ENTRIES);
            assert!(cache.total_bytes() <= DEFAULT_MAX_BYTES);
        }
    }

    #[test]
    fn clear_forces_miss_and_drops_late_results() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        load(&mut cache, "a.jpg", 4);
        let Lookup::Dispatch(_, stale) = cache.get_or_decode(&id("b.jpg")) else {
            panic!("expected dispatch");
        };

        assert_eq!(cache.clear(), 1);
        assert!(matches!(cache.get_or_decode(&id("a.jpg")), Lookup::Dispatch(..)));

        let Lookup::Dispatch(_, fresh) = cache.get_or_decode(&id("b.jpg")) else {
            panic!("request after clear must dispatch again");
        };
        assert_ne!(stale.id, fresh.id);
        assert!(
            cache
                .complete(stale.id, stale.identity, Ok(image("b.jpg", 4)))
                .is_none()
        );
        assert!(!cache.contains(&id("b.jpg")));
        assert!(
            cache
                .complete(fresh.id, fresh.identity, Ok(image("b.jpg", 4)))
                .is_some()
        );
        assert!(cache.contains(&id("b.jpg")));
    }

    #[test]
    fn releasing_buffers_keeps_inflight_jobs() {
        let mut cache = DecodeCache::new(CacheLimits::default());
        load(&mut cache, "a.jpg", 4);
        let Lookup::Dispatch(first, job) = cache.get_or_decode(&id("b.jpg")) else {
            panic!("expected dispatch");
        };

        assert_eq!(cache.release_buffers(), 1);
        assert_eq!(cache.total_bytes(), 0);
        assert!(!cache.contains(&id("a.jpg")));
        assert!(cache.is_pending(&id("b.jpg")));

        let Lookup::Pending(second) = cache.get_or_decode(&id("b.jpg")) else {
            panic!("request after release must attach to the running decode");
        };
        let done = cache
            .complete(job.id, job.identity, Ok(image("b.jpg", 4)))
            .unwrap();
        assert_eq!(done.tickets, vec![first, second]);
        assert!(cache.contains(&id("b.jpg")));
    }
}
