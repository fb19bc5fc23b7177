//! Content-addressed dedup store
//!
//! Payloads are keyed by a 32-bit content hash. Equal payloads collapse to
//! one entry; a different payload landing on a used hash probes forward
//! (`hash + 1`, skipping the reserved 0) until it finds itself or a free
//! slot. Ids are never 0.

use hashbrown::HashMap;
use std::num::NonZeroU32;

/// Id of a stored payload
pub type ResourceId = NonZeroU32;

/// Payload that can be deduplicated
///
/// `content_hash` must be a pure function of the payload; equality decides
/// whether two payloads with the same hash are duplicates.
pub trait DedupPayload: PartialEq {
    fn content_hash(&self) -> u32;
}

/// Order-sensitive 32-bit hash of a byte range
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    xxhash_rust::xxh3::xxh3_64(bytes) as u32
}

#[derive(Debug, Clone)]
pub struct DedupEntry<P> {
    /// Hash before probing, 0 stored as 1
    pub content_hash: NonZeroU32,
    pub payload: P,
    pub source_id: u32,
}

#[derive(Debug, Clone)]
pub struct DedupStore<P> {
    entries: HashMap<u32, DedupEntry<P>>,
    probe_limit: u32,
    label: &'static str,
}

impl<P: DedupPayload> DedupStore<P> {
    /// Store probing the whole id space; `label` names the payload in warnings
    pub fn new(label: &'static str) -> Self {
        Self::with_probe_limit(label, u32::MAX)
    }

    pub fn with_probe_limit(label: &'static str, probe_limit: u32) -> Self {
        Self {
            entries: HashMap::new(),
            probe_limit: probe_limit.max(1),
            label,
        }
    }

    /// Store a payload or find its duplicate
    ///
    /// Returns `None` when every probed slot holds a different payload; the
    /// payload is then not stored.
    pub fn add(&mut self, payload: P, source_id: u32) -> Option<ResourceId> {
        let content_hash = NonZeroU32::new(payload.content_hash()).unwrap_or(NonZeroU32::MIN);
        let mut id = content_hash.get();

        for _ in 0..self.probe_limit {
            match self.entries.get(&id) {
                Some(entry) if entry.payload == payload => return NonZeroU32::new(id),
                Some(_) => {
                    id = id.wrapping_add(1).max(1);
                }
                None => {
                    self.entries.insert(
                        id,
                        DedupEntry {
                            content_hash,
                            payload,
                            source_id,
                        },
                    );
                    return NonZeroU32::new(id);
                }
            }
        }

        tracing::warn!("Maximum number of {} reached", self.label);
        None
    }

    pub fn find(&self, id: ResourceId) -> Option<&DedupEntry<P>> {
        self.entries.get(&id.get())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &DedupEntry<P>)> {
        self.entries
            .iter()
            .filter_map(|(&id, entry)| NonZeroU32::new(id).map(|id| (id, entry)))
    }
}

/// Append `value` unless an equal element exists; returns its index
pub fn add_unique<T: PartialEq>(items: &mut Vec<T>, value: T) -> usize {
    if let Some(index) = items.iter().position(|item| *item == value) {
        return index;
    }
    items.push(value);
    items.len() - 1
}
