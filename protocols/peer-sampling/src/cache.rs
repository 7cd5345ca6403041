// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The peer cache: a bounded, ordered view of known peers.
//!
//! A [`PeerCache`] holds at most `capacity` entries, each pairing a node identity with a logical
//! age and a fixed-size metadata blob. The gossip protocols keep their caches sorted either by
//! age (freshest first) or by a [`Ranker`], and rely on that order for eviction and merging.
//!
//! > **Note**: Uniqueness of identities inside a cache is an invariant of every operation of
//! > this module. Caches decoded from the network are deduplicated on the way in.

use std::cmp::Ordering;

use multiaddr::Multiaddr;
use rand::{seq::SliceRandom, Rng};

use crate::{error::CacheError, identity::NodeId};

/// Age of an entry that has just been inserted.
pub const FRESH_AGE: u32 = 1;

/// Total order used to bias a cache towards a target topology.
///
/// `compare` returns [`Ordering::Less`] if `a` should come before `b` when looking at the
/// network from `target`, [`Ordering::Greater`] if `b` should come first, and
/// [`Ordering::Equal`] if both are equally good.
pub trait Ranker {
    fn compare(&self, target: &[u8], a: &[u8], b: &[u8]) -> Ordering;
}

impl<F> Ranker for F
where
    F: Fn(&[u8], &[u8], &[u8]) -> Ordering,
{
    fn compare(&self, target: &[u8], a: &[u8], b: &[u8]) -> Ordering {
        self(target, a, b)
    }
}

/// One peer in a [`PeerCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<I> {
    id: I,
    age: u32,
    metadata: Box<[u8]>,
}

impl<I> CacheEntry<I> {
    pub(crate) fn new(id: I, age: u32, metadata: Box<[u8]>) -> Self {
        CacheEntry { id, age, metadata }
    }

    /// Identity of the peer.
    pub fn id(&self) -> &I {
        &self.id
    }

    /// Number of gossip cycles since the entry was last refreshed.
    pub fn age(&self) -> u32 {
        self.age
    }

    /// Application metadata attached to the peer.
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }
}

/// Records which inputs of [`PeerCache::merge`] contributed to the result.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Sources(u8);

impl Sources {
    /// At least one entry was taken from the first cache.
    pub const FIRST: Sources = Sources(0b01);
    /// At least one entry was taken from the second cache.
    pub const SECOND: Sources = Sources(0b10);

    /// Raw bitmask, bit 0 for the first cache and bit 1 for the second one.
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Sources) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// `true` if the second cache brought anything in, i.e. the merge learned something.
    pub fn has_news(&self) -> bool {
        self.contains(Sources::SECOND)
    }

    fn insert(&mut self, other: Sources) {
        self.0 |= other.0;
    }
}

/// Bounded set of peers, ordered by age or by rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCache<I = Multiaddr> {
    /// Maximum number of entries.
    capacity: usize,
    /// Size in bytes of the metadata of every entry.
    metadata_size: usize,
    /// Age at which entries expire. `0` disables expiry.
    max_age: u32,
    entries: Vec<CacheEntry<I>>,
}

impl<I> PeerCache<I> {
    /// Creates an empty cache.
    ///
    /// `max_age` is the age at which [`PeerCache::age`] evicts entries; `0` means never.
    pub fn new(capacity: usize, metadata_size: usize, max_age: u32) -> Self {
        PeerCache {
            capacity,
            metadata_size,
            max_age,
            entries: Vec::new(),
        }
    }

    pub(crate) fn from_entries(
        capacity: usize,
        metadata_size: usize,
        max_age: u32,
        entries: Vec<CacheEntry<I>>,
    ) -> Self {
        debug_assert!(entries.len() <= capacity);
        PeerCache {
            capacity,
            metadata_size,
            max_age,
            entries,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn metadata_size(&self) -> usize {
        self.metadata_size
    }

    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    /// Returns the entry at position `index`.
    pub fn get(&self, index: usize) -> Option<&CacheEntry<I>> {
        self.entries.get(index)
    }

    /// Iterates over the entries in cache order.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<I>> {
        self.entries.iter()
    }

    /// Iterates over the identities in cache order.
    pub fn ids(&self) -> impl Iterator<Item = &I> {
        self.entries.iter().map(|e| &e.id)
    }

    /// The entry with the highest age, i.e. the one refreshed the longest time ago.
    ///
    /// Among entries of equal age, the one closest to the end of the cache is returned.
    pub fn oldest(&self) -> Option<&CacheEntry<I>> {
        self.entries.iter().max_by_key(|e| e.age)
    }

    /// Increments the age of every entry.
    ///
    /// If expiry is enabled, the first entry that has already reached `max_age` is evicted
    /// together with every entry after it. The cache must be sorted by age for this to only
    /// drop expired entries.
    pub fn age(&mut self) {
        if self.max_age != 0 {
            if let Some(pos) = self.entries.iter().position(|e| e.age >= self.max_age) {
                tracing::trace!(
                    evicted = self.entries.len() - pos,
                    max_age = self.max_age,
                    "Expiring cache entries"
                );
                self.entries.truncate(pos);
            }
        }

        for entry in self.entries.iter_mut() {
            entry.age = entry.age.saturating_add(1);
        }
    }

    /// Changes the capacity, dropping the entries beyond it. Existing entries keep their order.
    ///
    /// Returns the new number of entries.
    pub fn resize(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        self.entries.truncate(capacity);
        self.entries.len()
    }

    /// Sorts the entries by age, freshest first. Entries of equal age keep their order.
    pub fn sort_by_age(&mut self) {
        self.entries.sort_by_key(|e| e.age);
    }

    /// Shuffles the entries, then restores the age order. Ties between entries of equal age
    /// end up in random order.
    pub fn shuffle_ties(&mut self) {
        self.entries.shuffle(&mut rand::thread_rng());
        self.sort_by_age();
    }

    pub(crate) fn set_age(&mut self, index: usize, age: u32) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.age = age;
        }
    }

    /// Checks a metadata blob against the metadata size of the cache. An empty blob is accepted
    /// and stands for all zeroes.
    fn check_metadata(&self, metadata: &[u8]) -> Result<Box<[u8]>, CacheError> {
        if metadata.is_empty() {
            return Ok(vec![0; self.metadata_size].into_boxed_slice());
        }
        if metadata.len() != self.metadata_size {
            return Err(CacheError::MetadataSizeMismatch {
                expected: self.metadata_size,
                found: metadata.len(),
            });
        }
        Ok(metadata.into())
    }

    fn check_compatible(&self, other: &Self) -> Result<(), CacheError> {
        if self.metadata_size != other.metadata_size {
            return Err(CacheError::MetadataSizeMismatch {
                expected: self.metadata_size,
                found: other.metadata_size,
            });
        }
        Ok(())
    }

    fn empty_like(&self, capacity: usize) -> Self {
        PeerCache::new(capacity, self.metadata_size, self.max_age)
    }

    /// Inserts `entry` after every entry that is strictly fresher.
    fn insert_by_age(&mut self, entry: CacheEntry<I>) {
        let pos = self.entries.iter().filter(|e| e.age < entry.age).count();
        self.entries.insert(pos, entry);
    }
}

impl<I: NodeId> PeerCache<I> {
    /// Returns the position of `id` in the cache.
    pub fn position(&self, id: &I) -> Option<usize> {
        self.entries.iter().position(|e| e.id == *id)
    }

    pub fn contains(&self, id: &I) -> bool {
        self.position(id).is_some()
    }

    /// Adds a freshly seen peer, in age order.
    ///
    /// Returns the new number of entries. If the peer is already known, its metadata is replaced
    /// by `metadata` (unless empty) and [`CacheError::AlreadyPresent`] is returned.
    pub fn add(&mut self, id: I, metadata: &[u8]) -> Result<usize, CacheError> {
        let refresh = !metadata.is_empty();
        let metadata = self.check_metadata(metadata)?;
        if let Some(pos) = self.position(&id) {
            if refresh {
                self.entries[pos].metadata = metadata;
            }
            return Err(CacheError::AlreadyPresent);
        }
        if self.is_full() {
            return Err(CacheError::Full);
        }

        self.insert_by_age(CacheEntry::new(id, FRESH_AGE, metadata));
        Ok(self.entries.len())
    }

    /// Adds a freshly seen peer at the position `ranker` gives it relative to `target`.
    ///
    /// The peer is placed after every entry that ranks strictly better. An already known peer is
    /// removed first and re-inserted with a fresh age.
    pub fn add_ranked<R: Ranker + ?Sized>(
        &mut self,
        id: I,
        metadata: &[u8],
        ranker: &R,
        target: &[u8],
    ) -> Result<usize, CacheError> {
        let metadata = self.check_metadata(metadata)?;
        self.remove(&id);
        if self.is_full() {
            return Err(CacheError::Full);
        }

        let pos = self
            .entries
            .iter()
            .filter(|e| ranker.compare(target, &metadata, &e.metadata) == Ordering::Greater)
            .count();
        self.entries
            .insert(pos, CacheEntry::new(id, FRESH_AGE, metadata));
        Ok(self.entries.len())
    }

    /// Replaces the metadata of a known peer.
    pub fn update_metadata(&mut self, id: &I, metadata: &[u8]) -> Result<(), CacheError> {
        let metadata = self.check_metadata(metadata)?;
        let pos = self.position(id).ok_or(CacheError::NotFound)?;
        self.entries[pos].metadata = metadata;
        Ok(())
    }

    /// Removes `id` from the cache. Returns the new number of entries.
    pub fn remove(&mut self, id: &I) -> usize {
        self.entries.retain(|e| e.id != *id);
        self.entries.len()
    }

    /// Removes and returns the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> Option<CacheEntry<I>> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Removes and returns the oldest entry, see [`PeerCache::oldest`].
    pub fn take_oldest(&mut self) -> Option<CacheEntry<I>> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.age)
            .map(|(pos, _)| pos)?;
        self.remove_at(pos)
    }

    /// Builds a new cache of the same capacity, with every entry but `exclude`, sorted by
    /// `ranker` relative to `target`. Entries that rank equally keep their relative order.
    pub fn rank<R: Ranker + ?Sized>(&self, ranker: &R, exclude: Option<&I>, target: &[u8]) -> Self {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|e| exclude != Some(&e.id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| ranker.compare(target, &a.metadata, &b.metadata));

        PeerCache {
            capacity: self.capacity.max(entries.len()),
            metadata_size: self.metadata_size,
            max_age: self.max_age,
            entries,
        }
    }

    /// Merges two age-sorted caches into a new one holding at most `capacity` entries.
    ///
    /// Entries are taken freshest first; an identity present in both caches keeps its fresher
    /// copy. The returned [`Sources`] tells which caches contributed to the result.
    pub fn merge(&self, other: &Self, capacity: usize) -> Result<(Self, Sources), CacheError> {
        self.check_compatible(other)?;

        let mut merged = self.empty_like(capacity);
        let mut sources = Sources::default();
        let (mut n1, mut n2) = (0, 0);

        while merged.len() < capacity {
            let (entry, source) = match (self.entries.get(n1), other.entries.get(n2)) {
                (None, None) => break,
                (Some(e1), Some(e2)) if e2.age > e1.age => {
                    n1 += 1;
                    (e1, Sources::FIRST)
                }
                // Ties go to `other`, so `Sources::SECOND` may be set without anything newer.
                (_, Some(e2)) => {
                    n2 += 1;
                    (e2, Sources::SECOND)
                }
                (Some(e1), None) => {
                    n1 += 1;
                    (e1, Sources::FIRST)
                }
            };

            if !merged.contains(&entry.id) {
                merged.entries.push(entry.clone());
                sources.insert(source);
            }
        }

        Ok((merged, sources))
    }

    /// Combines two caches without eviction.
    ///
    /// The result holds every entry of `self` followed by the entries of `other` that are not in
    /// `self`. A peer known to both keeps the fresher age and metadata. Returns the new cache
    /// and its number of entries.
    pub fn union(&self, other: &Self) -> Result<(Self, usize), CacheError> {
        self.check_compatible(other)?;

        let mut union = self.empty_like(self.len() + other.len());
        union.entries.extend(self.entries.iter().cloned());

        for entry in other.entries.iter() {
            match union.position(&entry.id) {
                Some(pos) => {
                    let known = &mut union.entries[pos];
                    if known.age > entry.age {
                        known.age = entry.age;
                        known.metadata = entry.metadata.clone();
                    }
                }
                None => union.entries.push(entry.clone()),
            }
        }

        let size = union.len();
        Ok((union, size))
    }

    /// Picks a random entry among the first `bound` ones (the whole cache if `bound` is 0),
    /// skipping the identities in `exclude`.
    pub fn random_peer(&self, bound: usize, exclude: &[I]) -> Option<&CacheEntry<I>> {
        let bound = if bound == 0 {
            self.entries.len()
        } else {
            bound.min(self.entries.len())
        };

        let candidates: Vec<_> = self.entries[..bound]
            .iter()
            .filter(|e| !exclude.contains(&e.id))
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Removes `n` random entries (fewer if the cache is smaller) and returns them as a new
    /// cache of capacity `n`, sorted by age.
    pub fn random_subset(&mut self, n: usize) -> Self {
        let mut rng = rand::thread_rng();
        let mut subset = self.empty_like(n);

        while subset.len() < n && !self.entries.is_empty() {
            let index = rng.gen_range(0..self.entries.len());
            let entry = self.entries.remove(index);
            subset.insert_by_age(entry);
        }

        subset
    }
}
