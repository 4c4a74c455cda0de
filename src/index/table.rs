//! Store index implementation
//!
//! Nested BTreeMaps (namespace → key → slot): lookups borrow `&str`
//! without allocating, and iteration comes out sorted by (namespace, key).

use std::collections::BTreeMap;

use crate::entry::EntryType;

use super::{EntryKey, IndexSlot, Tombstone};

/// In-memory index of live entries and pending tombstones
#[derive(Debug, Clone, Default)]
pub struct StoreIndex {
    live: BTreeMap<String, BTreeMap<String, IndexSlot>>,
    tombstones: BTreeMap<EntryKey, Tombstone>,
    len: usize,
}

impl StoreIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the live entry for (namespace, key)
    pub fn lookup(&self, namespace: &str, key: &str) -> Option<&IndexSlot> {
        self.live.get(namespace)?.get(key)
    }

    /// Point (namespace, key) at a new record, returning the superseded slot
    pub fn upsert(&mut self, namespace: &str, key: &str, slot: IndexSlot) -> Option<IndexSlot> {
        if !self.tombstones.is_empty() {
            self.tombstones.remove(&EntryKey::new(namespace, key));
        }

        let prev = self
            .live
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), slot);
        if prev.is_none() {
            self.len += 1;
        }
        prev
    }

    /// Forget the live entry for (namespace, key)
    pub fn remove(&mut self, namespace: &str, key: &str) -> Option<IndexSlot> {
        let keys = self.live.get_mut(namespace)?;
        let prev = keys.remove(key)?;
        if keys.is_empty() {
            self.live.remove(namespace);
        }
        self.len -= 1;
        Some(prev)
    }

    /// Remove the live entry and remember the tombstone that deleted it
    pub fn record_tombstone(&mut self, namespace: &str, key: &str, tombstone: Tombstone) -> Option<IndexSlot> {
        let prev = self.remove(namespace, key);
        self.tombstones.insert(EntryKey::new(namespace, key), tombstone);
        prev
    }

    pub fn tombstone(&self, namespace: &str, key: &str) -> Option<&Tombstone> {
        self.tombstones.get(&EntryKey::new(namespace, key))
    }

    /// Forget a tombstone once no older record of its key can remain
    pub fn drop_tombstone(&mut self, namespace: &str, key: &str) -> Option<Tombstone> {
        self.tombstones.remove(&EntryKey::new(namespace, key))
    }

    // =========================================================================
    // Rebuild (last write wins)
    // =========================================================================

    /// Apply a scanned entry unless a newer record of the key was seen
    pub fn apply_entry(&mut self, namespace: &str, key: &str, slot: IndexSlot) -> bool {
        if self.latest_seq(namespace, key).is_some_and(|seq| seq > slot.seq) {
            return false;
        }
        self.upsert(namespace, key, slot);
        true
    }

    /// Apply a scanned tombstone unless a newer record of the key was seen
    pub fn apply_tombstone(&mut self, namespace: &str, key: &str, tombstone: Tombstone) -> bool {
        if self.latest_seq(namespace, key).is_some_and(|seq| seq > tombstone.seq) {
            return false;
        }
        self.record_tombstone(namespace, key, tombstone);
        true
    }

    fn latest_seq(&self, namespace: &str, key: &str) -> Option<u64> {
        let live = self.lookup(namespace, key).map(|s| s.seq);
        let dead = self.tombstone(namespace, key).map(|t| t.seq);
        live.max(dead)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Namespaces with at least one live entry
    pub fn namespace_count(&self) -> usize {
        self.live.len()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    /// Live entries sorted by (namespace, key)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &IndexSlot)> {
        self.live.iter().flat_map(|(ns, keys)| {
            keys.iter()
                .map(move |(key, slot)| (ns.as_str(), key.as_str(), slot))
        })
    }

    /// Copy of the live entries matching the optional filters
    pub fn snapshot(&self, namespace: Option<&str>, entry_type: Option<EntryType>) -> Vec<(EntryKey, IndexSlot)> {
        self.iter()
            .filter(|(ns, _, _)| namespace.map_or(true, |want| want == *ns))
            .filter(|(_, _, slot)| entry_type.map_or(true, |want| want == slot.entry_type))
            .map(|(ns, key, slot)| (EntryKey::new(ns, key), *slot))
            .collect()
    }

    /// Live entries stored on `page`, in offset order
    pub fn live_on_page(&self, page: u32) -> Vec<(EntryKey, IndexSlot)> {
        let mut out: Vec<_> = self
            .iter()
            .filter(|(_, _, slot)| slot.location.page == page)
            .map(|(ns, key, slot)| (EntryKey::new(ns, key), *slot))
            .collect();
        out.sort_by_key(|(_, slot)| slot.location.offset);
        out
    }

    /// Tombstones stored on `page`, in offset order
    pub fn tombstones_on_page(&self, page: u32) -> Vec<(EntryKey, Tombstone)> {
        let mut out: Vec<_> = self
            .tombstones
            .iter()
            .filter(|(_, t)| t.location.page == page)
            .map(|(k, t)| (k.clone(), *t))
            .collect();
        out.sort_by_key(|(_, t)| t.location.offset);
        out
    }

    /// Live slots per page
    pub fn occupancy(&self) -> BTreeMap<u32, usize> {
        let mut pages = BTreeMap::new();
        for (_, _, slot) in self.iter() {
            *pages.entry(slot.location.page).or_insert(0) += slot.location.slots();
        }
        pages
    }

    /// Slots held by live entries
    pub fn used_slots(&self) -> usize {
        self.iter().map(|(_, _, slot)| slot.location.slots()).sum()
    }
}

/// Indexes are equal when they map the same keys to the same records.
///
/// Tombstones are left out: after compaction drops a key's latest tombstone,
/// a restart may rediscover an older one that still sits on another page.
impl PartialEq for StoreIndex {
    fn eq(&self, other: &Self) -> bool {
        self.live == other.live
    }
}

impl Eq for StoreIndex {}
