//! Page reclamation (compaction)
//!
//! Copies the live entries of sparsely occupied pages into the active page
//! and erases the source pages.
//!
//! ## Victim selection
//! A page qualifies when `live_slots / capacity < threshold`. The page with
//! the fewest live slots goes first (ties: oldest activation). Tombstones do
//! not count as live.
//!
//! ## Tombstones
//! When a victim is reclaimed, the other pages are read back: a tombstone
//! is carried forward only if one of them still holds an entry record of
//! its key with a lower sequence number, otherwise it dies with the victim.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::device::BlockDevice;
use crate::entry::codec::{self, Decoded};
use crate::entry::Record;
use crate::error::{FlashError, Result};
use crate::index::{EntryKey, IndexSlot, StoreIndex, Tombstone};

use super::manager::RecordWalk;
use super::{PageManager, PageState};

/// A page that qualifies for reclamation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub page: u32,
    pub seq: u64,
    /// Slots that would have to be copied
    pub live_slots: usize,
}

/// Work done by one or more reclamation passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    pub pages_reclaimed: usize,
    pub entries_moved: usize,
    pub tombstones_moved: usize,
    pub tombstones_dropped: usize,
    /// Live entries that no longer decoded and were dropped from the index
    pub entries_lost: usize,
}

impl ReclaimStats {
    fn absorb(&mut self, other: ReclaimStats) {
        self.pages_reclaimed += other.pages_reclaimed;
        self.entries_moved += other.entries_moved;
        self.tombstones_moved += other.tombstones_moved;
        self.tombstones_dropped += other.tombstones_dropped;
        self.entries_lost += other.entries_lost;
    }
}

impl<D: BlockDevice> PageManager<D> {
    /// Pages whose live ratio is below `threshold`, most reclaimable first
    pub fn candidates(&self, index: &StoreIndex, threshold: f32, include_active: bool) -> Vec<Candidate> {
        let occupancy = index.occupancy();
        let capacity = self.slots_per_page().max(1) as f32;

        let mut out: Vec<Candidate> = self
            .pages()
            .iter()
            .filter(|p| p.state == PageState::Full || (include_active && p.state == PageState::Writing))
            .filter_map(|p| {
                let live_slots = occupancy.get(&p.id).copied().unwrap_or(0);
                ((live_slots as f32) / capacity < threshold).then_some(Candidate {
                    page: p.id,
                    seq: p.seq,
                    live_slots,
                })
            })
            .collect();

        out.sort_by_key(|c| (c.live_slots, c.seq));
        out
    }

    /// Reclaim pages until a record of `span` slots can be appended
    ///
    /// Fails with `StoreFull` when no qualifying page frees enough room.
    pub fn make_room(&mut self, index: &mut StoreIndex, span: usize, threshold: f32) -> Result<ReclaimStats> {
        let mut stats = ReclaimStats::default();
        self.finish_erases()?;

        for _ in 0..self.data_page_count() * 2 {
            if self.can_fit(span) {
                return Ok(stats);
            }

            let Some(victim) = self.candidates(index, threshold, true).first().copied() else {
                break;
            };
            stats.absorb(self.reclaim(index, victim.page)?);
        }

        if self.can_fit(span) {
            Ok(stats)
        } else {
            Err(FlashError::StoreFull)
        }
    }

    /// Reclaim every FULL page that qualifies (one pass, each page once)
    pub fn compact(&mut self, index: &mut StoreIndex, threshold: f32) -> Result<ReclaimStats> {
        let mut stats = ReclaimStats::default();
        self.finish_erases()?;

        for candidate in self.candidates(index, threshold, false) {
            if self.page(candidate.page).map(|p| p.state) != Some(PageState::Full) {
                continue;
            }

            match self.reclaim(index, candidate.page) {
                Ok(pass) => stats.absorb(pass),
                Err(FlashError::StoreFull) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    /// Move the surviving records of `victim` to the active page and erase it
    pub fn reclaim(&mut self, index: &mut StoreIndex, victim: u32) -> Result<ReclaimStats> {
        let live = index.live_on_page(victim);
        let (carry, dead) = self.split_tombstones(index, victim)?;

        let needed: usize = live.iter().map(|(_, slot)| slot.location.slots()).sum::<usize>()
            + carry.len();

        // Pick the destination before touching anything
        if needed > 0 {
            let fits_active = self
                .active_page()
                .is_some_and(|id| id != victim && self.free_slots(id) >= needed);
            if !fits_active {
                if self.empty_pages() == 0 {
                    return Err(FlashError::StoreFull);
                }
                self.seal_active()?;
                self.activate_next()?;
            }
        }

        let mut stats = ReclaimStats {
            pages_reclaimed: 1,
            ..Default::default()
        };

        let bytes = if live.is_empty() {
            Vec::new()
        } else {
            self.read_page(victim)?
        };

        for (key, slot) in live {
            let start = slot.location.offset as usize;
            let end = start + slot.location.size as usize;

            let entry = match bytes.get(start..end).map(codec::decode) {
                Some(Ok(Decoded {
                    record: Record::Entry(entry),
                    ..
                })) if entry.namespace == key.namespace && entry.key == key.key => entry,
                other => {
                    warn!(
                        page = victim,
                        offset = start,
                        namespace = %key.namespace,
                        key = %key.key,
                        result = ?other.map(|r| r.map(|d| d.seq)),
                        "live entry unreadable during compaction, dropping"
                    );
                    index.remove(&key.namespace, &key.key);
                    stats.entries_lost += 1;
                    continue;
                }
            };

            let entry_type = entry.value.entry_type();
            let appended = self.append(&Record::Entry(entry))?;
            index.upsert(
                &key.namespace,
                &key.key,
                IndexSlot {
                    location: appended.location,
                    seq: appended.seq,
                    entry_type,
                },
            );
            stats.entries_moved += 1;
        }

        for key in dead {
            index.drop_tombstone(&key.namespace, &key.key);
            stats.tombstones_dropped += 1;
        }

        for key in carry {
            let appended = self.append(&Record::Tombstone {
                namespace: key.namespace.clone(),
                key: key.key.clone(),
            })?;
            index.record_tombstone(
                &key.namespace,
                &key.key,
                Tombstone {
                    location: appended.location,
                    seq: appended.seq,
                },
            );
            stats.tombstones_moved += 1;
        }

        self.erase(victim)?;

        info!(
            page = victim,
            moved = stats.entries_moved,
            tombstones_moved = stats.tombstones_moved,
            tombstones_dropped = stats.tombstones_dropped,
            "reclaimed page"
        );
        Ok(stats)
    }

    /// Split the tombstones on `victim` into (carried forward, dropped)
    fn split_tombstones(&self, index: &StoreIndex, victim: u32) -> Result<(Vec<EntryKey>, Vec<EntryKey>)> {
        let tombstones = index.tombstones_on_page(victim);
        if tombstones.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let keys: BTreeSet<EntryKey> = tombstones.iter().map(|(key, _)| key.clone()).collect();
        let oldest = self.oldest_entries_elsewhere(victim, &keys)?;

        let (carry, dead): (Vec<_>, Vec<_>) = tombstones
            .into_iter()
            .partition(|(key, tombstone)| oldest.get(key).is_some_and(|seq| *seq < tombstone.seq));
        let carry = carry.into_iter().map(|(key, _)| key).collect::<Vec<_>>();
        let dead = dead.into_iter().map(|(key, _)| key).collect::<Vec<_>>();

        debug!(page = victim, carry = carry.len(), drop = dead.len(), "sorted tombstones");
        Ok((carry, dead))
    }

    /// Lowest entry record sequence of each of `keys` on pages other than `victim`
    ///
    /// Pages still waiting for an erase are included: their records come
    /// back if the store reopens before the erase completes.
    fn oldest_entries_elsewhere(&self, victim: u32, keys: &BTreeSet<EntryKey>) -> Result<BTreeMap<EntryKey, u64>> {
        let mut oldest = BTreeMap::new();
        let others: Vec<u32> = self
            .pages()
            .iter()
            .filter(|p| p.state != PageState::Empty && p.id != victim)
            .map(|p| p.id)
            .collect();

        for id in others {
            let bytes = self.read_page(id)?;
            for (_, result) in RecordWalk::new(&bytes) {
                let Ok(Decoded {
                    record: Record::Entry(entry),
                    seq,
                    ..
                }) = result
                else {
                    continue;
                };

                let key = EntryKey::new(entry.namespace, entry.key);
                if keys.contains(&key) {
                    oldest
                        .entry(key)
                        .and_modify(|s: &mut u64| *s = (*s).min(seq))
                        .or_insert(seq);
                }
            }
        }
        Ok(oldest)
    }
}
