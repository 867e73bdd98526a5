use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use tracing::{debug, info};

use super::decision::{evaluate, CacheDecision};
use super::entry::CacheEntry;
use super::tier::{validate_hierarchy, TierConfig};
use strata_core::{CoreError, CoreResult, ObjectId};

/// A cache movement produced by eviction or demotion.
#[derive(Debug, Clone, PartialEq)]
pub struct Evicted {
    /// Moved object.
    pub object_id: ObjectId,
    /// Object size in bytes.
    pub size_bytes: u64,
    /// Tier the object left.
    pub from_tier: String,
    /// Destination tier; `None` when the object left the cache entirely and
    /// the caller falls back to the backend-of-record.
    pub to_tier: Option<String>,
}

/// Result of an `access` call.
#[derive(Debug, Clone)]
pub struct AccessOutcome {
    /// Tier holding the object after the access.
    pub tier: String,
    /// Whether the object was already cached.
    pub hit: bool,
    /// Whether the access promoted the object.
    pub promoted: bool,
    /// Movements triggered to make room.
    pub evictions: Vec<Evicted>,
}

/// Result of one maintenance cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Objects promoted to a faster tier.
    pub promoted: Vec<ObjectId>,
    /// Demotions and removals applied.
    pub movements: Vec<Evicted>,
}

#[derive(Default)]
struct TierBook {
    entries: HashMap<ObjectId, CacheEntry>,
    used_bytes: u64,
}

impl TierBook {
    fn insert(&mut self, entry: CacheEntry) {
        self.used_bytes += entry.size_bytes;
        self.entries.insert(entry.object_id.clone(), entry);
    }

    fn take(&mut self, object_id: &ObjectId) -> Option<CacheEntry> {
        let entry = self.entries.remove(object_id)?;
        self.used_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Least-recently-used unpinned entry; ties broken by lowest access count.
    fn lru_victim(&self) -> Option<ObjectId> {
        self.entries
            .values()
            .filter(|entry| !entry.pinned)
            .min_by(|a, b| {
                a.last_access_at
                    .cmp(&b.last_access_at)
                    .then(a.access_count.cmp(&b.access_count))
            })
            .map(|entry| entry.object_id.clone())
    }
}

struct TierShard {
    config: TierConfig,
    book: Mutex<TierBook>,
}

/// Object placement across an ordered tier hierarchy, fastest first.
///
/// Each tier has its own lock; single-tier accesses touch only that lock,
/// while structural changes (placement, promotion, eviction cascades) hold
/// the tier locks in fixed fast-to-slow order.
pub struct TieredCacheManager {
    tiers: Vec<TierShard>,
    locations: RwLock<HashMap<ObjectId, usize>>,
}

impl TieredCacheManager {
    /// Creates a manager over the given hierarchy, fastest tier first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when the hierarchy is empty or a
    /// tier is misconfigured.
    pub fn new(tiers: Vec<TierConfig>) -> CoreResult<Self> {
        validate_hierarchy(&tiers)?;
        Ok(Self {
            tiers: tiers
                .into_iter()
                .map(|config| TierShard {
                    config,
                    book: Mutex::new(TierBook::default()),
                })
                .collect(),
            locations: RwLock::new(HashMap::new()),
        })
    }

    /// Tier names, fastest first.
    #[must_use]
    pub fn tier_names(&self) -> Vec<String> {
        self.tiers
            .iter()
            .map(|shard| shard.config.name.clone())
            .collect()
    }

    /// (used, capacity) bytes of a tier.
    #[must_use]
    pub fn tier_usage(&self, tier: &str) -> Option<(u64, u64)> {
        let idx = self.tier_index(tier)?;
        let book = self.tiers[idx].book.lock();
        Some((book.used_bytes, self.tiers[idx].config.capacity_bytes))
    }

    /// Name of the tier currently holding the object.
    #[must_use]
    pub fn location(&self, object_id: &ObjectId) -> Option<String> {
        let idx = self.location_index(object_id)?;
        Some(self.tiers[idx].config.name.clone())
    }

    /// Snapshot of the object's cache entry.
    #[must_use]
    pub fn entry(&self, object_id: &ObjectId) -> Option<CacheEntry> {
        loop {
            let idx = self.location_index(object_id)?;
            let book = self.tiers[idx].book.lock();
            if let Some(entry) = book.entries.get(object_id) {
                return Some(entry.clone());
            }
        }
    }

    /// Records an access, placing, touching, and possibly promoting the
    /// object.
    ///
    /// An absent object is placed at the slowest tier with headroom; a cached
    /// object whose access count reaches the next-faster tier's promotion
    /// threshold climbs one tier, evicting that tier's least-recently-used
    /// unpinned entries as needed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::TierFull` when a new object cannot be placed
    /// because no unpinned entry can be evicted; the caller then bypasses the
    /// cache and reads from the backend-of-record.
    pub fn access(&self, object_id: &ObjectId, size_bytes: u64) -> CoreResult<AccessOutcome> {
        let now = Utc::now();

        // Fast path: touch under a single tier lock; no structural change.
        loop {
            let Some(idx) = self.location_index(object_id) else {
                break;
            };
            let shard = &self.tiers[idx];
            let mut book = shard.book.lock();
            let Some(entry) = book.entries.get_mut(object_id) else {
                // Moved concurrently; re-read the location.
                continue;
            };
            entry.touch(now);
            let wants_promotion = idx > 0
                && !entry.pinned
                && entry.access_count >= self.tiers[idx - 1].config.promote_threshold;
            if !wants_promotion {
                return Ok(AccessOutcome {
                    tier: shard.config.name.clone(),
                    hit: true,
                    promoted: false,
                    evictions: Vec::new(),
                });
            }
            drop(book);
            return self.structural_access(object_id, size_bytes, now, true);
        }

        self.structural_access(object_id, size_bytes, now, false)
    }

    /// Brings a tier back within capacity.
    ///
    /// A no-op when the tier is already within capacity. Evicted entries
    /// demote to the next slower tier; entries leaving the last tier are
    /// reported with `to_tier: None`.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` for an unknown tier name.
    /// - `CoreError::TierFull` when pinned entries block the required space.
    pub fn evict(&self, tier: &str) -> CoreResult<Vec<Evicted>> {
        let idx = self
            .tier_index(tier)
            .ok_or_else(|| CoreError::not_found("tier", tier))?;

        let mut books = self.lock_all();
        let mut movements = Vec::new();
        let mut relocations = Vec::new();
        let result = make_room(&self.tiers, &mut books, idx, 0, &mut movements, &mut relocations);
        // Movements applied before an error must still reach the index.
        self.apply_relocations(relocations);
        result.map(|()| movements)
    }

    /// Exempts the object from eviction and demotion.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the object is not cached.
    pub fn pin(&self, object_id: &ObjectId) -> CoreResult<()> {
        self.set_pinned(object_id, true)
    }

    /// Lifts the eviction exemption.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the object is not cached.
    pub fn unpin(&self, object_id: &ObjectId) -> CoreResult<()> {
        self.set_pinned(object_id, false)
    }

    /// Removes the object from the cache, returning its entry.
    pub fn remove(&self, object_id: &ObjectId) -> Option<CacheEntry> {
        loop {
            let idx = self.location_index(object_id)?;
            let mut book = self.tiers[idx].book.lock();
            if let Some(entry) = book.take(object_id) {
                self.locations.write().remove(object_id);
                return Some(entry);
            }
        }
    }

    /// Runs one maintenance cycle at `now`: demotes idle entries one tier,
    /// removes idle entries from the last tier, and promotes qualifying
    /// entries into free headroom.
    ///
    /// Decisions are computed up front, so each entry moves at most one tier
    /// per cycle.
    pub fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let configs: Vec<TierConfig> = self
            .tiers
            .iter()
            .map(|shard| shard.config.clone())
            .collect();

        let mut books = self.lock_all();
        let decisions: Vec<Vec<(ObjectId, CacheDecision)>> = books
            .iter()
            .enumerate()
            .map(|(idx, book)| {
                book.entries
                    .values()
                    .map(|entry| (entry.object_id.clone(), evaluate(entry, idx, &configs, now)))
                    .collect()
            })
            .collect();

        let mut report = CycleReport::default();
        let mut relocations = Vec::new();

        for (idx, tier_decisions) in decisions.into_iter().enumerate() {
            for (object_id, decision) in tier_decisions {
                // An earlier application may have moved the entry already.
                if !books[idx].entries.contains_key(&object_id) {
                    continue;
                }
                match decision {
                    CacheDecision::Keep => {}
                    CacheDecision::Promote => {
                        let target = idx - 1;
                        let size = books[idx].entries[&object_id].size_bytes;
                        // Cycle promotions only fill free headroom; eviction
                        // on behalf of promotion happens on the access path.
                        if books[target].used_bytes + size
                            <= self.tiers[target].config.capacity_bytes
                        {
                            let mut entry = books[idx].take(&object_id).expect("entry present");
                            entry.access_count = 0;
                            books[target].insert(entry);
                            relocations.push((object_id.clone(), Some(target)));
                            info!(
                                object = %object_id,
                                from = %self.tiers[idx].config.name,
                                to = %self.tiers[target].config.name,
                                "promoting"
                            );
                            report.promoted.push(object_id);
                        }
                    }
                    CacheDecision::Demote => {
                        let target = idx + 1;
                        let size = books[idx].entries[&object_id].size_bytes;
                        if make_room(
                            &self.tiers,
                            &mut books,
                            target,
                            size,
                            &mut report.movements,
                            &mut relocations,
                        )
                        .is_err()
                        {
                            debug!(
                                object = %object_id,
                                tier = %self.tiers[target].config.name,
                                "demotion skipped, no room below"
                            );
                            continue;
                        }
                        let entry = books[idx].take(&object_id).expect("entry present");
                        books[target].insert(entry.clone());
                        relocations.push((object_id.clone(), Some(target)));
                        info!(
                            object = %object_id,
                            from = %self.tiers[idx].config.name,
                            to = %self.tiers[target].config.name,
                            "demoting idle entry"
                        );
                        report.movements.push(Evicted {
                            object_id,
                            size_bytes: entry.size_bytes,
                            from_tier: self.tiers[idx].config.name.clone(),
                            to_tier: Some(self.tiers[target].config.name.clone()),
                        });
                    }
                    CacheDecision::Evict => {
                        let entry = books[idx].take(&object_id).expect("entry present");
                        relocations.push((object_id.clone(), None));
                        info!(
                            object = %object_id,
                            tier = %self.tiers[idx].config.name,
                            "removing idle entry from last tier"
                        );
                        report.movements.push(Evicted {
                            object_id,
                            size_bytes: entry.size_bytes,
                            from_tier: self.tiers[idx].config.name.clone(),
                            to_tier: None,
                        });
                    }
                }
            }
        }

        self.apply_relocations(relocations);
        report
    }

    fn structural_access(
        &self,
        object_id: &ObjectId,
        size_bytes: u64,
        now: DateTime<Utc>,
        already_touched: bool,
    ) -> CoreResult<AccessOutcome> {
        let mut books = self.lock_all();
        let mut movements = Vec::new();
        let mut relocations = Vec::new();

        let outcome = if let Some(idx) = books
            .iter()
            .position(|book| book.entries.contains_key(object_id))
        {
            if !already_touched {
                if let Some(entry) = books[idx].entries.get_mut(object_id) {
                    entry.touch(now);
                }
            }
            let entry = &books[idx].entries[object_id];
            let qualifies = idx > 0
                && !entry.pinned
                && entry.access_count >= self.tiers[idx - 1].config.promote_threshold;
            if !qualifies {
                AccessOutcome {
                    tier: self.tiers[idx].config.name.clone(),
                    hit: true,
                    promoted: false,
                    evictions: Vec::new(),
                }
            } else {
                let target = idx - 1;
                let size = entry.size_bytes;
                match make_room(
                    &self.tiers,
                    &mut books,
                    target,
                    size,
                    &mut movements,
                    &mut relocations,
                ) {
                    // The cascade may have displaced the entry itself when
                    // the slower tiers are small; it is then already placed.
                    Ok(()) if books[idx].entries.contains_key(object_id) => {
                        let mut entry = books[idx].take(object_id).expect("entry present");
                        // Fresh accesses are required for the next climb.
                        entry.access_count = 0;
                        books[target].insert(entry);
                        relocations.push((object_id.clone(), Some(target)));
                        info!(
                            object = %object_id,
                            from = %self.tiers[idx].config.name,
                            to = %self.tiers[target].config.name,
                            "promoting"
                        );
                        AccessOutcome {
                            tier: self.tiers[target].config.name.clone(),
                            hit: true,
                            promoted: true,
                            evictions: movements,
                        }
                    }
                    Ok(()) => AccessOutcome {
                        tier: self.tiers[idx].config.name.clone(),
                        hit: true,
                        promoted: false,
                        evictions: movements,
                    },
                    // Promotion is best-effort; a tier full of pinned
                    // entries leaves the object where it is.
                    Err(_) => AccessOutcome {
                        tier: self.tiers[idx].config.name.clone(),
                        hit: true,
                        promoted: false,
                        evictions: movements,
                    },
                }
            }
        } else {
            // New object: slowest tier with headroom, else evict in the
            // slowest tier to make room.
            let placed_at = books
                .iter()
                .enumerate()
                .rev()
                .find(|(idx, book)| {
                    book.used_bytes + size_bytes <= self.tiers[*idx].config.capacity_bytes
                })
                .map(|(idx, _)| idx);

            let idx = match placed_at {
                Some(idx) => idx,
                None => {
                    let last = self.tiers.len() - 1;
                    if let Err(err) = make_room(
                        &self.tiers,
                        &mut books,
                        last,
                        size_bytes,
                        &mut movements,
                        &mut relocations,
                    ) {
                        // Movements applied before the error must still
                        // reach the index.
                        self.apply_relocations(relocations);
                        return Err(err);
                    }
                    last
                }
            };
            books[idx].insert(CacheEntry::new(object_id.clone(), size_bytes, now));
            relocations.push((object_id.clone(), Some(idx)));
            debug!(
                object = %object_id,
                tier = %self.tiers[idx].config.name,
                size_bytes,
                "placed new cache entry"
            );
            AccessOutcome {
                tier: self.tiers[idx].config.name.clone(),
                hit: false,
                promoted: false,
                evictions: movements,
            }
        };

        self.apply_relocations(relocations);
        Ok(outcome)
    }

    fn set_pinned(&self, object_id: &ObjectId, pinned: bool) -> CoreResult<()> {
        loop {
            let Some(idx) = self.location_index(object_id) else {
                return Err(CoreError::not_found("cache entry", object_id.as_str()));
            };
            let mut book = self.tiers[idx].book.lock();
            if let Some(entry) = book.entries.get_mut(object_id) {
                entry.pinned = pinned;
                return Ok(());
            }
        }
    }

    fn tier_index(&self, tier: &str) -> Option<usize> {
        self.tiers.iter().position(|shard| shard.config.name == tier)
    }

    fn location_index(&self, object_id: &ObjectId) -> Option<usize> {
        self.locations.read().get(object_id).copied()
    }

    /// Tier locks in fixed fast-to-slow order.
    fn lock_all(&self) -> Vec<MutexGuard<'_, TierBook>> {
        self.tiers.iter().map(|shard| shard.book.lock()).collect()
    }

    fn apply_relocations(&self, relocations: Vec<(ObjectId, Option<usize>)>) {
        if relocations.is_empty() {
            return;
        }
        let mut locations = self.locations.write();
        for (object_id, idx) in relocations {
            match idx {
                Some(idx) => {
                    locations.insert(object_id, idx);
                }
                None => {
                    locations.remove(&object_id);
                }
            }
        }
    }
}

/// Evicts least-recently-used unpinned entries from `tiers[idx]` until
/// `needed` more bytes fit. Victims demote one tier down (cascading) or, in
/// the last tier, leave the cache.
fn make_room(
    tiers: &[TierShard],
    books: &mut Vec<MutexGuard<'_, TierBook>>,
    idx: usize,
    needed: u64,
    movements: &mut Vec<Evicted>,
    relocations: &mut Vec<(ObjectId, Option<usize>)>,
) -> CoreResult<()> {
    while books[idx].used_bytes + needed > tiers[idx].config.capacity_bytes {
        let victim_id = books[idx].lru_victim().ok_or_else(|| CoreError::TierFull {
            tier: tiers[idx].config.name.clone(),
        })?;
        let victim_size = books[idx].entries[&victim_id].size_bytes;

        if idx + 1 < tiers.len() {
            // Free space below first so the victim is never dropped on error.
            make_room(tiers, books, idx + 1, victim_size, movements, relocations)?;
            let victim = books[idx].take(&victim_id).expect("victim present");
            books[idx + 1].insert(victim);
            relocations.push((victim_id.clone(), Some(idx + 1)));
            movements.push(Evicted {
                object_id: victim_id,
                size_bytes: victim_size,
                from_tier: tiers[idx].config.name.clone(),
                to_tier: Some(tiers[idx + 1].config.name.clone()),
            });
        } else {
            let victim = books[idx].take(&victim_id).expect("victim present");
            relocations.push((victim_id.clone(), None));
            movements.push(Evicted {
                object_id: victim_id,
                size_bytes: victim.size_bytes,
                from_tier: tiers[idx].config.name.clone(),
                to_tier: None,
            });
        }
    }
    Ok(())
}
