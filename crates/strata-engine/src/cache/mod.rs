//! Tiered cache management.
//!
//! Maintains object placement across an ordered hierarchy of tiers, fastest
//! and smallest first (e.g. local NVMe → warm disk → cold archival). Objects
//! enter at the slowest tier with headroom, climb on access frequency, and
//! fall back down on idleness or capacity pressure:
//!
//! ```text
//!   access() ──────────────┐
//!                          ↓
//!   tier 0 (fast)  ◄─ promote ─  tier 1 (warm)  ◄─ promote ─  tier 2 (cold)
//!       │                           │                            │
//!       └── demote (LRU) ──────►    └── demote (LRU) ──────►     └── remove,
//!                                                                  caller falls
//!                                                                  back to the
//!                                                                  backend-of-record
//! ```
//!
//! Placement decisions are a pure function over the entry and the tier
//! geometry ([`decision::evaluate`]), so they are testable without I/O.
//! Eviction itself never performs I/O either: it rearranges metadata and
//! reports the movements so the caller can schedule data transfers.

mod decision;
mod entry;
mod manager;
mod tier;

pub use decision::{evaluate, CacheDecision};
pub use entry::CacheEntry;
pub use manager::{AccessOutcome, CycleReport, Evicted, TieredCacheManager};
pub use tier::TierConfig;

pub(crate) use tier::validate_hierarchy;
