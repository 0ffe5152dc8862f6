//! Greeting selection: category resolution and no-immediate-repeat picking.

use crate::content::{category, ContentPools};
use crate::types::Compliment;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// How many recently shown texts bias the picker.
pub const RECENT_CAPACITY: usize = 5;
/// Random draws attempted before accepting a repeat.
pub const MAX_DRAWS: usize = 12;

/// Bounded FIFO of recently shown texts.
#[derive(Debug, Clone)]
pub struct RecentHistory {
    texts: VecDeque<String>,
    capacity: usize,
}

impl RecentHistory {
    pub fn new() -> Self {
        Self::with_capacity(RECENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            texts: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, text: &str) -> bool {
        self.texts.iter().any(|t| t == text)
    }

    /// Append `text`, evicting the oldest entry when over capacity.
    pub fn record(&mut self, text: &str) {
        self.texts.push_back(text.to_string());
        while self.texts.len() > self.capacity {
            self.texts.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.texts.clear();
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a line from `pool`, avoiding anything in `recent`.
///
/// Up to [`MAX_DRAWS`] independent draws are tried. If they all collide, the
/// last draw is taken among lines not in `recent` when any exist, otherwise
/// from the whole pool, so a tiny pool repeats instead of blocking. The chosen
/// text is recorded either way. An empty pool yields [`Compliment::fallback`].
pub fn pick_from<R: Rng + ?Sized>(
    pool: &[Compliment],
    recent: &mut RecentHistory,
    rng: &mut R,
) -> Compliment {
    if pool.is_empty() {
        return Compliment::fallback();
    }

    for _ in 0..MAX_DRAWS {
        let candidate = &pool[rng.gen_range(0..pool.len())];
        if !recent.contains(&candidate.text) {
            recent.record(&candidate.text);
            return candidate.clone();
        }
    }

    let fresh: Vec<&Compliment> = pool.iter().filter(|c| !recent.contains(&c.text)).collect();
    let chosen = if fresh.is_empty() {
        &pool[rng.gen_range(0..pool.len())]
    } else {
        fresh[rng.gen_range(0..fresh.len())]
    };
    recent.record(&chosen.text);
    chosen.clone()
}

/// Default category for the given local hour.
pub fn time_of_day_category(hour: u32) -> &'static str {
    if hour < 10 {
        category::MORNING
    } else if (15..18).contains(&hour) {
        category::FRIDAY_AFTERNOON
    } else {
        category::GENERAL
    }
}

/// Inputs that decide which pool a greeting is drawn from.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Deployment-pinned category; used when its pool is non-empty.
    pub explicit: Option<&'a str>,
    /// Valid detections in the triggering tick.
    pub valid_count: usize,
    /// The person has been in view past the long-dwell threshold.
    pub long_dwell: bool,
    /// Local hour of day (0–23).
    pub hour: u32,
}

/// Where a selection draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool<'a> {
    Category(&'a str),
    /// Every line of every category.
    Merged,
}

/// A chosen line and the category it was drawn from (`None` for the merged pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picked {
    pub category: Option<String>,
    pub compliment: Compliment,
}

/// Owns the content pools, recent history and RNG.
pub struct ContentPicker {
    pools: ContentPools,
    recent: RecentHistory,
    rng: StdRng,
}

impl ContentPicker {
    pub fn new(pools: ContentPools) -> Self {
        Self::with_rng(pools, StdRng::from_entropy())
    }

    /// Deterministic picker for tests and previews.
    pub fn seeded(pools: ContentPools, seed: u64) -> Self {
        Self::with_rng(pools, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pools: ContentPools, rng: StdRng) -> Self {
        Self {
            pools,
            recent: RecentHistory::new(),
            rng,
        }
    }

    pub fn pools(&self) -> &ContentPools {
        &self.pools
    }

    /// Swap in new content. Recent history is cleared so stale texts cannot
    /// crowd out the new pool.
    pub fn set_pools(&mut self, pools: ContentPools) {
        self.pools = pools;
        self.recent.clear();
    }

    pub fn recent(&self) -> &RecentHistory {
        &self.recent
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    /// Resolve the category a selection draws from.
    ///
    /// Precedence: group (more than one person), long-dwell, explicit,
    /// time of day. Each named category only applies when its pool is
    /// non-empty; the merged pool is the last resort.
    pub fn resolve<'a>(&self, selection: &Selection<'a>) -> Pool<'a> {
        let non_empty = |name: &str| !self.pools.category(name).is_empty();

        if selection.valid_count > 1 {
            return if non_empty(category::GROUP) {
                Pool::Category(category::GROUP)
            } else {
                Pool::Merged
            };
        }
        if selection.long_dwell && non_empty(category::LONG_DWELL) {
            return Pool::Category(category::LONG_DWELL);
        }
        if let Some(explicit) = selection.explicit {
            if non_empty(explicit) {
                return Pool::Category(explicit);
            }
        }
        let by_time = time_of_day_category(selection.hour);
        if non_empty(by_time) {
            Pool::Category(by_time)
        } else {
            Pool::Merged
        }
    }

    /// Resolve the category and draw a line from it.
    pub fn pick(&mut self, selection: &Selection<'_>) -> Picked {
        let (category, pool) = match self.resolve(selection) {
            Pool::Category(name) => (Some(name.to_string()), self.pools.category(name)),
            Pool::Merged => (None, self.pools.all()),
        };
        let compliment = pick_from(pool, &mut self.recent, &mut self.rng);
        Picked {
            category,
            compliment,
        }
    }
}
