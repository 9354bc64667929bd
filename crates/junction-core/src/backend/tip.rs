//! Chain-tip bookkeeping feeding consensus-aware selection.
//!
//! The consensus poller itself is an external collaborator; this tracker is
//! the seam it (and the health monitor, for `eth_blockNumber` probes) writes
//! through. Readers ask which backends are "at tip": within `max_lag` blocks
//! of the highest height recorded among the names they care about.

use dashmap::DashMap;

/// Last reported tip height per backend name.
#[derive(Debug, Default)]
pub struct TipTracker {
    heights: DashMap<String, u64>,
}

impl TipTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { heights: DashMap::new() }
    }

    /// Records a backend's reported tip height.
    pub fn record(&self, backend: &str, height: u64) {
        self.heights.insert(backend.to_string(), height);
    }

    /// Returns the recorded height for a backend, if any.
    #[must_use]
    pub fn height(&self, backend: &str) -> Option<u64> {
        self.heights.get(backend).map(|entry| *entry)
    }

    /// Returns whether `backend` is within `max_lag` of the highest height
    /// recorded among `peers`. Backends with no recorded height are never at
    /// tip; if no peer has a recorded height there is no tip to lag behind,
    /// and every backend qualifies.
    #[must_use]
    pub fn is_at_tip<'a>(
        &self,
        backend: &str,
        peers: impl IntoIterator<Item = &'a str>,
        max_lag: u64,
    ) -> bool {
        let mut max_height = None;
        for peer in peers {
            if let Some(height) = self.height(peer) {
                max_height = Some(max_height.map_or(height, |m: u64| m.max(height)));
            }
        }
        let Some(max_height) = max_height else {
            return true;
        };
        self.height(backend)
            .is_some_and(|height| height >= max_height.saturating_sub(max_lag))
    }
}
