//! Surcharge code allocator
//!
//! Issues the small integer added to each order's total so that
//! concurrent anonymous transfers can be told apart by amount alone.
//! A code must not be handed out while it is bound to a live order,
//! nor while it sits in the short history of recently *settled*
//! orders; a slow payer may still be inside the payment window of a
//! just-settled code, and crediting a new buyer for that transfer
//! would be wrong.
//!
//! Codes released without a settlement (cancel / expiry / failure) go
//! straight back into circulation: no ambiguous in-flight transfer is
//! expected to land for them.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Inclusive draw range for normal allocation.
const CODE_MIN: u32 = 10;
const CODE_MAX: u32 = 400;
/// Wider range used when the normal range appears exhausted.
const FALLBACK_MAX: u32 = 509;
/// Redraw attempts before degrading to the fallback range.
const MAX_ATTEMPTS: u32 = 100;
/// Defensive TTL on an active code, independent of the owning order's
/// own expiry. Only the sweep uses it.
const ACTIVE_TTL_MS: i64 = 15 * 60 * 1000;
/// Settled codes kept out of circulation.
const HISTORY_CAPACITY: usize = 3;
/// Sweep cadence for orphaned active codes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Registry {
    /// code -> defensive expiry instant (Unix millis)
    active: HashMap<u32, i64>,
    /// Most recent successfully settled codes, newest first
    recent: VecDeque<u32>,
}

/// Owned allocator service; inject into the order manager.
#[derive(Debug, Default)]
pub struct CodeAllocator {
    inner: Mutex<Registry>,
}

impl CodeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a code not bound to any live order and not in the recent
    /// settlement history.
    ///
    /// If `MAX_ATTEMPTS` random draws all collide, falls back to a
    /// wider range and accepts the draw unconditionally; the
    /// collision risk is tolerated because the normal safety checks
    /// already failed, and this is logged as a degraded-mode event.
    pub fn allocate(&self) -> u32 {
        let mut rng = rand::thread_rng();
        let mut registry = self.inner.lock();

        let mut code = 0;
        let mut found = false;
        for _ in 0..MAX_ATTEMPTS {
            code = rng.gen_range(CODE_MIN..=CODE_MAX);
            if registry.active.contains_key(&code) {
                continue;
            }
            if registry.recent.contains(&code) {
                continue;
            }
            found = true;
            break;
        }

        if !found {
            code = rng.gen_range(CODE_MIN..=FALLBACK_MAX);
            tracing::warn!(
                code,
                active = registry.active.len(),
                "Surcharge range nearly exhausted, degraded draw from wider range"
            );
        }

        registry
            .active
            .insert(code, shared::now_millis() + ACTIVE_TTL_MS);

        tracing::debug!(
            code,
            active = registry.active.len(),
            history = ?registry.recent,
            "Surcharge code allocated"
        );
        code
    }

    /// Release a code after its order reached a terminal state.
    ///
    /// `settled` marks a successful settlement: the code then blocks
    /// reallocation for the next `HISTORY_CAPACITY` settlements.
    pub fn release(&self, code: u32, settled: bool) {
        let mut registry = self.inner.lock();
        registry.active.remove(&code);

        if settled {
            registry.recent.push_front(code);
            if registry.recent.len() > HISTORY_CAPACITY {
                let evicted = registry.recent.pop_back();
                tracing::debug!(?evicted, "Surcharge code left settlement history");
            }
        }

        tracing::debug!(
            code,
            settled,
            active = registry.active.len(),
            history = ?registry.recent,
            "Surcharge code released"
        );
    }

    /// Force-release active codes past their defensive TTL.
    ///
    /// Guards against orders whose owning task died without releasing.
    /// Returns the number of codes reclaimed.
    pub fn sweep(&self) -> usize {
        let now = shared::now_millis();
        let mut registry = self.inner.lock();
        let before = registry.active.len();
        registry.active.retain(|code, expiry| {
            let keep = *expiry > now;
            if !keep {
                tracing::warn!(code, "Reclaimed orphaned surcharge code past TTL");
            }
            keep
        });
        before - registry.active.len()
    }

    /// Periodic sweep loop. Register as `TaskKind::Periodic`.
    pub async fn run_sweeper(self: std::sync::Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reclaimed = self.sweep();
                    if reclaimed > 0 {
                        tracing::info!(reclaimed, "Surcharge sweep reclaimed expired codes");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Recently settled codes, newest first.
    pub fn recent_codes(&self) -> Vec<u32> {
        self.inner.lock().recent.iter().copied().collect()
    }

    #[cfg(test)]
    fn force_expire(&self, code: u32) {
        if let Some(expiry) = self.inner.lock().active.get_mut(&code) {
            *expiry = 0;
        }
    }
}
