use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum BudgetExceeded {
    #[error("wall-clock budget of {limit_ms} ms exhausted")]
    Time { limit_ms: u64 },
    #[error("decoded memory budget of {limit} bytes exhausted")]
    Memory { limit: usize },
}

/// Shared wall-clock and decoded-memory budget for one scan.
///
/// Once tripped the budget stays tripped, so every later checkpoint in any
/// stage sees the same reason.
#[derive(Debug)]
pub struct ScanBudget {
    start: Instant,
    time_limit: Option<Duration>,
    memory_limit: usize,
    memory_used: AtomicUsize,
    tripped: Mutex<Option<BudgetExceeded>>,
}

impl ScanBudget {
    pub fn new(time_limit: Option<Duration>, memory_limit: usize) -> Self {
        Self {
            start: Instant::now(),
            time_limit,
            memory_limit,
            memory_used: AtomicUsize::new(0),
            tripped: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, usize::MAX)
    }

    pub fn check(&self) -> Result<(), BudgetExceeded> {
        if let Some(reason) = self.exhausted() {
            return Err(reason);
        }
        if let Some(limit) = self.time_limit {
            if self.start.elapsed() > limit {
                let reason = BudgetExceeded::Time { limit_ms: limit.as_millis() as u64 };
                return Err(self.trip(reason));
            }
        }
        Ok(())
    }

    /// Account for `bytes` of decoded output.
    pub fn charge(&self, bytes: usize) -> Result<(), BudgetExceeded> {
        let previous = self.memory_used.fetch_add(bytes, Ordering::Relaxed);
        if previous.saturating_add(bytes) > self.memory_limit {
            return Err(self.trip(BudgetExceeded::Memory { limit: self.memory_limit }));
        }
        Ok(())
    }

    pub fn remaining_memory(&self) -> usize {
        self.memory_limit.saturating_sub(self.memory_used.load(Ordering::Relaxed))
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn exhausted(&self) -> Option<BudgetExceeded> {
        match self.tripped.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Record `reason` unless an earlier reason is already recorded; returns
    /// the reason that stays on record.
    pub fn trip(&self, reason: BudgetExceeded) -> BudgetExceeded {
        let mut guard = match self.tripped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(existing) => existing,
            None => {
                warn!(
                    security = true,
                    domain = "pdf.budget",
                    kind = "budget_exhausted",
                    reason = %reason,
                    elapsed_ms = self.start.elapsed().as_millis() as u64,
                    "Scan budget exhausted"
                );
                *guard = Some(reason);
                reason
            }
        }
    }
}
