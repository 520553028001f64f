//! Picks the execution strategy from the test count and detected CPU count:
//! small suites run in-process, medium suites get a small warm pool, large
//! suites get one worker per CPU.

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    InProcess,
    WarmWorkers { pool_size: usize },
    FullDistributed { pool_size: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyThresholds {
    pub in_process_max: usize,
    pub warm_workers_max: usize,
    pub warm_workers_cap: usize,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            in_process_max: 20,
            warm_workers_max: 100,
            warm_workers_cap: 4,
        }
    }
}

pub struct StrategySelector {
    thresholds: StrategyThresholds,
    cpu_count: usize,
}

impl StrategySelector {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            thresholds: StrategyThresholds::default(),
            cpu_count: cpu_count.max(1),
        }
    }

    pub fn with_thresholds(cpu_count: usize, thresholds: StrategyThresholds) -> Self {
        Self {
            thresholds,
            cpu_count: cpu_count.max(1),
        }
    }

    /// Selects a strategy for `test_count`. Recomputed every run; never
    /// cached across calls.
    pub fn select(&self, test_count: usize) -> Strategy {
        let strategy = if test_count <= self.thresholds.in_process_max {
            Strategy::InProcess
        } else if test_count <= self.thresholds.warm_workers_max {
            Strategy::WarmWorkers {
                pool_size: self.cpu_count.min(self.thresholds.warm_workers_cap),
            }
        } else {
            Strategy::FullDistributed {
                pool_size: self.cpu_count,
            }
        };
        info!(test_count, cpu_count = self.cpu_count, ?strategy, "strategy selected");
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_in_process_at_or_below_twenty() {
        let selector = StrategySelector::new(8);
        assert_eq!(selector.select(20), Strategy::InProcess);
        assert_eq!(
            selector.select(21),
            Strategy::WarmWorkers { pool_size: 4 }
        );
    }

    #[test]
    fn picks_full_distributed_above_one_hundred() {
        let selector = StrategySelector::new(8);
        assert_eq!(selector.select(100), Strategy::WarmWorkers { pool_size: 4 });
        assert_eq!(
            selector.select(101),
            Strategy::FullDistributed { pool_size: 8 }
        );
    }

    #[test]
    fn warm_workers_pool_is_capped_at_four() {
        let selector = StrategySelector::new(16);
        assert_eq!(selector.select(50), Strategy::WarmWorkers { pool_size: 4 });
    }

    #[test]
    fn full_distributed_uses_all_detected_cpus() {
        let selector = StrategySelector::new(3);
        assert_eq!(selector.select(500), Strategy::FullDistributed { pool_size: 3 });
    }
}
