//! Concurrency stress helpers.
//!
//! Many threads hammer a single game's lease to check that at most one of
//! them ever holds it and that the revision counts exactly the commits.

use crate::fixtures::TestEnv;
use savesync_core::{CoreError, GameId, UserId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Operations refused because the game was leased.
    pub conflicted_ops: usize,
    /// Operations that failed for another reason.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, conflicted: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + conflicted + failed,
            successful_ops: successful,
            conflicted_ops: conflicted,
            failed_ops: failed,
            duration,
        }
    }

    /// Operations per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Rounds per thread.
    pub rounds: usize,
    /// Size of each uploaded save in bytes.
    pub save_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            rounds: 50,
            save_size: 4096,
        }
    }
}

#[derive(Default)]
struct Counters {
    successful: AtomicUsize,
    conflicted: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record<T>(&self, result: &Result<T, CoreError>) {
        let counter = match result {
            Ok(_) => &self.successful,
            Err(e) if e.is_conflict() => &self.conflicted,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.conflicted.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Races `threads` acquires for the same game, `rounds` times.
///
/// Each round releases the winner's lease before the next starts, so a
/// correct registry yields exactly `rounds` successes.
pub fn stress_lease_contention(
    env: Arc<TestEnv>,
    owner: UserId,
    game_id: GameId,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(config.threads));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let env = Arc::clone(&env);
            let counters = Arc::clone(&counters);
            let barrier = Arc::clone(&barrier);
            let rounds = config.rounds;

            thread::spawn(move || {
                for _ in 0..rounds {
                    barrier.wait();
                    let result = env.coordinator.request_lease(owner, game_id);
                    counters.record(&result);
                    barrier.wait();
                    if let Ok(lease) = result {
                        env.coordinator.registry().release(lease.game_id);
                    }
                    barrier.wait();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }
    counters.finish(start)
}

/// Has every thread upload to the same game until each committed `rounds`
/// saves, retrying on lease conflicts.
pub fn stress_concurrent_uploads(
    env: Arc<TestEnv>,
    owner: UserId,
    game_id: GameId,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Arc::new(Counters::default());
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let env = Arc::clone(&env);
            let counters = Arc::clone(&counters);
            let rounds = config.rounds;
            let data = vec![t as u8; config.save_size];

            thread::spawn(move || {
                let mut committed = 0;
                while committed < rounds {
                    let result = env.upload(owner, game_id, &data);
                    counters.record(&result);
                    match result {
                        Ok(_) => committed += 1,
                        Err(e) if e.is_conflict() => thread::yield_now(),
                        Err(_) => break,
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }
    counters.finish(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> StressConfig {
        StressConfig {
            threads: 4,
            rounds: 10,
            save_size: 256,
        }
    }

    #[test]
    fn one_winner_per_round() {
        let env = Arc::new(TestEnv::new());
        let game = env.create_game(UserId(1), "contended");
        let config = quick();

        let result = stress_lease_contention(Arc::clone(&env), UserId(1), game.id, &config);
        assert_eq!(result.successful_ops, config.rounds);
        assert_eq!(result.conflicted_ops, config.rounds * (config.threads - 1));
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn revision_counts_every_commit() {
        let env = Arc::new(TestEnv::new());
        let game = env.create_game(UserId(1), "contended");
        let config = quick();

        let result = stress_concurrent_uploads(Arc::clone(&env), UserId(1), game.id, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, config.threads * config.rounds);

        let record = env.game(UserId(1), game.id).record;
        assert_eq!(record.revision.0, (config.threads * config.rounds) as u64);
        assert!(env.coordinator.registry().is_empty());
    }
}
