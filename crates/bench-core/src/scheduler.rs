//! Arrival scheduling
//!
//! Releases requests in input order with Gamma-distributed gaps between
//! consecutive releases. The shape parameter is the burstiness factor and the
//! scale is `1 / (rate * burstiness)`, so the mean gap is always `1 / rate`.
//! A burstiness of 1.0 gives a Poisson process; smaller values are burstier.

use crate::config::RequestRate;
use crate::{BenchError, Result};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use std::iter::Enumerate;
use std::time::Duration;
use tokio::time::Instant;

/// A request handed out by the scheduler
#[derive(Debug)]
pub struct Release<T> {
    /// Position in the input sequence
    pub index: usize,
    pub item: T,
    /// Time since the first release
    pub offset: Duration,
}

/// Gaps longer than this (30 years) hold the next item indefinitely
const MAX_WAIT: Duration = Duration::from_secs(86400 * 365 * 30);

/// When the pending item may be released
#[derive(Debug, Clone, Copy)]
enum Deadline {
    Immediate,
    At(Instant),
    /// The sampled gap exceeds `MAX_WAIT`
    Never,
}

/// Releases items at the configured arrival process
pub struct ArrivalScheduler<I: Iterator> {
    items: Enumerate<I>,
    rate: RequestRate,
    burstiness: f64,
    gamma: Option<Gamma<f64>>,
    rng: SmallRng,
    pending: Option<(usize, I::Item)>,
    deadline: Deadline,
    started: Option<Instant>,
}

impl<I: Iterator> ArrivalScheduler<I> {
    /// Create a scheduler over `items`.
    ///
    /// Fails with a configuration error when the burstiness is not strictly
    /// positive or the rate is neither unbounded nor a positive number.
    pub fn new<T>(items: T, rate: RequestRate, burstiness: f64, seed: u64) -> Result<Self>
    where
        T: IntoIterator<IntoIter = I>,
    {
        if !(burstiness.is_finite() && burstiness > 0.0) {
            return Err(BenchError::InvalidBurstiness(burstiness));
        }
        rate.validate()?;

        let gamma = match rate {
            RequestRate::Unbounded => None,
            RequestRate::PerSecond(rps) => {
                let theta = 1.0 / (rps * burstiness);
                let gamma = Gamma::new(burstiness, theta).map_err(|e| {
                    BenchError::config(format!(
                        "cannot build arrival distribution (rate {}, burstiness {}): {}",
                        rps, burstiness, e
                    ))
                })?;
                Some(gamma)
            }
        };

        Ok(Self {
            items: items.into_iter().enumerate(),
            rate,
            burstiness,
            gamma,
            rng: SmallRng::seed_from_u64(seed),
            pending: None,
            deadline: Deadline::Immediate,
            started: None,
        })
    }

    pub fn rate(&self) -> RequestRate {
        self.rate
    }

    pub fn burstiness(&self) -> f64 {
        self.burstiness
    }

    /// Draw the gap that follows a release; `None` when the rate is unbounded.
    ///
    /// Gaps too long for a `Duration` saturate at `Duration::MAX`.
    pub fn sample_interval(&mut self) -> Option<Duration> {
        let gamma = self.gamma.as_ref()?;
        let secs: f64 = gamma.sample(&mut self.rng);
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    /// Wait for and return the next release, or `None` once the input is exhausted.
    ///
    /// The first item is released immediately. Cancel-safe: if the returned
    /// future is dropped while waiting, the item and its deadline are kept for
    /// the next call.
    pub async fn next_release(&mut self) -> Option<Release<I::Item>> {
        if self.pending.is_none() {
            self.pending = self.items.next();
        }
        self.pending.as_ref()?;

        match self.deadline {
            Deadline::Immediate => {}
            Deadline::At(deadline) => tokio::time::sleep_until(deadline).await,
            Deadline::Never => std::future::pending::<()>().await,
        }

        let (index, item) = self.pending.take()?;
        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        self.deadline = match self.sample_interval() {
            None => Deadline::Immediate,
            Some(gap) if gap > MAX_WAIT => Deadline::Never,
            Some(gap) => now.checked_add(gap).map_or(Deadline::Never, Deadline::At),
        };

        Some(Release {
            index,
            item,
            offset: now.duration_since(started),
        })
    }
}
