//! Synthetic bars — a seeded geometric random walk.
//!
//! Useful for demos, sweeps and tests that should not depend on files.
//! The same seed always yields the same bars.

use barstep_core::domain::{Bar, TimeFrame};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub bars: usize,
    pub seed: u64,
    pub start_price: f64,
    pub volatility: f64,
    pub timeframe: TimeFrame,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            bars: 252,
            seed: 0,
            start_price: 100.0,
            volatility: 0.01,
            timeframe: TimeFrame::Days,
        }
    }
}

fn first_stamp(timeframe: TimeFrame) -> DateTime<Utc> {
    let (hour, minute) = if timeframe.is_intraday() || timeframe == TimeFrame::Ticks {
        (9, 30)
    } else {
        (0, 0)
    };
    Utc.with_ymd_and_hms(2020, 1, 2, hour, minute, 0)
        .single()
        .unwrap_or_default()
}

fn bar_span(timeframe: TimeFrame) -> Duration {
    match timeframe {
        TimeFrame::Ticks => Duration::seconds(1),
        TimeFrame::Seconds | TimeFrame::Minutes => {
            Duration::seconds(timeframe.unit_seconds().unwrap_or(1))
        }
        TimeFrame::Days => Duration::days(1),
        TimeFrame::Weeks => Duration::weeks(1),
        TimeFrame::Months => Duration::days(30),
        TimeFrame::Years => Duration::days(365),
    }
}

/// Generate `params.bars` bars. Prices stay strictly positive.
pub fn generate(params: &SyntheticParams) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let start = first_stamp(params.timeframe);
    let span = bar_span(params.timeframe);
    let mut close = params.start_price.max(0.01);

    (0..params.bars)
        .map(|i| {
            let open = close;
            // Uniform on [-sqrt(3), sqrt(3)] has unit variance.
            let shock: f64 = rng.gen_range(-1.0..=1.0) * 3f64.sqrt() * params.volatility;
            close = (open * (1.0 + shock)).max(0.01);
            let wick_up: f64 = rng.gen_range(0.0..=1.0) * params.volatility * open;
            let wick_down: f64 = rng.gen_range(0.0..=1.0) * params.volatility * open;
            let high = open.max(close) + wick_up;
            let low = (open.min(close) - wick_down).max(0.005);
            let volume = rng.gen_range(5_000.0..50_000.0_f64).round();
            let stamp = start + span * (i as i32 + 1);
            Bar::new(stamp, open, high, low, close, volume)
        })
        .collect()
}
