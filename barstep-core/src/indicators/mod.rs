//! Indicator helpers — common indicator shapes declared as graph nodes.
//!
//! Each helper adds one or more nodes to a [`GraphBuilder`] and returns the
//! output line ids. Composite indicators (MACD, moving-average crosses) are
//! plain compositions of single operations, so their minimum periods fall
//! out of the graph's ordinary propagation.

use crate::domain::LineId;
use crate::feed::FeedLines;
use crate::graph::{Comparison, GraphBuilder, GraphError, Operation};
use chrono::NaiveTime;

fn single(b: &mut GraphBuilder, op: Operation, inputs: &[LineId]) -> Result<LineId, GraphError> {
    Ok(b.add(op, inputs)?.line())
}

pub fn sma(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Sma { period }, &[src])
}

pub fn wma(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Wma { period }, &[src])
}

/// Exponential moving average seeded with the simple average of the first
/// `period` values.
pub fn ema(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Ema { period }, &[src])
}

/// Wilder RSI on a 0..100 scale.
pub fn rsi(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Rsi { period }, &[src])
}

pub fn highest(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Highest { period }, &[src])
}

pub fn lowest(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Lowest { period }, &[src])
}

pub fn stddev(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::StdDev { period }, &[src])
}

pub fn momentum(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::Momentum { period }, &[src])
}

pub fn roc(b: &mut GraphBuilder, src: LineId, period: usize) -> Result<LineId, GraphError> {
    single(b, Operation::RateOfChange { period }, &[src])
}

/// +1 when `fast` crosses above `slow`, -1 when it crosses below, else 0.
pub fn crossover(b: &mut GraphBuilder, fast: LineId, slow: LineId) -> Result<LineId, GraphError> {
    single(b, Operation::CrossOver, &[fast, slow])
}

/// 1.0 where `a > b`, else 0.0.
pub fn greater(b: &mut GraphBuilder, a: LineId, other: LineId) -> Result<LineId, GraphError> {
    single(b, Operation::Compare { cmp: Comparison::Gt }, &[a, other])
}

/// Cumulative VWAP over the whole feed.
pub fn vwap(b: &mut GraphBuilder, feed: &FeedLines) -> Result<LineId, GraphError> {
    single(b, Operation::Vwap, &feed.hlcv())
}

/// VWAP that restarts each day at `session_start`, or at UTC midnight when `None`.
pub fn session_vwap(
    b: &mut GraphBuilder,
    feed: &FeedLines,
    session_start: Option<NaiveTime>,
) -> Result<LineId, GraphError> {
    let [h, l, c, v] = feed.hlcv();
    single(
        b,
        Operation::SessionVwap { session_start },
        &[feed.datetime, h, l, c, v],
    )
}

pub fn rolling_vwap(
    b: &mut GraphBuilder,
    feed: &FeedLines,
    period: usize,
) -> Result<LineId, GraphError> {
    single(b, Operation::RollingVwap { period }, &feed.hlcv())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerLines {
    pub mid: LineId,
    pub top: LineId,
    pub bot: LineId,
}

pub fn bollinger(
    b: &mut GraphBuilder,
    src: LineId,
    period: usize,
    dev_factor: f64,
) -> Result<BollingerLines, GraphError> {
    let handle = b.add(Operation::Bollinger { period, dev_factor }, &[src])?;
    match handle.outputs.as_slice() {
        &[mid, top, bot] => Ok(BollingerLines { mid, top, bot }),
        other => Err(GraphError::Arity {
            op: "bollinger".into(),
            expected: 3,
            got: other.len(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacdLines {
    pub macd: LineId,
    pub signal: LineId,
    pub histogram: LineId,
}

/// MACD: `ema(fast) - ema(slow)`, its EMA signal line, and the difference.
pub fn macd(
    b: &mut GraphBuilder,
    src: LineId,
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<MacdLines, GraphError> {
    if fast >= slow {
        return Err(GraphError::InvalidParameter {
            op: "macd".into(),
            reason: format!("fast period {fast} must be below slow period {slow}"),
        });
    }
    let fast_ema = ema(b, src, fast)?;
    let slow_ema = ema(b, src, slow)?;
    let macd = single(b, Operation::Sub, &[fast_ema, slow_ema])?;
    let signal = ema(b, macd, signal)?;
    let histogram = single(b, Operation::Sub, &[macd, signal])?;
    Ok(MacdLines {
        macd,
        signal,
        histogram,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaCross {
    pub fast: LineId,
    pub slow: LineId,
    pub cross: LineId,
}

/// Two simple moving averages and their crossover signal.
pub fn ma_cross(
    b: &mut GraphBuilder,
    src: LineId,
    fast: usize,
    slow: usize,
) -> Result<MaCross, GraphError> {
    let fast = sma(b, src, fast)?;
    let slow = sma(b, src, slow)?;
    let cross = crossover(b, fast, slow)?;
    Ok(MaCross { fast, slow, cross })
}

/// Create synthetic daily bars from close prices for testing.
///
/// open = previous close (or close for the first bar),
/// high = max(open, close) + 1, low = min(open, close) - 1, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<crate::domain::Bar> {
    use crate::domain::Bar;
    use chrono::{Duration, TimeZone, Utc};
    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar::new(
                base + Duration::days(i as i64),
                open,
                open.max(close) + 1.0,
                open.min(close) - 1.0,
                close,
                1_000.0,
            )
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
