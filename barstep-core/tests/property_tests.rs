//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. No look-ahead: positive offsets and underflow always fail
//! 2. Readiness: a node is ready exactly at its declared minimum period
//! 3. Resample idempotence: resampling closed bars again changes nothing
//! 4. Replay: stamps never decrease, one close per sub-period
//! 5. OCO consistency: at most one sibling completes, the rest cancel in
//!    the same pass

use barstep_core::broker::{Broker, BrokerConfig};
use barstep_core::domain::{
    Bar, FeedId, OrderRequest, OrderSide, OrderStatus, RunLogEvent, TimeFrame,
};
use barstep_core::feed::{ChannelFeed, StepSnapshot, SyncOutcome, Synchronizer, VecFeed};
use barstep_core::graph::GraphBuilder;
use barstep_core::indicators;
use barstep_core::line::{Line, LineError, SlotChange};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_values() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1_000.0..1_000.0_f64, 1..50)
}

/// Minute bars with random gaps and a random walk in price.
fn arb_minute_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((1i64..4, -2.0..2.0_f64, 0.0..1.5_f64, 1.0..500.0_f64), 1..80).prop_map(
        |steps| {
            let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
            let mut minutes = 0;
            let mut price = 100.0;
            steps
                .into_iter()
                .map(|(gap, change, range, volume)| {
                    minutes += gap;
                    let open = price;
                    price = (price + change).max(1.0);
                    let high = open.max(price) + range;
                    let low = (open.min(price) - range).max(0.5);
                    Bar::new(start + Duration::minutes(minutes), open, high, low, price, volume)
                })
                .collect()
        },
    )
}

fn drain(sync: &mut Synchronizer) -> Vec<StepSnapshot> {
    let mut out = Vec::new();
    while let Ok(SyncOutcome::Step(snapshot)) = sync.advance() {
        out.push(snapshot);
    }
    out
}

fn appended_bars(snaps: &[StepSnapshot], feed: FeedId) -> Vec<Bar> {
    snaps
        .iter()
        .filter_map(|s| s.update(feed))
        .filter(|u| u.change == SlotChange::Appended)
        .filter_map(|u| u.bar)
        .collect()
}

fn resample(bars: Vec<Bar>, source_compression: u32, compression: u32) -> Vec<Bar> {
    let mut sync = Synchronizer::new();
    let feed = VecFeed::new("X", TimeFrame::Minutes, bars).with_compression(source_compression);
    let base = sync.add_feed(Box::new(feed));
    let derived = sync
        .add_resampled(base, TimeFrame::Minutes, compression, None)
        .unwrap();
    appended_bars(&drain(&mut sync), derived)
}

// ── 1. No look-ahead ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn positive_offsets_and_underflow_fail(values in arb_values(), ahead in 1isize..10) {
        let mut line = Line::new("x", FeedId(0), 1);
        for v in &values {
            line.append(*v);
        }
        let len = values.len();
        let is_out_of_range = |r: Result<f64, LineError>| matches!(r, Err(LineError::OutOfRange { .. }));
        prop_assert!(is_out_of_range(line.get(ahead)));
        prop_assert!(is_out_of_range(line.get(-(len as isize))));
        prop_assert_eq!(line.get(0).unwrap(), values[len - 1]);
        prop_assert_eq!(line.get(-(len as isize) + 1).unwrap(), values[0]);
    }
}

// ── 2. Readiness ─────────────────────────────────────────────────────

proptest! {
    /// EMA(q) of SMA(p) is ready after exactly p + q - 1 steps.
    #[test]
    fn chained_node_ready_at_min_period(
        values in prop::collection::vec(1.0..100.0_f64, 1..40),
        p in 1usize..8,
        q in 1usize..8,
    ) {
        let mut builder = GraphBuilder::new();
        let close = builder.store_mut().add("close", FeedId(0), 1);
        let sma = indicators::sma(&mut builder, close, p).unwrap();
        let ema = indicators::ema(&mut builder, sma, q).unwrap();
        let (mut graph, mut store) = builder.build().unwrap();
        let min_period = p + q - 1;

        for (i, v) in values.iter().enumerate() {
            store.get_mut(close).unwrap().append(*v);
            graph.recompute(&mut store, &[SlotChange::Appended]).unwrap();
            let line = store.get(ema).unwrap();
            prop_assert_eq!(line.is_ready(), i + 1 >= min_period);
            prop_assert_eq!(line.get(0).unwrap().is_nan(), i + 1 < min_period);
        }
    }
}

// ── 3. Resample idempotence ──────────────────────────────────────────

proptest! {
    #[test]
    fn resampling_closed_bars_again_is_identity(bars in arb_minute_bars(), compression in 2u32..15) {
        let once = resample(bars, 1, compression);
        let twice = resample(once.clone(), compression, compression);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn resampled_volume_is_conserved(bars in arb_minute_bars(), compression in 2u32..15) {
        let total: f64 = bars.iter().map(|b| b.volume).sum();
        let resampled: f64 = resample(bars, 1, compression).iter().map(|b| b.volume).sum();
        prop_assert!((total - resampled).abs() < 1e-6 * total.max(1.0));
    }
}

// ── 4. Replay ────────────────────────────────────────────────────────

/// Checks one replayed feed across every step: stamps never go back, each
/// opened slot is marked closed exactly once, and a new slot only follows a
/// closed one. A close may arrive on a carried step (live sources).
fn check_replay(snaps: &[StepSnapshot], replay: FeedId) -> Result<(), TestCaseError> {
    let mut stamps = Vec::new();
    let (mut opened, mut closes) = (0, 0);
    let mut prev_closed = true;
    for u in snaps.iter().filter_map(|s| s.update(replay)) {
        if u.change == SlotChange::Carried {
            if u.closed && !prev_closed {
                closes += 1;
            }
        } else {
            if u.change == SlotChange::Appended {
                prop_assert!(prev_closed, "new slot over an open one");
                opened += 1;
            }
            closes += usize::from(u.closed);
            stamps.extend(u.bar.map(|b| b.timestamp));
        }
        prev_closed = u.closed;
    }
    prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    prop_assert_eq!(opened, closes);
    prop_assert!(prev_closed);
    Ok(())
}

proptest! {
    #[test]
    fn replay_stamps_monotonic_and_closes_once(bars in arb_minute_bars(), compression in 2u32..15) {
        let mut sync = Synchronizer::new();
        let base = sync.add_feed(Box::new(VecFeed::new("X", TimeFrame::Minutes, bars)));
        let replay = sync.add_replayed(base, TimeFrame::Minutes, compression, None).unwrap();
        check_replay(&drain(&mut sync), replay)?;
    }

    #[test]
    fn live_replay_stamps_monotonic_and_closes_once(bars in arb_minute_bars(), compression in 2u32..15) {
        let mut sync = Synchronizer::new();
        let (tx, live) = ChannelFeed::channel("X", TimeFrame::Minutes, std::time::Duration::from_millis(1));
        let base = sync.add_feed(Box::new(live));
        let replay = sync.add_replayed(base, TimeFrame::Minutes, compression, None).unwrap();
        for bar in &bars {
            tx.send(*bar).unwrap();
        }
        drop(tx);
        check_replay(&drain(&mut sync), replay)?;
    }
}

// ── 5. OCO consistency ───────────────────────────────────────────────

proptest! {
    #[test]
    fn oco_completes_at_most_one(bars in arb_minute_bars(), below in 1.0..10.0_f64, above in 1.0..10.0_f64) {
        let mut broker = Broker::new(BrokerConfig {
            leverage: 10.0,
            ..BrokerConfig::default()
        });
        let first = bars[0];
        let ids = broker
            .submit_oco(
                &[
                    OrderRequest::limit("X", OrderSide::Buy, 1.0, first.close - below),
                    OrderRequest::stop("X", OrderSide::Buy, 1.0, first.close + above),
                    OrderRequest::limit("X", OrderSide::Sell, 1.0, first.close + above),
                ],
                0,
                first.timestamp,
                1,
            )
            .unwrap();

        for (step, bar) in bars.iter().enumerate().skip(1) {
            broker.process(step, bar.timestamp, &[("X".to_string(), *bar)]).unwrap();
        }

        let statuses: Vec<OrderStatus> = ids.iter().map(|id| broker.order(*id).unwrap().status).collect();
        let completed = statuses.iter().filter(|s| **s == OrderStatus::Completed).count();
        prop_assert!(completed <= 1);

        if completed == 1 {
            prop_assert!(statuses.iter().all(|s| matches!(s, OrderStatus::Completed | OrderStatus::Canceled)));
            let fill_step = broker.fills()[0].step;
            for entry in broker.run_log() {
                if let RunLogEvent::Transition { to: OrderStatus::Canceled, .. } = entry.event {
                    prop_assert_eq!(entry.step, fill_step);
                }
            }
        }
    }
}
