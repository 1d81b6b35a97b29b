//! Node operations.
//!
//! Each [`Operation`] declares its arity, output names and the extra
//! lookback it needs on top of its inputs' minimum periods. Evaluation only
//! happens once a node is ready, so every `evaluate` can assume its input
//! windows are fully populated; a `NaN` found there is reported as an error
//! instead of being silently propagated.
//!
//! Stateful operations (EMA, RSI, cumulative sums and VWAPs) carry an
//! [`OpState`] that the graph commits on every appended slot and restores
//! before an in-place update.

use crate::line::Line;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Comparison used by [`Operation::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            Comparison::Gt => a > b,
            Comparison::Ge => a >= b,
            Comparison::Lt => a < b,
            Comparison::Le => a <= b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    // ── Window ──
    Sma { period: usize },
    Wma { period: usize },
    Highest { period: usize },
    Lowest { period: usize },
    SumN { period: usize },
    /// Population standard deviation.
    StdDev { period: usize },
    Momentum { period: usize },
    RateOfChange { period: usize },
    Delay { period: usize },

    // ── Recursive ──
    /// Seeded with the SMA of the first `period` values.
    Ema { period: usize },
    /// Wilder-smoothed RSI.
    Rsi { period: usize },
    /// Running sum since the node became ready.
    Accum,

    // ── Multi-output ──
    /// Outputs `mid`, `top`, `bot`.
    Bollinger { period: usize, dev_factor: f64 },

    // ── Volume-weighted (inputs: [high, low, close, volume]) ──
    Vwap,
    /// Inputs: [datetime, high, low, close, volume]. Resets at `session_start`
    /// (UTC wall time) each day, or at UTC midnight when unset.
    SessionVwap {
        #[serde(default)]
        session_start: Option<NaiveTime>,
    },
    RollingVwap { period: usize },

    // ── Arithmetic / logic ──
    Add,
    Sub,
    Mul,
    /// Division by zero is a computation error.
    Div,
    /// Division by zero yields `fallback`.
    SafeDiv { fallback: f64 },
    Scale { factor: f64 },
    Compare { cmp: Comparison },
    And,
    Or,
    /// +1 when the first input crosses above the second, -1 below, else 0.
    CrossOver,
}

/// Mutable per-node state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OpState {
    #[default]
    Stateless,
    Ema {
        prev: Option<f64>,
    },
    Rsi {
        avg_gain: f64,
        avg_loss: f64,
        seeded: bool,
    },
    Accum {
        total: f64,
    },
    Vwap {
        pv: f64,
        volume: f64,
        day: Option<i64>,
    },
}

const SECONDS_PER_DAY: f64 = 86_400.0;

impl Operation {
    /// Short name used for output line names.
    pub fn name(&self) -> String {
        match self {
            Operation::Sma { period } => format!("sma_{period}"),
            Operation::Wma { period } => format!("wma_{period}"),
            Operation::Highest { period } => format!("highest_{period}"),
            Operation::Lowest { period } => format!("lowest_{period}"),
            Operation::SumN { period } => format!("sum_{period}"),
            Operation::StdDev { period } => format!("stddev_{period}"),
            Operation::Momentum { period } => format!("momentum_{period}"),
            Operation::RateOfChange { period } => format!("roc_{period}"),
            Operation::Delay { period } => format!("delay_{period}"),
            Operation::Ema { period } => format!("ema_{period}"),
            Operation::Rsi { period } => format!("rsi_{period}"),
            Operation::Accum => "accum".into(),
            Operation::Bollinger { period, dev_factor } => format!("bollinger_{period}_{dev_factor}"),
            Operation::Vwap => "vwap".into(),
            Operation::SessionVwap { session_start: None } => "session_vwap".into(),
            Operation::SessionVwap {
                session_start: Some(start),
            } => format!("session_vwap({})", start.format("%H:%M")),
            Operation::RollingVwap { period } => format!("vwap_{period}"),
            Operation::Add => "add".into(),
            Operation::Sub => "sub".into(),
            Operation::Mul => "mul".into(),
            Operation::Div => "div".into(),
            Operation::SafeDiv { .. } => "safe_div".into(),
            Operation::Scale { factor } => format!("scale_{factor}"),
            Operation::Compare { cmp } => format!("cmp_{cmp:?}").to_lowercase(),
            Operation::And => "and".into(),
            Operation::Or => "or".into(),
            Operation::CrossOver => "crossover".into(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Operation::Vwap | Operation::RollingVwap { .. } => 4,
            Operation::SessionVwap { .. } => 5,
            Operation::Add
            | Operation::Sub
            | Operation::Mul
            | Operation::Div
            | Operation::SafeDiv { .. }
            | Operation::Compare { .. }
            | Operation::And
            | Operation::Or
            | Operation::CrossOver => 2,
            _ => 1,
        }
    }

    /// Names of the output lines, in output order.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Operation::Bollinger { .. } => &["mid", "top", "bot"],
            _ => &["value"],
        }
    }

    /// Slots needed beyond the inputs' own minimum period.
    pub fn extra_lookback(&self) -> usize {
        match *self {
            Operation::Sma { period }
            | Operation::Wma { period }
            | Operation::Highest { period }
            | Operation::Lowest { period }
            | Operation::SumN { period }
            | Operation::StdDev { period }
            | Operation::Ema { period }
            | Operation::Bollinger { period, .. }
            | Operation::RollingVwap { period } => period.saturating_sub(1),
            Operation::Momentum { period }
            | Operation::RateOfChange { period }
            | Operation::Delay { period }
            | Operation::Rsi { period } => period,
            Operation::CrossOver => 1,
            _ => 0,
        }
    }

    /// Reason the parameters are unusable, if any.
    pub fn invalid_reason(&self) -> Option<String> {
        match *self {
            Operation::Sma { period }
            | Operation::Wma { period }
            | Operation::Highest { period }
            | Operation::Lowest { period }
            | Operation::SumN { period }
            | Operation::StdDev { period }
            | Operation::Momentum { period }
            | Operation::RateOfChange { period }
            | Operation::Delay { period }
            | Operation::Ema { period }
            | Operation::Rsi { period }
            | Operation::RollingVwap { period }
                if period == 0 =>
            {
                Some("period must be >= 1".into())
            }
            Operation::Bollinger { period, dev_factor } => {
                if period == 0 {
                    Some("period must be >= 1".into())
                } else if !dev_factor.is_finite() || dev_factor < 0.0 {
                    Some(format!("invalid deviation factor {dev_factor}"))
                } else {
                    None
                }
            }
            Operation::Scale { factor } if !factor.is_finite() => {
                Some(format!("invalid factor {factor}"))
            }
            _ => None,
        }
    }

    pub fn initial_state(&self) -> OpState {
        match self {
            Operation::Ema { .. } => OpState::Ema { prev: None },
            Operation::Rsi { .. } => OpState::Rsi {
                avg_gain: 0.0,
                avg_loss: 0.0,
                seeded: false,
            },
            Operation::Accum => OpState::Accum { total: 0.0 },
            Operation::Vwap | Operation::SessionVwap { .. } => OpState::Vwap {
                pv: 0.0,
                volume: 0.0,
                day: None,
            },
            _ => OpState::Stateless,
        }
    }

    /// Compute the current slot of every output into `out`.
    pub fn evaluate(
        &self,
        inputs: &[&Line],
        state: &mut OpState,
        out: &mut [f64],
    ) -> Result<(), String> {
        match *self {
            Operation::Sma { period } => {
                let w = window(inputs[0], period)?;
                out[0] = mean(w);
            }
            Operation::Wma { period } => {
                let w = window(inputs[0], period)?;
                let denom = (period * (period + 1)) as f64 / 2.0;
                let weighted: f64 = w
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v * (i + 1) as f64)
                    .sum();
                out[0] = weighted / denom;
            }
            Operation::Highest { period } => {
                out[0] = window(inputs[0], period)?
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
            }
            Operation::Lowest { period } => {
                out[0] = window(inputs[0], period)?
                    .iter()
                    .copied()
                    .fold(f64::INFINITY, f64::min);
            }
            Operation::SumN { period } => {
                out[0] = window(inputs[0], period)?.iter().sum();
            }
            Operation::StdDev { period } => {
                out[0] = pop_std(window(inputs[0], period)?);
            }
            Operation::Momentum { period } => {
                out[0] = value(inputs[0], 0)? - value(inputs[0], -(period as isize))?;
            }
            Operation::RateOfChange { period } => {
                let base = value(inputs[0], -(period as isize))?;
                if base == 0.0 {
                    return Err(format!("rate of change base is zero {period} slots back"));
                }
                out[0] = (value(inputs[0], 0)? - base) / base;
            }
            Operation::Delay { period } => {
                out[0] = value(inputs[0], -(period as isize))?;
            }
            Operation::Ema { period } => {
                let OpState::Ema { prev } = state else {
                    return Err("state mismatch".into());
                };
                let next = match *prev {
                    None => mean(window(inputs[0], period)?),
                    Some(p) => {
                        let alpha = 2.0 / (period as f64 + 1.0);
                        p + alpha * (value(inputs[0], 0)? - p)
                    }
                };
                *prev = Some(next);
                out[0] = next;
            }
            Operation::Rsi { period } => {
                let OpState::Rsi {
                    avg_gain,
                    avg_loss,
                    seeded,
                } = state
                else {
                    return Err("state mismatch".into());
                };
                if *seeded {
                    let change = value(inputs[0], 0)? - value(inputs[0], -1)?;
                    let n = period as f64;
                    *avg_gain = (*avg_gain * (n - 1.0) + change.max(0.0)) / n;
                    *avg_loss = (*avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
                } else {
                    let w = window(inputs[0], period + 1)?;
                    let (gain, loss) = w.windows(2).fold((0.0, 0.0), |(g, l), pair| {
                        let change = pair[1] - pair[0];
                        (g + change.max(0.0), l + (-change).max(0.0))
                    });
                    *avg_gain = gain / period as f64;
                    *avg_loss = loss / period as f64;
                    *seeded = true;
                }
                out[0] = rsi_from(*avg_gain, *avg_loss);
            }
            Operation::Accum => {
                let OpState::Accum { total } = state else {
                    return Err("state mismatch".into());
                };
                *total += value(inputs[0], 0)?;
                out[0] = *total;
            }
            Operation::Bollinger { period, dev_factor } => {
                let w = window(inputs[0], period)?;
                let mid = mean(w);
                let dev = dev_factor * pop_std(w);
                out[0] = mid;
                out[1] = mid + dev;
                out[2] = mid - dev;
            }
            Operation::Vwap | Operation::SessionVwap { .. } => {
                let OpState::Vwap { pv, volume, day } = state else {
                    return Err("state mismatch".into());
                };
                let ohlv = if let Operation::SessionVwap { session_start } = self {
                    let offset = session_start
                        .map(|t| f64::from(t.num_seconds_from_midnight()))
                        .unwrap_or(0.0);
                    let session = ((value(inputs[0], 0)? - offset) / SECONDS_PER_DAY).floor() as i64;
                    if *day != Some(session) {
                        *day = Some(session);
                        *pv = 0.0;
                        *volume = 0.0;
                    }
                    &inputs[1..]
                } else {
                    inputs
                };
                let tp = typical(ohlv, 0)?;
                let vol = value(ohlv[3], 0)?;
                *pv += tp * vol;
                *volume += vol;
                out[0] = if *volume > 0.0 { *pv / *volume } else { tp };
            }
            Operation::RollingVwap { period } => {
                let mut pv = 0.0;
                let mut vol = 0.0;
                for ago in 0..period as isize {
                    let v = value(inputs[3], -ago)?;
                    pv += typical(inputs, -ago)? * v;
                    vol += v;
                }
                out[0] = if vol > 0.0 { pv / vol } else { typical(inputs, 0)? };
            }
            Operation::Add => out[0] = value(inputs[0], 0)? + value(inputs[1], 0)?,
            Operation::Sub => out[0] = value(inputs[0], 0)? - value(inputs[1], 0)?,
            Operation::Mul => out[0] = value(inputs[0], 0)? * value(inputs[1], 0)?,
            Operation::Div => {
                let divisor = value(inputs[1], 0)?;
                if divisor == 0.0 {
                    return Err(format!("division by zero ({} / 0)", inputs[1].name()));
                }
                out[0] = value(inputs[0], 0)? / divisor;
            }
            Operation::SafeDiv { fallback } => {
                let divisor = value(inputs[1], 0)?;
                out[0] = if divisor == 0.0 {
                    fallback
                } else {
                    value(inputs[0], 0)? / divisor
                };
            }
            Operation::Scale { factor } => out[0] = value(inputs[0], 0)? * factor,
            Operation::Compare { cmp } => {
                out[0] = flag(cmp.apply(value(inputs[0], 0)?, value(inputs[1], 0)?));
            }
            Operation::And => {
                out[0] = flag(value(inputs[0], 0)? != 0.0 && value(inputs[1], 0)? != 0.0);
            }
            Operation::Or => {
                out[0] = flag(value(inputs[0], 0)? != 0.0 || value(inputs[1], 0)? != 0.0);
            }
            Operation::CrossOver => {
                let prev = value(inputs[0], -1)? - value(inputs[1], -1)?;
                let now = value(inputs[0], 0)? - value(inputs[1], 0)?;
                out[0] = if prev <= 0.0 && now > 0.0 {
                    1.0
                } else if prev >= 0.0 && now < 0.0 {
                    -1.0
                } else {
                    0.0
                };
            }
        }
        Ok(())
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn value(line: &Line, ago: isize) -> Result<f64, String> {
    let v = line.get(ago).map_err(|e| e.to_string())?;
    if v.is_nan() {
        return Err(format!("input '{}' is unset at offset {ago}", line.name()));
    }
    Ok(v)
}

fn window(line: &Line, n: usize) -> Result<&[f64], String> {
    let w = line.window(n).map_err(|e| e.to_string())?;
    if w.iter().any(|v| v.is_nan()) {
        return Err(format!("input '{}' has unset values in its last {n} slots", line.name()));
    }
    Ok(w)
}

/// Typical price from `[high, low, close, ..]` inputs.
fn typical(hlc: &[&Line], ago: isize) -> Result<f64, String> {
    Ok((value(hlc[0], ago)? + value(hlc[1], ago)? + value(hlc[2], ago)?) / 3.0)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn pop_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeedId;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    fn line(values: &[f64]) -> Line {
        let mut l = Line::new("x", FeedId(0), 1);
        for v in values {
            l.append(*v);
        }
        l
    }

    fn eval(op: &Operation, inputs: &[&Line], state: &mut OpState) -> Result<Vec<f64>, String> {
        let mut out = vec![f64::NAN; op.outputs().len()];
        op.evaluate(inputs, state, &mut out)?;
        Ok(out)
    }

    #[test]
    fn sma_of_window() {
        let x = line(&[1.0, 2.0, 3.0, 4.0]);
        let op = Operation::Sma { period: 3 };
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn wma_weights_recent_values_more() {
        let x = line(&[1.0, 2.0, 3.0]);
        let op = Operation::Wma { period: 3 };
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        // (1*1 + 2*2 + 3*3) / 6
        assert_approx(out[0], 14.0 / 6.0, DEFAULT_EPSILON);
    }

    #[test]
    fn stddev_is_population() {
        let x = line(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let op = Operation::StdDev { period: 8 };
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 2.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_seeds_with_sma_then_recurses() {
        let op = Operation::Ema { period: 3 };
        let mut state = op.initial_state();
        let x = line(&[1.0, 2.0, 3.0]);
        let out = eval(&op, &[&x], &mut state).unwrap();
        assert_approx(out[0], 2.0, DEFAULT_EPSILON);
        let x = line(&[1.0, 2.0, 3.0, 6.0]);
        let out = eval(&op, &[&x], &mut state).unwrap();
        // alpha = 0.5 → 2 + 0.5 * (6 - 2)
        assert_approx(out[0], 4.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_all_gains_is_hundred() {
        let op = Operation::Rsi { period: 3 };
        let x = line(&[1.0, 2.0, 3.0, 4.0]);
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_mixed_changes() {
        let op = Operation::Rsi { period: 2 };
        let x = line(&[10.0, 12.0, 11.0]);
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        // avg gain 1, avg loss 0.5 → rs 2 → 66.67
        assert_approx(out[0], 100.0 - 100.0 / 3.0, 1e-9);
    }

    #[test]
    fn bollinger_bands() {
        let op = Operation::Bollinger {
            period: 8,
            dev_factor: 2.0,
        };
        let x = line(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let out = eval(&op, &[&x], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 5.0, DEFAULT_EPSILON);
        assert_approx(out[1], 9.0, DEFAULT_EPSILON);
        assert_approx(out[2], 1.0, DEFAULT_EPSILON);
    }

    #[test]
    fn div_by_zero_fails_and_safe_div_falls_back() {
        let a = line(&[1.0]);
        let b = line(&[0.0]);
        assert!(eval(&Operation::Div, &[&a, &b], &mut OpState::Stateless).is_err());
        let safe = Operation::SafeDiv { fallback: -1.0 };
        let out = eval(&safe, &[&a, &b], &mut OpState::Stateless).unwrap();
        assert_eq!(out[0], -1.0);
    }

    #[test]
    fn unset_input_fails_loudly() {
        let x = line(&[1.0, f64::NAN]);
        let op = Operation::Sma { period: 2 };
        assert!(eval(&op, &[&x], &mut op.initial_state()).is_err());
    }

    #[test]
    fn crossover_detects_both_directions() {
        let a = line(&[1.0, 3.0]);
        let b = line(&[2.0, 2.0]);
        let out = eval(&Operation::CrossOver, &[&a, &b], &mut OpState::Stateless).unwrap();
        assert_eq!(out[0], 1.0);
        let out = eval(&Operation::CrossOver, &[&b, &a], &mut OpState::Stateless).unwrap();
        assert_eq!(out[0], -1.0);
    }

    #[test]
    fn vwap_falls_back_to_typical_price_without_volume() {
        let h = line(&[12.0]);
        let l = line(&[9.0]);
        let c = line(&[10.5]);
        let v = line(&[0.0]);
        let op = Operation::Vwap;
        let out = eval(&op, &[&h, &l, &c, &v], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 10.5, DEFAULT_EPSILON);
    }

    #[test]
    fn session_vwap_resets_on_new_day() {
        let op = Operation::SessionVwap {
            session_start: None,
        };
        let mut state = op.initial_state();
        let day1 = line(&[3_600.0]);
        let (h, l, c, v) = (line(&[10.0]), line(&[10.0]), line(&[10.0]), line(&[100.0]));
        eval(&op, &[&day1, &h, &l, &c, &v], &mut state).unwrap();
        let day2 = line(&[3_600.0, 90_000.0]);
        let (h, l, c, v) = (
            line(&[10.0, 20.0]),
            line(&[10.0, 20.0]),
            line(&[10.0, 20.0]),
            line(&[100.0, 50.0]),
        );
        let out = eval(&op, &[&day2, &h, &l, &c, &v], &mut state).unwrap();
        assert_approx(out[0], 20.0, DEFAULT_EPSILON);
    }

    #[test]
    fn session_vwap_resets_at_configured_open() {
        let op = Operation::SessionVwap {
            session_start: NaiveTime::from_hms_opt(9, 30, 0),
        };
        assert_eq!(op.name(), "session_vwap(09:30)");
        let mut state = op.initial_state();
        // 09:29, 09:30 and 09:31 on the same UTC day.
        let stamps = [34_140.0, 34_200.0, 34_260.0];
        let prices = [10.0, 20.0, 30.0];
        let mut outs = Vec::new();
        for n in 1..=3 {
            let dt = line(&stamps[..n]);
            let px = line(&prices[..n]);
            let v = line(&[100.0; 3][..n]);
            let out = eval(&op, &[&dt, &px, &px, &px, &v], &mut state).unwrap();
            outs.push(out[0]);
        }
        assert_approx(outs[0], 10.0, DEFAULT_EPSILON);
        // The 09:30 bar opens a fresh session.
        assert_approx(outs[1], 20.0, DEFAULT_EPSILON);
        assert_approx(outs[2], 25.0, DEFAULT_EPSILON);
    }

    #[test]
    fn session_start_round_trips_through_serde() {
        let op: Operation =
            serde_json::from_str(r#"{"op":"session_vwap","session_start":"09:30:00"}"#).unwrap();
        assert_eq!(
            op,
            Operation::SessionVwap {
                session_start: NaiveTime::from_hms_opt(9, 30, 0)
            }
        );
        let bare: Operation = serde_json::from_str(r#"{"op":"session_vwap"}"#).unwrap();
        assert_eq!(bare, Operation::SessionVwap { session_start: None });
    }

    #[test]
    fn rolling_vwap_weights_by_volume() {
        let op = Operation::RollingVwap { period: 2 };
        let h = line(&[10.0, 20.0]);
        let v = line(&[1.0, 3.0]);
        let out = eval(&op, &[&h, &h, &h, &v], &mut op.initial_state()).unwrap();
        assert_approx(out[0], 17.5, DEFAULT_EPSILON);
    }

    #[test]
    fn invalid_parameters() {
        assert!(Operation::Sma { period: 0 }.invalid_reason().is_some());
        assert!(Operation::Bollinger {
            period: 20,
            dev_factor: f64::NAN
        }
        .invalid_reason()
        .is_some());
        assert!(Operation::Ema { period: 5 }.invalid_reason().is_none());
    }

    #[test]
    fn lookbacks() {
        assert_eq!(Operation::Sma { period: 20 }.extra_lookback(), 19);
        assert_eq!(Operation::Rsi { period: 14 }.extra_lookback(), 14);
        assert_eq!(Operation::CrossOver.extra_lookback(), 1);
        assert_eq!(Operation::Add.extra_lookback(), 0);
    }
}
