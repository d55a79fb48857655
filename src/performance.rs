use crate::models::{BehaviorScore, ClosedTrade};
use statrs::statistics::Statistics;

const FUMBLE_BASELINE: f64 = 60.0;
const FUMBLE_SLOPE: f64 = 20.0;
const FUMBLE_MIN: f64 = 0.0;
const FUMBLE_MAX: f64 = 100.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_behavior(trades: &[ClosedTrade]) -> BehaviorScore {
        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.is_win()).count();
        let losing_trades = trades.iter().filter(|t| t.is_loss()).count();

        let win_rate = if total_trades > 0 {
            Some(winning_trades as f64 / total_trades as f64)
        } else {
            None
        };

        let total_pnl = Self::sum_defined(trades.iter().map(|t| t.realized_pnl));
        let total_fees = Self::sum_defined(trades.iter().map(|t| t.fee));

        let win_holds: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_win())
            .filter_map(|t| t.hold_duration_ms)
            .map(|ms| ms as f64)
            .collect();
        let loss_holds: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_loss())
            .filter_map(|t| t.hold_duration_ms)
            .map(|ms| ms as f64)
            .collect();

        let avg_win_hold_ms = Self::mean(&win_holds);
        let avg_loss_hold_ms = Self::mean(&loss_holds);
        let paperhands_ratio = Self::paperhands_ratio(avg_win_hold_ms, avg_loss_hold_ms);
        let fumble_score = paperhands_ratio.and_then(Self::fumble_score);

        BehaviorScore {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            total_fees,
            avg_win_hold_ms,
            avg_loss_hold_ms,
            paperhands_ratio,
            fumble_score,
        }
    }

    pub fn paperhands_ratio(avg_win_hold: Option<f64>, avg_loss_hold: Option<f64>) -> Option<f64> {
        let (win, loss) = (avg_win_hold?, avg_loss_hold?);
        if loss == 0.0 {
            return None;
        }
        Some(win / loss).filter(|ratio| ratio.is_finite())
    }

    /// Maps the paperhands ratio onto [0, 100]: winners held far longer than
    /// losers trend to 0, winners cut far sooner trend to 100.
    pub fn fumble_score(paperhands_ratio: f64) -> Option<f64> {
        if paperhands_ratio == 0.0 {
            return Some(FUMBLE_MAX);
        }
        if paperhands_ratio < 0.0 || !paperhands_ratio.is_finite() {
            return None;
        }
        let raw = FUMBLE_BASELINE - FUMBLE_SLOPE * paperhands_ratio.log2();
        Some(raw.clamp(FUMBLE_MIN, FUMBLE_MAX))
    }

    /// Mean of the finite values; `None` when there are none.
    fn mean(values: &[f64]) -> Option<f64> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        Some(finite.mean())
    }

    fn sum_defined<I>(values: I) -> Option<f64>
    where
        I: Iterator<Item = Option<f64>>,
    {
        values
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
    }
}
