// =============================================================================
// Shared account-state parsing guards
// =============================================================================
//
// Both the position poller and the HLP vault tracker parse the same
// `clearinghouseState` position shape; they differ only in which price
// basis they use for `size_usd` (mark price for live trader positions,
// entry price for vault snapshots — see collectors::hlp_tracker).
// =============================================================================

use std::collections::HashSet;

use crate::exchange::client::UserState;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPosition {
    pub coin: String,
    pub side: String, // "long" | "short"
    pub size: f64,
    pub size_usd: f64,
    pub entry_px: f64,
    pub mark_px: f64,
    pub leverage: f64,
    pub margin_used: f64,
    pub liq_px: Option<f64>,
    pub unrealized_pnl: f64,
}

pub enum PriceBasis {
    Mark,
    Entry,
}

/// Parse every position out of a `UserState`, applying the same corruption
/// guards the reference poller uses: zero size or empty coin is skipped;
/// `entry_px <= 0` is skipped as corrupt; leverage outside `[0, 200]` is
/// clamped to `1`; a non-positive liquidation price becomes `None`.
///
/// Returns `(positions, total_size_usd, active_coins)`.
pub fn parse_positions(
    state: &UserState,
    basis: PriceBasis,
) -> (Vec<ParsedPosition>, f64, HashSet<String>) {
    let mut positions = Vec::new();
    let mut total_size = 0.0;
    let mut active_coins = HashSet::new();

    for p in &state.asset_positions {
        let size = p.szi;
        if size == 0.0 || p.coin.is_empty() {
            continue;
        }
        let entry_px = p.entry_px;
        if entry_px <= 0.0 {
            continue;
        }

        let mark_px = if size != 0.0 && p.position_value != 0.0 {
            let m = p.position_value / size.abs();
            if m > 0.0 {
                m
            } else {
                entry_px
            }
        } else {
            entry_px
        };

        let mut leverage = p.leverage;
        if !(0.0..=200.0).contains(&leverage) {
            leverage = 1.0;
        }

        let liq_px = p.liquidation_px.filter(|v| *v > 0.0);

        let size_usd = match basis {
            PriceBasis::Mark => size.abs() * mark_px,
            PriceBasis::Entry => size.abs() * entry_px,
        };

        total_size += size_usd;
        active_coins.insert(p.coin.clone());

        positions.push(ParsedPosition {
            coin: p.coin.clone(),
            side: if size > 0.0 { "long".to_string() } else { "short".to_string() },
            size: size.abs(),
            size_usd,
            entry_px,
            mark_px,
            leverage,
            margin_used: p.margin_used,
            liq_px,
            unrealized_pnl: p.unrealized_pnl,
        });
    }

    (positions, total_size, active_coins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::client::AssetPosition;

    fn state_with(positions: Vec<AssetPosition>) -> UserState {
        UserState {
            margin_summary: Default::default(),
            asset_positions: positions,
        }
    }

    #[test]
    fn skips_zero_size_and_empty_coin() {
        let state = state_with(vec![
            AssetPosition { coin: "BTC".into(), szi: 0.0, entry_px: 100.0, ..Default::default() },
            AssetPosition { coin: "".into(), szi: 1.0, entry_px: 100.0, ..Default::default() },
        ]);
        let (positions, total, coins) = parse_positions(&state, PriceBasis::Mark);
        assert!(positions.is_empty());
        assert_eq!(total, 0.0);
        assert!(coins.is_empty());
    }

    #[test]
    fn skips_corrupt_entry_price() {
        let state = state_with(vec![AssetPosition {
            coin: "ETH".into(),
            szi: 1.0,
            entry_px: 0.0,
            ..Default::default()
        }]);
        let (positions, _, _) = parse_positions(&state, PriceBasis::Mark);
        assert!(positions.is_empty());
    }

    #[test]
    fn clamps_absurd_leverage_and_nulls_bad_liq_px() {
        let state = state_with(vec![AssetPosition {
            coin: "SOL".into(),
            szi: 2.0,
            entry_px: 10.0,
            position_value: 22.0,
            leverage: 500.0,
            liquidation_px: Some(-1.0),
            ..Default::default()
        }]);
        let (positions, _, _) = parse_positions(&state, PriceBasis::Mark);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].leverage, 1.0);
        assert_eq!(positions[0].liq_px, None);
    }

    #[test]
    fn mark_px_falls_back_to_entry_when_position_value_missing() {
        let state = state_with(vec![AssetPosition {
            coin: "BTC".into(),
            szi: 1.0,
            entry_px: 50_000.0,
            position_value: 0.0,
            ..Default::default()
        }]);
        let (positions, total, _) = parse_positions(&state, PriceBasis::Mark);
        assert_eq!(positions[0].mark_px, 50_000.0);
        assert_eq!(total, 50_000.0);
    }

    #[test]
    fn entry_basis_prices_by_entry_not_mark() {
        let state = state_with(vec![AssetPosition {
            coin: "BTC".into(),
            szi: 1.0,
            entry_px: 100.0,
            position_value: 150.0,
            ..Default::default()
        }]);
        let (positions, total, _) = parse_positions(&state, PriceBasis::Entry);
        assert_eq!(positions[0].size_usd, 100.0);
        assert_eq!(total, 100.0);
    }

    #[test]
    fn side_reflects_sign_of_size() {
        let state = state_with(vec![
            AssetPosition { coin: "BTC".into(), szi: 1.0, entry_px: 1.0, ..Default::default() },
            AssetPosition { coin: "ETH".into(), szi: -1.0, entry_px: 1.0, ..Default::default() },
        ]);
        let (positions, _, _) = parse_positions(&state, PriceBasis::Mark);
        assert_eq!(positions[0].side, "long");
        assert_eq!(positions[1].side, "short");
    }
}
