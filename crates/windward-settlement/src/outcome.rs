//! Outcome computation.
//!
//! For each trade the method's leading word implies the direction: an
//! "up…" trade wins for the creator iff exit > entry, a "down…" trade iff
//! exit < entry, and an exact touch is a push (valid but not a win).
//! Cancelled trades are excluded from both tallies. Creator wins on a
//! strict majority of valid trades, filler on a strict minority, and
//! anything else is a tie.

use windward_core::types::{Address, Outcome, Trade};

use crate::prices::ExitPrice;

enum Direction {
    Up,
    Down,
}

fn direction(method: &str) -> Option<Direction> {
    let word = method.split('_').next().unwrap_or(method);
    match word {
        "up" => Some(Direction::Up),
        "down" => Some(Direction::Down),
        _ => None,
    }
}

/// Tally a portfolio against its exit prices. `exit_prices[i]` resolves
/// trade `i`; the caller has already verified completeness.
pub fn compute_outcome(
    trades: &[Trade],
    exit_prices: &[ExitPrice],
    creator: Address,
    filler: Address,
) -> Outcome {
    let mut wins_count = 0u32;
    let mut valid_trades = 0u32;

    for (trade, exit) in trades.iter().zip(exit_prices) {
        let exit = match exit {
            ExitPrice::Price(p) => *p,
            ExitPrice::Cancelled => continue,
        };
        // A method with no recognizable direction cannot resolve either
        // way; treat it like a cancelled market.
        let Some(dir) = direction(&trade.method) else { continue };
        valid_trades += 1;
        let creator_won = match dir {
            Direction::Up => exit > trade.entry_price,
            Direction::Down => exit < trade.entry_price,
        };
        if creator_won {
            wins_count += 1;
        }
    }

    let doubled = wins_count * 2;
    let (winner, is_tie) = if doubled > valid_trades {
        (Some(creator), false)
    } else if doubled < valid_trades {
        (Some(filler), false)
    } else {
        (None, true)
    };

    Outcome { winner, wins_count, valid_trades, is_tie }
}
