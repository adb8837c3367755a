use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The action the desk settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    const MARKER: &'static str = "FINAL DECISION:";

    /// Scan free text for a `FINAL DECISION: <ACTION>` marker (case-insensitive).
    ///
    /// The last marker wins, so a closing verdict overrides one quoted earlier in
    /// the text. Returns `None` when no marker names a known action.
    pub fn from_marker(text: &str) -> Option<TradeAction> {
        let upper = text.to_ascii_uppercase();
        let mut found = None;
        let mut rest = upper.as_str();
        while let Some(pos) = rest.find(Self::MARKER) {
            let after = &rest[pos + Self::MARKER.len()..];
            let word: String = after
                .trim_start_matches(|c: char| c.is_whitespace() || c == '*')
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect();
            if let Ok(action) = word.parse() {
                found = Some(action);
            }
            rest = after;
        }
        found
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" => Ok(Self::Hold),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

/// Position sizing guard rails attached to a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingParams {
    pub symbol: String,
    /// Maximum position size as % of portfolio.
    pub max_position_size_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl TradingParams {
    /// Default guard rails for a symbol. Majors get larger positions and tighter
    /// stops; meme coins get smaller positions and wider bands.
    pub fn for_symbol(symbol: &str) -> Self {
        let symbol = symbol.trim().to_ascii_uppercase();
        let mut params = Self {
            symbol,
            max_position_size_pct: Decimal::new(100, 1),
            stop_loss_pct: Decimal::new(50, 1),
            take_profit_pct: Decimal::new(100, 1),
        };

        match params.symbol.as_str() {
            "BTC" | "ETH" => {
                params.max_position_size_pct = Decimal::new(150, 1);
                params.stop_loss_pct = Decimal::new(30, 1);
            }
            "DOGE" | "SHIB" => {
                params.max_position_size_pct = Decimal::new(50, 1);
                params.stop_loss_pct = Decimal::new(100, 1);
                params.take_profit_pct = Decimal::new(200, 1);
            }
            _ => {}
        }

        params
    }

    /// Clamp a proposed position size into `[0, max_position_size_pct]`.
    pub fn clamp_position(&self, proposed: Decimal) -> Decimal {
        proposed.max(Decimal::ZERO).min(self.max_position_size_pct)
    }
}

/// The terminal output of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalDecision {
    pub action: TradeAction,
    /// Full text of the portfolio manager's verdict.
    pub rationale: String,
    /// Position size the portfolio manager asked for, already clamped to the
    /// guard rails. None when the verdict did not name one.
    pub position_size_pct: Option<Decimal>,
    pub trading_params: TradingParams,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn marker_extraction() {
        let text = "Risk is elevated.\n\nFINAL DECISION: SELL";
        assert_eq!(TradeAction::from_marker(text), Some(TradeAction::Sell));
    }

    #[test]
    fn marker_is_case_insensitive_and_tolerates_markdown() {
        let text = "**Final Decision: **buy** with a tight stop";
        assert_eq!(TradeAction::from_marker(text), Some(TradeAction::Buy));
    }

    #[test]
    fn last_marker_wins() {
        let text = "The trader proposed FINAL DECISION: BUY.\nAfter review, FINAL DECISION: HOLD";
        assert_eq!(TradeAction::from_marker(text), Some(TradeAction::Hold));
    }

    #[test]
    fn missing_or_unknown_marker() {
        assert_eq!(TradeAction::from_marker("no verdict here"), None);
        assert_eq!(TradeAction::from_marker("FINAL DECISION: MAYBE"), None);
    }

    #[test]
    fn action_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TradeAction::Hold).unwrap(), "\"HOLD\"");
    }

    #[test]
    fn params_for_majors() {
        let params = TradingParams::for_symbol("btc");
        assert_eq!(params.symbol, "BTC");
        assert_eq!(params.max_position_size_pct, dec!(15.0));
        assert_eq!(params.stop_loss_pct, dec!(3.0));
        assert_eq!(params.take_profit_pct, dec!(10.0));
    }

    #[test]
    fn params_for_meme_coins() {
        let params = TradingParams::for_symbol("DOGE");
        assert_eq!(params.max_position_size_pct, dec!(5.0));
        assert_eq!(params.stop_loss_pct, dec!(10.0));
        assert_eq!(params.take_profit_pct, dec!(20.0));
    }

    #[test]
    fn position_is_clamped_to_guard_rails() {
        let params = TradingParams::for_symbol("SOL");
        assert_eq!(params.clamp_position(dec!(25)), dec!(10.0));
        assert_eq!(params.clamp_position(dec!(-3)), dec!(0));
        assert_eq!(params.clamp_position(dec!(4.5)), dec!(4.5));
    }

    #[test]
    fn params_default() {
        let params = TradingParams::for_symbol("SOL");
        assert_eq!(params.max_position_size_pct, dec!(10.0));
        assert_eq!(params.stop_loss_pct, dec!(5.0));
    }
}
