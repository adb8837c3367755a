use chrono::Utc;
use cryptodesk_models::{FinalDecision, TradeAction, TradingParams};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common model response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the decision:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "no valid JSON object found in response (length={})",
        text.len()
    )))
}

fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                return Some(text[json_start..json_start + end].trim().to_string());
            }
        }
    }

    None
}

/// First balanced `{ ... }`, ignoring braces inside strings.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Trim a free-text stage answer. Empty answers are unusable.
pub fn clean_response(raw: &str) -> Result<String, AgentError> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```markdown")
        .or_else(|| trimmed.strip_prefix("```text"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    if unfenced.is_empty() {
        return Err(AgentError::Parse("empty response".to_string()));
    }
    Ok(unfenced.to_string())
}

/// Build the final decision from the portfolio manager's answer.
///
/// A JSON object with an `action` field wins; otherwise the last
/// `FINAL DECISION:` marker; otherwise the desk holds.
pub fn parse_final_decision(text: &str, subject: &str) -> Result<FinalDecision, AgentError> {
    let rationale = clean_response(text)?;
    let trading_params = TradingParams::for_symbol(subject);

    let structured = extract_json(&rationale)
        .ok()
        .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
        .and_then(|value| {
            let action = value.get("action")?.as_str()?.parse::<TradeAction>().ok()?;
            let size = value.get("position_size_pct").and_then(decimal_from_json);
            Some((action, size))
        });

    let (action, position_size_pct) = match structured {
        Some((action, size)) => (action, size.map(|s| trading_params.clamp_position(s))),
        None => match TradeAction::from_marker(&rationale) {
            Some(action) => (action, None),
            None => {
                debug!(subject, "No decision marker found, defaulting to HOLD");
                (TradeAction::Hold, None)
            }
        },
    };

    Ok(FinalDecision {
        action,
        rationale,
        position_size_pct,
        trading_params,
        decided_at: Utc::now(),
    })
}

fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"action": "BUY", "rationale": "test"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my call:\n```json\n{\"action\": \"SELL\"}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"action": "SELL"}"#);
    }

    #[test]
    fn extract_with_braces_in_strings() {
        let input = r#"Verdict: {"rationale": "range {low} to {high}", "action": "HOLD"}"#;
        let parsed: serde_json::Value =
            serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["action"], "HOLD");
    }

    #[test]
    fn extract_no_json() {
        assert!(extract_json("plain text only } with a stray brace").is_err());
    }

    #[test]
    fn clean_rejects_empty() {
        assert!(clean_response("   \n").is_err());
        assert!(clean_response("```markdown\n\n```").is_err());
        assert_eq!(clean_response("```markdown\nreport\n```").unwrap(), "report");
        assert_eq!(clean_response("  report  ").unwrap(), "report");
    }

    #[test]
    fn decision_from_marker() {
        let text = "Risk is contained and momentum is strong.\n\nFINAL DECISION: BUY";
        let decision = parse_final_decision(text, "btc").unwrap();
        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.rationale, text);
        assert_eq!(decision.trading_params.symbol, "BTC");
        assert_eq!(decision.position_size_pct, None);
    }

    #[test]
    fn decision_from_json_clamps_position() {
        let text = r#"{"action": "buy", "position_size_pct": 40, "rationale": "breakout"}"#;
        let decision = parse_final_decision(text, "ETH").unwrap();
        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.position_size_pct, Some(dec!(15.0)));

        let text = r#"{"action": "SELL", "position_size_pct": "2.5%"}"#;
        let decision = parse_final_decision(text, "SOL").unwrap();
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(decision.position_size_pct, Some(dec!(2.5)));
    }

    #[test]
    fn json_without_action_falls_back_to_marker() {
        let text = "Notes: {\"confidence\": 0.4}\nFINAL DECISION: SELL";
        let decision = parse_final_decision(text, "ADA").unwrap();
        assert_eq!(decision.action, TradeAction::Sell);
    }

    #[test]
    fn no_verdict_defaults_to_hold() {
        let decision = parse_final_decision("Markets are uncertain.", "DOGE").unwrap();
        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.trading_params.max_position_size_pct, dec!(5.0));
    }

    #[test]
    fn empty_verdict_is_invalid() {
        assert!(matches!(
            parse_final_decision("", "BTC"),
            Err(AgentError::Parse(_))
        ));
    }
}
