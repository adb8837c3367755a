//! System and user prompts for each stage variant.
//!
//! User prompts only read fields written by earlier phases, plus the debate or
//! risk history of the stage's own phase for the loop participants.

use std::fmt::Write as _;

use cryptodesk_models::{AnalystKind, DebateSide, RiskKind, SharedState, StageKind};

const DESK_PREAMBLE: &str = "You are part of a cryptocurrency trading desk. Crypto markets trade \
     24/7 and are far more volatile than equities; account for Bitcoin correlation, market \
     dominance and liquidity across exchanges.";

pub fn system_prompt(kind: StageKind) -> String {
    let role = match kind {
        StageKind::Analyst(AnalystKind::Market) => {
            "You are the market analyst. Read the price window and technical indicators \
             (moving averages, MACD, RSI, Bollinger Bands, ATR) and describe trend, momentum, \
             support and resistance. End with a short summary table."
        }
        StageKind::Analyst(AnalystKind::Social) => {
            "You are the social sentiment analyst. Read community sentiment, social volume and \
             fear/greed readings. Separate organic interest from coordinated hype."
        }
        StageKind::Analyst(AnalystKind::News) => {
            "You are the news analyst. Summarize regulatory, macro, exchange and protocol news \
             and judge how each item is likely to move the price."
        }
        StageKind::Analyst(AnalystKind::Fundamentals) => {
            "You are the fundamentals analyst. Assess market cap, supply dynamics, tokenomics, \
             network activity and the asset's place in the broader market."
        }
        StageKind::Advocate => {
            "You are the bull researcher. Build the strongest evidence-based case for taking a \
             long position and rebut the bear's latest arguments point by point."
        }
        StageKind::Skeptic => {
            "You are the bear researcher. Build the strongest evidence-based case against taking \
             a long position and rebut the bull's latest arguments point by point."
        }
        StageKind::ResearchManager => {
            "You are the research manager. Judge the bull/bear debate on the strength of evidence, \
             not rhetoric, and commit to a clear recommendation: buy, sell or hold, with reasons."
        }
        StageKind::Trader => {
            "You are the trader. Turn the research recommendation into a concrete plan: \
             direction, entry, position size as a percentage of the portfolio, stop-loss and \
             take-profit levels."
        }
        StageKind::RiskDebator(RiskKind::Aggressive) => {
            "You are the aggressive risk analyst. Argue for capturing upside; challenge \
             caution that would leave returns on the table."
        }
        StageKind::RiskDebator(RiskKind::Conservative) => {
            "You are the conservative risk analyst. Argue for protecting capital; challenge \
             sizing and stops that expose the portfolio to drawdowns."
        }
        StageKind::RiskDebator(RiskKind::Neutral) => {
            "You are the neutral risk analyst. Weigh upside against downside and push the \
             other perspectives toward a balanced adjustment of the plan."
        }
        StageKind::RiskManager => {
            "You are the risk manager. Summarize the risk deliberation, state which concerns \
             are material, and recommend adjustments to the trading plan."
        }
        StageKind::PortfolioManager => {
            "You are the portfolio manager and make the final call. Weigh the trading plan \
             against the risk assessment. End your answer with a line of the form \
             `FINAL DECISION: BUY`, `FINAL DECISION: SELL` or `FINAL DECISION: HOLD`. You may \
             instead answer with a JSON object {\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \
             \"position_size_pct\": <number>, \"rationale\": \"...\"}."
        }
    };
    format!("{DESK_PREAMBLE}\n\n{role}")
}

fn header(state: &SharedState) -> String {
    format!(
        "Asset: {}\nAnalysis date: {}\n",
        state.subject(),
        state.as_of()
    )
}

fn analyst_section(state: &SharedState) -> String {
    let mut out = String::from("\n## Analyst reports\n");
    if state.analyst_reports().is_empty() {
        out.push_str("(no analyst reports)\n");
    }
    for (kind, report) in state.analyst_reports() {
        let _ = write!(out, "\n### {kind}\n{report}\n");
    }
    out
}

fn debate_section(state: &SharedState) -> String {
    let mut out = String::from("\n## Research debate\n");
    for entry in state.debate_history() {
        let _ = write!(out, "\n[{} round {}]\n{}\n", entry.side, entry.round, entry.statement);
    }
    out
}

pub fn analyst_prompt(
    state: &SharedState,
    kind: AnalystKind,
    data: &[(&str, Option<serde_json::Value>)],
) -> String {
    let mut out = header(state);
    let _ = write!(out, "\nWrite the {kind} report.\n\n## Data\n");
    for (metric, value) in data {
        match value {
            Some(value) => {
                let rendered =
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                let _ = write!(out, "\n### {metric}\n{rendered}\n");
            }
            None => {
                let _ = write!(out, "\n### {metric}\n(no data available)\n");
            }
        }
    }
    out
}

pub fn debate_prompt(state: &SharedState, side: DebateSide, round: u8) -> String {
    let mut out = header(state);
    out.push_str(&analyst_section(state));
    out.push_str(&debate_section(state));

    let own: Vec<&str> = state
        .statements_by(side)
        .map(|e| e.statement.as_str())
        .collect();
    let opponent = state.statements_by(side.opponent()).last();

    let _ = write!(out, "\nYou are the {side}. This is round {round}.\n");
    if !own.is_empty() {
        let _ = write!(
            out,
            "Do not repeat your {} earlier statement(s); build on them.\n",
            own.len()
        );
    }
    if let Some(last) = opponent {
        let _ = write!(out, "Respond directly to the {}'s latest argument.\n", last.side);
    }
    out
}

pub fn research_manager_prompt(state: &SharedState) -> String {
    let mut out = header(state);
    out.push_str(&analyst_section(state));
    out.push_str(&debate_section(state));
    out.push_str("\nDeliver your recommendation.\n");
    out
}

pub fn trader_prompt(state: &SharedState, research_decision: &str) -> String {
    let mut out = header(state);
    out.push_str(&analyst_section(state));
    let _ = write!(
        out,
        "\n## Research recommendation\n{research_decision}\n\nWrite the trading plan.\n"
    );
    out
}

pub fn risk_debator_prompt(
    state: &SharedState,
    perspective: RiskKind,
    plan: &str,
    round: u8,
) -> String {
    let mut out = header(state);
    let _ = write!(out, "\n## Trading plan\n{plan}\n\n## Risk deliberation so far\n");
    let earlier: Vec<_> = state
        .risk_history()
        .iter()
        .filter(|e| e.round < round)
        .collect();
    if earlier.is_empty() {
        out.push_str("(first round)\n");
    }
    for entry in earlier {
        let _ = write!(
            out,
            "\n[{} round {}]\n{}\n",
            entry.perspective, entry.round, entry.statement
        );
    }
    let _ = write!(
        out,
        "\nGive the {perspective} assessment for round {round}.\n"
    );
    out
}

pub fn risk_manager_prompt(state: &SharedState, plan: &str) -> String {
    let mut out = header(state);
    let _ = write!(out, "\n## Trading plan\n{plan}\n\n## Final risk assessments\n");
    for (kind, assessment) in state.risk_reports() {
        let _ = write!(out, "\n### {kind}\n{assessment}\n");
    }
    out.push_str("\nSummarize the risk picture.\n");
    out
}

pub fn portfolio_prompt(state: &SharedState, plan: &str) -> String {
    let mut out = header(state);
    if let Some(decision) = state.research_decision() {
        let _ = write!(out, "\n## Research recommendation\n{decision}\n");
    }
    let _ = write!(out, "\n## Trading plan\n{plan}\n");
    if !state.risk_reports().is_empty() {
        out.push_str("\n## Risk assessments\n");
        for (kind, assessment) in state.risk_reports() {
            let _ = write!(out, "\n### {kind}\n{assessment}\n");
        }
    }
    match state.risk_summary() {
        Some(summary) => {
            let _ = write!(out, "\n## Risk summary\n{summary}\n");
        }
        None => out.push_str("\n## Risk summary\n(no risk review was run)\n"),
    }
    out.push_str("\nMake the final decision.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use cryptodesk_models::{
        DebateEntry, Phase, RiskEntry, RunMetadata, StateUpdate,
    };

    fn state() -> SharedState {
        let meta = RunMetadata::new(
            vec![AnalystKind::Market],
            vec![RiskKind::Aggressive, RiskKind::Conservative],
            2,
            2,
        );
        SharedState::new("ETH", NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(), meta)
    }

    #[test]
    fn every_stage_has_a_system_prompt() {
        let kinds = AnalystKind::ALL
            .into_iter()
            .map(StageKind::Analyst)
            .chain(RiskKind::ALL.into_iter().map(StageKind::RiskDebator))
            .chain([
                StageKind::Advocate,
                StageKind::Skeptic,
                StageKind::ResearchManager,
                StageKind::Trader,
                StageKind::RiskManager,
                StageKind::PortfolioManager,
            ]);
        for kind in kinds {
            let prompt = system_prompt(kind);
            assert!(prompt.starts_with(DESK_PREAMBLE), "{kind}");
            assert!(prompt.len() > DESK_PREAMBLE.len() + 20, "{kind}");
        }
        assert!(system_prompt(StageKind::PortfolioManager).contains("FINAL DECISION: HOLD"));
    }

    #[test]
    fn analyst_prompt_marks_missing_data() {
        let data = vec![
            ("price_window", Some(serde_json::json!({"close": [3500.0, 3620.5]}))),
            ("technical_indicators", None),
        ];
        let prompt = analyst_prompt(&state(), AnalystKind::Market, &data);
        assert!(prompt.contains("Asset: ETH"));
        assert!(prompt.contains("2024-12-01"));
        assert!(prompt.contains("3620.5"));
        assert!(prompt.contains("### technical_indicators\n(no data available)"));
    }

    #[test]
    fn debate_prompt_includes_history_and_own_statements() {
        let mut state = state();
        for (side, text) in [(DebateSide::Advocate, "ETF inflows"), (DebateSide::Skeptic, "gas fees")] {
            state
                .apply(
                    Phase::Research,
                    StateUpdate::Debate(DebateEntry {
                        side,
                        round: 1,
                        statement: text.to_string(),
                    }),
                )
                .unwrap();
        }
        let prompt = debate_prompt(&state, DebateSide::Advocate, 2);
        assert!(prompt.contains("ETF inflows"));
        assert!(prompt.contains("gas fees"));
        assert!(prompt.contains("round 2"));
        assert!(prompt.contains("Do not repeat your 1 earlier statement(s)"));
        assert!(prompt.contains("Respond directly to the skeptic's latest argument"));
    }

    #[test]
    fn risk_prompt_only_shows_completed_rounds() {
        let mut state = state();
        state
            .apply(
                Phase::Trading,
                StateUpdate::TradingPlan {
                    plan: "buy 5%".to_string(),
                },
            )
            .unwrap();
        for (perspective, round, text) in [
            (RiskKind::Aggressive, 1, "size up"),
            (RiskKind::Conservative, 1, "tighten stop"),
            (RiskKind::Aggressive, 2, "round two take"),
        ] {
            state
                .apply(
                    Phase::Risk,
                    StateUpdate::Risk(RiskEntry {
                        perspective,
                        round,
                        statement: text.to_string(),
                    }),
                )
                .unwrap();
        }
        let prompt = risk_debator_prompt(&state, RiskKind::Conservative, "buy 5%", 2);
        assert!(prompt.contains("size up"));
        assert!(prompt.contains("tighten stop"));
        assert!(!prompt.contains("round two take"));
    }

    #[test]
    fn portfolio_prompt_without_risk_review() {
        let prompt = portfolio_prompt(&state(), "hold");
        assert!(prompt.contains("(no risk review was run)"));
        assert!(!prompt.contains("## Risk assessments"));
    }

    #[test]
    fn portfolio_prompt_lists_every_risk_assessment() {
        let mut state = state();
        state
            .apply(
                Phase::Trading,
                StateUpdate::TradingPlan {
                    plan: "buy 5%".to_string(),
                },
            )
            .unwrap();
        for (kind, text) in [
            (RiskKind::Aggressive, "add on the breakout"),
            (RiskKind::Conservative, "halve the size"),
        ] {
            state
                .apply(
                    Phase::Risk,
                    StateUpdate::RiskReport {
                        kind,
                        assessment: text.to_string(),
                    },
                )
                .unwrap();
        }
        state
            .apply(
                Phase::Risk,
                StateUpdate::RiskSummary {
                    summary: "moderate risk".to_string(),
                },
            )
            .unwrap();

        let prompt = portfolio_prompt(&state, "buy 5%");
        let assessments = prompt.find("## Risk assessments").unwrap();
        let aggressive = prompt.find("add on the breakout").unwrap();
        let conservative = prompt.find("halve the size").unwrap();
        assert!(assessments < aggressive && aggressive < conservative);
        assert!(prompt.contains(&format!("### {}", RiskKind::Aggressive)));
        assert!(prompt.contains("## Risk summary\nmoderate risk"));
        assert!(!prompt.contains("(no risk review was run)"));
    }
}
