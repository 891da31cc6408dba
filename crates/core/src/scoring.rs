use serde::{Deserialize, Serialize};

use crate::ledger::Turn;

/// Session-level summary metrics reduced from the per-turn scores.
///
/// All fields stay `None` until the session completes (or when no turn was
/// ever scored), never a fabricated zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_score: Option<f64>,
    pub max_possible_score: Option<f64>,
    pub confidence: Option<f64>,
    pub communication: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Reduces the finalized turns of a session into summary metrics.
///
/// Pure and deterministic: totals are sums of the raw turn points, the
/// dimension fields are means over the scored turns. Communication is
/// derived from per-turn confidence, which is the closest proxy the
/// evaluator produces. Pending turns are ignored.
pub fn aggregate(turns: &[Turn]) -> ScoreSummary {
    let scored: Vec<_> = turns.iter().filter_map(|t| t.scores.as_ref()).collect();
    if scored.is_empty() {
        return ScoreSummary::default();
    }

    let n = scored.len() as f64;
    let mean = |f: fn(&crate::ledger::TurnScores) -> f64| scored.iter().map(|s| f(s)).sum::<f64>() / n;

    ScoreSummary {
        total_score: Some(scored.iter().map(|s| s.score).sum()),
        max_possible_score: Some(scored.iter().map(|s| s.max_score).sum()),
        confidence: Some(mean(|s| s.confidence)),
        communication: Some(mean(|s| s.confidence)),
        accuracy: Some(mean(|s| s.accuracy)),
    }
}
