//! Human-readable summary of a composite signal.

use std::collections::BTreeMap;
use std::fmt::Write;

use confluence_core::{Category, CategoryBreakdown, Direction};

/// Describes the score band a composite falls in.
#[must_use]
pub fn score_band(score: f64) -> &'static str {
    match score {
        s if s >= 80.0 => "Strong bullish confluence",
        s if s >= 60.0 => "Bullish confluence",
        s if s > 40.0 => "Mixed signals",
        s if s > 20.0 => "Bearish confluence",
        _ => "Strong bearish confluence",
    }
}

/// Builds the interpretation line: band, leading and lagging categories,
/// divergence and degradation notes.
#[must_use]
pub fn interpret(
    score: f64,
    direction: Direction,
    components: &BTreeMap<Category, CategoryBreakdown>,
    divergence_adjustment: f64,
    degraded: &[Category],
) -> String {
    let mut text = format!("{} ({score:.1}, {direction})", score_band(score));

    let pull = |b: &CategoryBreakdown| (b.score - 50.0) * b.effective_weight;
    let valid: Vec<(&Category, &CategoryBreakdown)> = components
        .iter()
        .filter(|(_, b)| b.effective_weight > 0.0)
        .collect();
    let strongest = valid.iter().max_by(|a, b| pull(a.1).total_cmp(&pull(b.1)));
    let weakest = valid.iter().min_by(|a, b| pull(a.1).total_cmp(&pull(b.1)));
    if let (Some((lead, lead_b)), Some((lag, lag_b))) = (strongest, weakest) {
        let _ = write!(text, "; strongest {lead} {:.1}", lead_b.score);
        if lead != lag {
            let _ = write!(text, ", weakest {lag} {:.1}", lag_b.score);
        }
    }

    if divergence_adjustment.abs() > f64::EPSILON {
        let kind = if divergence_adjustment > 0.0 {
            "bullish"
        } else {
            "bearish"
        };
        let _ = write!(text, "; {kind} divergence {divergence_adjustment:+.1}");
    }

    if !degraded.is_empty() {
        let names: Vec<&str> = degraded.iter().map(Category::as_str).collect();
        let _ = write!(text, "; degraded: {}", names.join(", "));
    }
    text
}
