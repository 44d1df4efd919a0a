//! Confidence scorer.
//!
//! This is a fixed scoring rubric, not a statistical estimator. The number it
//! returns is a display-level heuristic and must not be read as a probability.

use tracing::debug;

/// Lowest confidence ever reported.
pub const MIN_CONFIDENCE: u8 = 60;
/// Highest confidence ever reported.
pub const MAX_CONFIDENCE: u8 = 95;
/// Fixed confidence of the single-sample forecast.
pub const DEGENERATE_CONFIDENCE: u8 = 65;

const BASE_CONFIDENCE: i32 = 70;

/// Score confidence from sample count, volatility and `|average change|`.
pub fn score_confidence(sample_count: usize, volatility: f64, trend_strength: f64) -> u8 {
    let mut score = BASE_CONFIDENCE;

    score += match sample_count {
        n if n >= 10 => 15,
        n if n >= 5 => 10,
        n if n >= 3 => 5,
        _ => -10,
    };

    if volatility < 0.1 {
        score += 10;
    } else if volatility > 0.3 {
        score -= 15;
    }

    if trend_strength < 0.01 {
        score += 5;
    } else if trend_strength > 0.05 {
        score -= 5;
    }

    let clamped = score.clamp(MIN_CONFIDENCE as i32, MAX_CONFIDENCE as i32) as u8;
    debug!(
        "Confidence {} (raw {}) for n={}, volatility={:.4}, trend={:.4}",
        clamped, score, sample_count, volatility, trend_strength
    );
    clamped
}
