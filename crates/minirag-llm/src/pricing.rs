//! Static token-price table. Unknown models cost zero and are flagged so
//! the stats endpoint can surface the gap instead of silently under-billing.

/// USD per 1k tokens: (input, output).
fn price_per_1k(model: &str) -> Option<(f64, f64)> {
    match model {
        "gpt-4o" => Some((0.0025, 0.01)),
        "gpt-4o-mini" => Some((0.00015, 0.0006)),
        "gpt-4.1" => Some((0.002, 0.008)),
        "gpt-4.1-mini" => Some((0.0004, 0.0016)),
        "claude-opus-4" => Some((0.015, 0.075)),
        "claude-sonnet-4" => Some((0.003, 0.015)),
        "claude-haiku-3-5" => Some((0.0008, 0.004)),
        "text-embedding-3-small" => Some((0.00002, 0.0)),
        "text-embedding-3-large" => Some((0.00013, 0.0)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CostEstimate {
    pub cost_usd: f64,
    /// False when the model has no price entry; the cost is then zero and
    /// the caller should flag it.
    pub known_model: bool,
}

pub fn cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> CostEstimate {
    match price_per_1k(model) {
        Some((input, output)) => CostEstimate {
            cost_usd: prompt_tokens as f64 / 1000.0 * input
                + completion_tokens as f64 / 1000.0 * output,
            known_model: true,
        },
        None => CostEstimate {
            cost_usd: 0.0,
            known_model: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_costs() {
        let est = cost("gpt-4o-mini", 1000, 1000);
        assert!(est.known_model);
        assert!((est.cost_usd - 0.00075).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_flagged_zero() {
        let est = cost("mystery-model", 1_000_000, 1_000_000);
        assert!(!est.known_model);
        assert_eq!(est.cost_usd, 0.0);
    }

    #[test]
    fn embeddings_have_no_output_price() {
        let est = cost("text-embedding-3-small", 1000, 0);
        assert!(est.known_model);
        assert!((est.cost_usd - 0.00002).abs() < 1e-12);
    }
}
