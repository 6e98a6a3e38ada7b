use crate::content_store::ModerationScores;
use serde::{Deserialize, Serialize};

/// Per-category score at or above which content is flagged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub toxicity: f64,
    pub severe_toxicity: f64,
    pub obscene: f64,
    pub threat: f64,
    pub insult: f64,
    pub identity_attack: f64,
    pub sexual_explicit: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            toxicity: 0.7,
            severe_toxicity: 0.5,
            obscene: 0.7,
            threat: 0.6,
            insult: 0.7,
            identity_attack: 0.6,
            sexual_explicit: 0.7,
        }
    }
}

impl Thresholds {
    fn pairs(&self, scores: &ModerationScores) -> [(&'static str, f64, f64); 7] {
        [
            ("toxicity", scores.toxicity, self.toxicity),
            ("severe_toxicity", scores.severe_toxicity, self.severe_toxicity),
            ("obscene", scores.obscene, self.obscene),
            ("threat", scores.threat, self.threat),
            ("insult", scores.insult, self.insult),
            ("identity_attack", scores.identity_attack, self.identity_attack),
            ("sexual_explicit", scores.sexual_explicit, self.sexual_explicit),
        ]
    }

    /// Names of the categories whose score reaches the threshold.
    pub fn flagged_categories(&self, scores: &ModerationScores) -> Vec<&'static str> {
        self.pairs(scores)
            .into_iter()
            .filter(|(_, score, threshold)| score >= threshold)
            .map(|(name, _, _)| name)
            .collect()
    }

    pub fn is_flagged(&self, scores: &ModerationScores) -> bool {
        self.pairs(scores)
            .iter()
            .any(|(_, score, threshold)| score >= threshold)
    }

    /// Every threshold must lie strictly between 0 and 1.
    pub fn validate(&self) -> Result<(), String> {
        let probe = ModerationScores::default();
        for (name, _, threshold) in self.pairs(&probe) {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(format!(
                    "threshold {} must be in (0, 1), got {}",
                    name, threshold
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toxicity_over_threshold_flags() {
        let scores = ModerationScores {
            toxicity: 0.85,
            ..Default::default()
        };
        let thresholds = Thresholds::default();
        assert!(thresholds.is_flagged(&scores));
        assert_eq!(thresholds.flagged_categories(&scores), vec!["toxicity"]);
    }

    #[test]
    fn test_score_equal_to_threshold_flags() {
        let scores = ModerationScores {
            threat: 0.6,
            ..Default::default()
        };
        assert!(Thresholds::default().is_flagged(&scores));
    }

    #[test]
    fn test_all_below_is_clean() {
        let scores = ModerationScores {
            toxicity: 0.69,
            severe_toxicity: 0.49,
            obscene: 0.1,
            threat: 0.2,
            insult: 0.3,
            identity_attack: 0.0,
            sexual_explicit: 0.0,
        };
        assert!(!Thresholds::default().is_flagged(&scores));
        assert!(Thresholds::default().flagged_categories(&scores).is_empty());
    }

    #[test]
    fn test_validate_rejects_bounds() {
        assert!(Thresholds::default().validate().is_ok());
        let zero = Thresholds {
            insult: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().unwrap_err().contains("insult"));
        let one = Thresholds {
            obscene: 1.0,
            ..Default::default()
        };
        assert!(one.validate().is_err());
    }
}
