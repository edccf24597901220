use crate::core::config::settings::ConfidenceSettings;

/// Scores an answer from its retrieval signals.
///
/// `similarity_weight * top_similarity + agreement_weight * agreement`, where
/// agreement grows linearly from one source to `agreement_saturation`
/// distinct sources. A correction hit lifts the score to at least
/// `correction_floor`.
#[derive(Debug, Clone)]
pub struct ConfidenceModel {
    similarity_weight: f32,
    agreement_weight: f32,
    agreement_saturation: usize,
    correction_floor: f32,
    no_results: f32,
}

impl ConfidenceModel {
    pub fn from_settings(settings: &ConfidenceSettings) -> Self {
        Self {
            similarity_weight: settings.similarity_weight.max(0.0),
            agreement_weight: settings.agreement_weight.max(0.0),
            agreement_saturation: settings.agreement_saturation.max(1),
            correction_floor: settings.correction_floor.clamp(0.0, 1.0),
            no_results: settings.no_results_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn score(&self, top_similarity: f32, distinct_sources: usize, correction_hit: bool) -> f32 {
        let similarity = if top_similarity.is_finite() {
            top_similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let agreement = self.agreement(distinct_sources);
        let base = (self.similarity_weight * similarity + self.agreement_weight * agreement)
            .clamp(0.0, 1.0);

        if correction_hit {
            base.max(self.correction_floor)
        } else {
            base
        }
    }

    pub fn no_results(&self) -> f32 {
        self.no_results
    }

    fn agreement(&self, distinct_sources: usize) -> f32 {
        if distinct_sources == 0 {
            return 0.0;
        }
        if self.agreement_saturation <= 1 {
            return 1.0;
        }
        let extra = (distinct_sources - 1) as f32;
        (extra / (self.agreement_saturation - 1) as f32).min(1.0)
    }
}
