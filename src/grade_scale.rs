use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub code: String,
    pub name: String,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub grade_points: f64,
}

impl GradeBand {
    pub fn contains(&self, percentage: f64) -> bool {
        self.lower_limit <= percentage && percentage <= self.upper_limit
    }

    fn validate(&self) -> EngineResult<()> {
        let invalid = |message: &str| EngineError::InvalidGradeBand {
            code: self.code.clone(),
            message: message.to_string(),
        };
        if self.code.trim().is_empty() {
            return Err(invalid("code must not be empty"));
        }
        if !self.lower_limit.is_finite() || !self.upper_limit.is_finite() {
            return Err(invalid("limits must be finite"));
        }
        if self.lower_limit > self.upper_limit {
            return Err(invalid("lowerLimit must not exceed upperLimit"));
        }
        if !(0.0..=10.0).contains(&self.grade_points) {
            return Err(invalid("gradePoints must be between 0 and 10"));
        }
        Ok(())
    }
}

/// Validated set of grade bands, looked up by percentage.
#[derive(Debug, Clone, Default)]
pub struct GradeScale {
    bands: Vec<GradeBand>,
}

impl GradeScale {
    pub fn new(bands: Vec<GradeBand>) -> EngineResult<Self> {
        for band in &bands {
            band.validate()?;
        }
        let mut codes: Vec<&str> = bands.iter().map(|b| b.code.as_str()).collect();
        codes.sort_unstable();
        if let Some(w) = codes.windows(2).find(|w| w[0] == w[1]) {
            return Err(EngineError::InvalidGradeBand {
                code: w[0].to_string(),
                message: "duplicate band code".to_string(),
            });
        }
        let scale = Self { bands };
        for (a, b) in scale.overlaps() {
            tracing::warn!(first = %a, second = %b, "grade bands overlap; highest upper limit wins");
        }
        Ok(scale)
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// Selects the band containing `percentage`. When bands overlap the one
    /// with the highest upper limit wins, then the highest lower limit, then
    /// the lexically smallest code, so the choice never depends on row order.
    pub fn resolve(&self, percentage: f64) -> EngineResult<&GradeBand> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(EngineError::PercentageOutOfRange {
                field: "percentage",
                value: percentage,
            });
        }
        self.bands
            .iter()
            .filter(|b| b.contains(percentage))
            .max_by(|a, b| {
                a.upper_limit
                    .partial_cmp(&b.upper_limit)
                    .unwrap_or(Ordering::Equal)
                    .then(
                        a.lower_limit
                            .partial_cmp(&b.lower_limit)
                            .unwrap_or(Ordering::Equal),
                    )
                    .then_with(|| b.code.cmp(&a.code))
            })
            .ok_or(EngineError::NoMatchingGradeBand { percentage })
    }

    /// Pairs of band codes whose ranges intersect.
    pub fn overlaps(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (i, a) in self.bands.iter().enumerate() {
            for b in &self.bands[i + 1..] {
                if a.lower_limit <= b.upper_limit && b.lower_limit <= a.upper_limit {
                    out.push((a.code.clone(), b.code.clone()));
                }
            }
        }
        out
    }
}
