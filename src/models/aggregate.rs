use serde::{Deserialize, Serialize};

/// Count/mean/median/min/max over a numeric sample. All zero for an empty sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateValues {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl AggregateValues {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Self {
            count,
            mean,
            median,
            min: sorted[0],
            max: sorted[count - 1],
        }
    }

    /// Round every value (never `count`) to `precision` decimal places.
    pub fn round_with_precision(&mut self, precision: u32) {
        self.mean = round_with_precision(self.mean, precision);
        self.median = round_with_precision(self.median, precision);
        self.min = round_with_precision(self.min, precision);
        self.max = round_with_precision(self.max, precision);
    }
}

pub fn round_with_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    // Avoid "-0.0" showing up in reports.
    if rounded == 0.0 { 0.0 } else { rounded }
}
