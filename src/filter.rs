//! Layer-3 exponential mean filter (36.331 5.5.3.2)
//!
//!   F_n = (1 - a) * F_{n-1} + a * M_n,   a = 1 / 2^(k/4)
//!
//! The first measurement initialises the filter directly.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialMean {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialMean {
    /// `coefficient` is the filter coefficient `k`; 0 disables smoothing.
    pub fn new(coefficient: f64) -> Self {
        assert!(coefficient >= 0.0, "filter coefficient must be non-negative");
        Self {
            alpha: 1.0 / 2f64.powf(coefficient / 4.0),
            value: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(prev) => (1.0 - self.alpha) * prev + self.alpha * sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
