//! Pressure level derivation from queue fill ratio (§4.5, §8 boundary
//! behaviors).

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    Normal,
    Warn,
    Degraded,
    Shed,
}

impl PressureLevel {
    pub fn label(self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warn => "warn",
            PressureLevel::Degraded => "degraded",
            PressureLevel::Shed => "shed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PressureThresholds {
    pub warn_ratio: f64,
    pub degraded_ratio: f64,
    pub shed_ratio: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self { warn_ratio: 0.5, degraded_ratio: 0.75, shed_ratio: 0.9 }
    }
}

/// §8: "at fill `ceil(cap * ratio)` the level becomes X" — so the
/// comparison is `queue_len >= ceil(capacity * ratio)`, not a plain
/// float comparison, to match the boundary test exactly.
pub fn pressure_level(queue_len: usize, capacity: usize, thresholds: PressureThresholds) -> PressureLevel {
    let threshold_at = |ratio: f64| -> usize { (capacity as f64 * ratio).ceil() as usize };

    if queue_len >= threshold_at(thresholds.shed_ratio) {
        PressureLevel::Shed
    } else if queue_len >= threshold_at(thresholds.degraded_ratio) {
        PressureLevel::Degraded
    } else if queue_len >= threshold_at(thresholds.warn_ratio) {
        PressureLevel::Warn
    } else {
        PressureLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_ratios_match_ceil_of_capacity() {
        let thresholds = PressureThresholds { warn_ratio: 0.5, degraded_ratio: 0.75, shed_ratio: 0.9 };
        // capacity 10: warn at 5, degraded at 8 (ceil(7.5)), shed at 9 (ceil(9.0)).
        assert_eq!(pressure_level(4, 10, thresholds), PressureLevel::Normal);
        assert_eq!(pressure_level(5, 10, thresholds), PressureLevel::Warn);
        assert_eq!(pressure_level(8, 10, thresholds), PressureLevel::Degraded);
        assert_eq!(pressure_level(9, 10, thresholds), PressureLevel::Shed);
    }
}
