//! Raw controller value → normalized parameter value
//!
//! Knobs report 9-bit positions (0-511). Knobs with a center detent get a
//! dead zone around the middle that snaps to exactly 0.5, with both halves
//! stretched so the full [0, 1] range is still reachable.

/// Largest raw value a unit reports
pub const RAW_MAX: u16 = 511;

/// Normalized center position
pub const CENTER: f64 = 0.5;

/// Half-width of the center detent dead zone
pub const CENTER_MARGIN: f64 = 0.05;

/// Truncate (not round) to three decimal digits
pub fn truncate3(value: f64) -> f64 {
    (value * 1000.0).trunc() / 1000.0
}

/// Normalize a raw controller value to [0, 1]
///
/// Raw values above [`RAW_MAX`] are treated as `RAW_MAX`.
pub fn normalize(raw: u16, center_detent: bool) -> f64 {
    let mut value = raw.min(RAW_MAX) as f64 / RAW_MAX as f64;

    if center_detent {
        if (value - CENTER).abs() <= CENTER_MARGIN {
            value = CENTER;
        } else if value > CENTER + CENTER_MARGIN {
            value = scale(value, CENTER + CENTER_MARGIN, 1.0, CENTER, 1.0);
        } else {
            value = scale(value, 0.0, CENTER - CENTER_MARGIN, 0.0, CENTER);
        }
    }

    truncate3(value)
}

/// Linear map from one range to another, clamped to the output range
fn scale(x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let mapped = (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min;
    mapped.clamp(out_min, out_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_endpoints() {
        assert_eq!(normalize(0, false), 0.0);
        assert_eq!(normalize(511, false), 1.0);
        assert_eq!(normalize(256, false), 0.5);
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        // 1/511 = 0.001956...
        assert_eq!(normalize(1, false), 0.001);
        // 510/511 = 0.998043...
        assert_eq!(normalize(510, false), 0.998);
    }

    #[test]
    fn test_out_of_range_raw_is_clamped() {
        assert_eq!(normalize(1000, false), 1.0);
        assert_eq!(normalize(u16::MAX, true), 1.0);
    }

    #[test]
    fn test_center_detent_endpoints() {
        assert_eq!(normalize(0, true), 0.0);
        assert_eq!(normalize(511, true), 1.0);
    }

    #[test]
    fn test_center_detent_snaps_dead_zone() {
        // 230/511 = 0.4500..., 281/511 = 0.5499...
        for raw in 230..=281 {
            assert_eq!(normalize(raw, true), CENTER, "raw {}", raw);
        }
        assert!(normalize(229, true) < CENTER);
        assert!(normalize(282, true) > CENTER);
    }

    #[test]
    fn test_center_detent_rescales_halves() {
        // 0.25 of the full range lands on 0.25 / 0.45 * 0.5
        let quarter = normalize(128, true);
        assert!(quarter > 0.27 && quarter < 0.28, "got {}", quarter);

        let upper = normalize(400, true);
        let linear = normalize(400, false);
        assert!(upper < linear && upper > CENTER);
    }

    #[test]
    fn test_truncate3() {
        assert_eq!(truncate3(0.4567), 0.456);
        assert_eq!(truncate3(1.0), 1.0);
        assert_eq!(truncate3(0.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_linear_matches_truncated_ratio(raw in 0u16..=511) {
            let expected = truncate3(raw as f64 / 511.0);
            prop_assert_eq!(normalize(raw, false), expected);
        }

        #[test]
        fn prop_center_dead_zone_is_exact(raw in 0u16..=511) {
            let linear = raw as f64 / 511.0;
            if (linear - CENTER).abs() <= CENTER_MARGIN {
                prop_assert_eq!(normalize(raw, true), CENTER);
            }
        }

        #[test]
        fn prop_center_detent_in_unit_range(raw in 0u16..=511) {
            let value = normalize(raw, true);
            prop_assert!((0.0..=1.0).contains(&value));
        }

        #[test]
        fn prop_center_detent_monotonic(raw in 0u16..511) {
            prop_assert!(normalize(raw, true) <= normalize(raw + 1, true));
        }
    }
}
