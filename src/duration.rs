/// Shown for any non-positive (or NaN) duration.
pub const ZERO_DURATION: &str = "0秒";

/// Render a number of seconds as `HH:MM:SS`.
///
/// Fractional seconds are truncated and hours are not wrapped at 24.
/// Zero, negative and NaN inputs render as [`ZERO_DURATION`].
pub fn format_duration(seconds: f64) -> String {
    if seconds.is_nan() || seconds <= 0.0 {
        return ZERO_DURATION.to_string();
    }
    let whole = seconds as u64;
    let (minutes, secs) = (whole / 60, whole % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "0秒")]
    #[case(-1.0, "0秒")]
    #[case(-3600.5, "0秒")]
    #[case(0.4, "00:00:00")]
    #[case(1.0, "00:00:01")]
    #[case(59.9, "00:00:59")]
    #[case(60.0, "00:01:00")]
    #[case(3599.0, "00:59:59")]
    #[case(3661.0, "01:01:01")]
    #[case(86_400.0, "24:00:00")]
    fn test_format_duration(#[case] input: f64, #[case] expected: &str) {
        assert_eq!(format_duration(input), expected);
    }

    #[test]
    fn test_format_duration_nan_is_zero() {
        assert_eq!(format_duration(f64::NAN), ZERO_DURATION);
    }

    proptest! {
        #[test]
        fn prop_format_duration_round_trips_whole_seconds(s in 1u64..1_000_000) {
            let out = format_duration(s as f64);
            let parts: Vec<u64> = out.split(':').map(|p| p.parse().unwrap()).collect();
            prop_assert_eq!(parts.len(), 3);
            prop_assert!(parts[1] < 60 && parts[2] < 60);
            prop_assert_eq!(parts[0] * 3600 + parts[1] * 60 + parts[2], s);
        }

        #[test]
        fn prop_non_positive_is_zero(s in -1.0e9f64..=0.0) {
            prop_assert_eq!(format_duration(s), ZERO_DURATION);
        }
    }
}
