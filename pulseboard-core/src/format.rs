//! Formatting helpers shared by report surfaces.

/// Format a count for summary cards.
///
/// - `>= 1_000_000_000` → one decimal with a `B` suffix (`1.2B`)
/// - `>= 10_000_000` → one decimal with an `M` suffix (`12.3M`)
/// - otherwise → thousands grouped with dots (`1.234.567`)
pub fn format_number_smart(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else if magnitude >= 1e7 {
        format!("{:.1}M", value / 1e6)
    } else {
        group_thousands(value.round() as i64)
    }
}

/// Group an integer's digits in threes, separated by dots.
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

/// Percentage of `part` in `whole`, rounded to 2 decimals; 0 when `whole` is 0.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round2(part / whole * 100.0)
    }
}

/// Round to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_smart() {
        assert_eq!(format_number_smart(1_234_567_890.0), "1.2B");
        assert_eq!(format_number_smart(12_345_678.0), "12.3M");
        assert_eq!(format_number_smart(9_999_999.0), "9.999.999");
        assert_eq!(format_number_smart(1_234.4), "1.234");
        assert_eq!(format_number_smart(999.0), "999");
        assert_eq!(format_number_smart(0.0), "0");
    }

    #[test]
    fn test_group_thousands_negative() {
        assert_eq!(group_thousands(-1_000), "-1.000");
        assert_eq!(group_thousands(100_000), "100.000");
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(25.0, 100.0), 25.0);
        assert_eq!(percentage(1.0, 3.0), 33.33);
        assert_eq!(percentage(5.0, 0.0), 0.0);
    }
}
