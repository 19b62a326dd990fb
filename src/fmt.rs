/// Format milliunits as a dollar amount with thousands separators: $1,234.56
/// Sub-cent milliunits round half away from zero.
pub fn money(milliunits: i64) -> String {
    let negative = milliunits < 0;
    let cents = (milliunits.abs() + 5) / 10;
    let int_part = (cents / 100).to_string();
    let dec_part = cents % 100;

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-${with_commas}.{dec_part:02}")
    } else {
        format!("${with_commas}.{dec_part:02}")
    }
}

/// Format a byte count for status output: 512 B, 14.2 KB, 3.1 MB.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1_234_560), "$1,234.56");
        assert_eq!(money(-500_000), "-$500.00");
        assert_eq!(money(0), "$0.00");
        assert_eq!(money(1_000_000_990), "$1,000,000.99");
        assert_eq!(money(42_100), "$42.10");
    }

    #[test]
    fn test_money_sub_cent_rounding() {
        assert_eq!(money(1_234_567), "$1,234.57");
        assert_eq!(money(-1_234_567), "-$1,234.57");
        assert_eq!(money(4), "$0.00");
        assert_eq!(money(5), "$0.01");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(14_540), "14.2 KB");
        assert_eq!(format_bytes(3_250_585), "3.1 MB");
    }
}
