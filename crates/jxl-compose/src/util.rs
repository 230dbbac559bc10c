/// Greatest common divisor of all numbers in `numbers`.
///
/// Zeros in the input are ignored; an empty (or all-zero) input yields 0.
pub fn greatest_common_divisor(numbers: &[u32]) -> u32 {
    numbers
        .iter()
        .copied()
        .filter(|&n| n > 0)
        .fold(0, gcd_pair)
}

fn gcd_pair(a: u32, b: u32) -> u32 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Parses a fraction of the form `"N"` or `"N/D"`, e.g. `"123/4"`, `"42"`.
///
/// Returns `None` if the string can't be parsed or the denominator is 0.
pub fn parse_rational(s: &str) -> Option<(u32, u32)> {
    let (numerator, denominator) = match s.split_once('/') {
        Some((n, d)) => (n, Some(d)),
        None => (s, None),
    };
    let numerator: u32 = numerator.parse().ok()?;
    let denominator: u32 = match denominator {
        Some(d) => d.parse().ok()?,
        None => 1,
    };
    if denominator == 0 {
        return None;
    }
    Some((numerator, denominator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_ignores_zeros() {
        assert_eq!(greatest_common_divisor(&[]), 0);
        assert_eq!(greatest_common_divisor(&[0, 0]), 0);
        assert_eq!(greatest_common_divisor(&[40, 0, 100]), 20);
        assert_eq!(greatest_common_divisor(&[7]), 7);
        assert_eq!(greatest_common_divisor(&[12, 18, 30]), 6);
    }

    #[test]
    fn rational_parsing() {
        assert_eq!(parse_rational("42"), Some((42, 1)));
        assert_eq!(parse_rational("123/4"), Some((123, 4)));
        assert_eq!(parse_rational("1/0"), None);
        assert_eq!(parse_rational(""), None);
        assert_eq!(parse_rational("a/b"), None);
        assert_eq!(parse_rational("1/2/3"), None);
        assert_eq!(parse_rational("-1"), None);
    }
}
