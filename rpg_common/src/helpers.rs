use thiserror::Error;

use crate::idr::MAX_IDR_AMOUNT;

#[derive(Debug, Clone, Error)]
pub enum AmountParseError {
    #[error("'{0}' is not a recognisable rupiah amount")]
    Unparseable(String),
    #[error("Amount must be a positive number of rupiah")]
    NotPositive,
    #[error("Amount exceeds the maximum of {MAX_IDR_AMOUNT} rupiah")]
    TooLarge,
}

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a user-supplied rupiah amount.
///
/// Indonesian users write `100.000` where an English keyboard writes `100,000`, and both appear in the wild alongside
/// the bare `100000`. An optional `Rp`/`IDR` prefix is stripped. Fractional rupiah are dropped: when the integer part
/// is dot-grouped, a `,` starts the fraction; otherwise anything after the first `.` or `,` is ignored.
///
/// The result must land in `1..=10^12`.
pub fn parse_idr_input(input: &str) -> Result<i64, AmountParseError> {
    let mut s = input.trim();
    if s.len() >= 3 && s[..3].eq_ignore_ascii_case("idr") {
        s = s[3..].trim_start();
    } else if s.len() >= 2 && s[..2].eq_ignore_ascii_case("rp") {
        s = s[2..].trim_start();
    }
    if s.is_empty() {
        return Err(AmountParseError::Unparseable(input.to_string()));
    }

    let digits = if let Some(main) = grouped_integer(s, '.', ',') {
        main
    } else if let Some(main) = grouped_integer(s, ',', '.') {
        main
    } else {
        // Plain number. Everything after the first separator is a fraction and is dropped.
        let main = s.split(['.', ',']).next().unwrap_or_default().to_string();
        if main.is_empty() || !main.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Unparseable(input.to_string()));
        }
        main
    };

    let amount: i64 = digits.parse().map_err(|_| AmountParseError::TooLarge)?;
    if amount <= 0 {
        return Err(AmountParseError::NotPositive);
    }
    if amount > MAX_IDR_AMOUNT {
        return Err(AmountParseError::TooLarge);
    }
    Ok(amount)
}

/// Recognise `1@234@567[D<frac>]` where `@` is the group separator and `D` the decimal separator, returning the
/// ungrouped integer digits. `None` when the shape does not match.
fn grouped_integer(s: &str, group_sep: char, decimal_sep: char) -> Option<String> {
    let (main, frac) = match s.split_once(decimal_sep) {
        Some((m, f)) => (m, Some(f)),
        None => (s, None),
    };
    if let Some(f) = frac {
        if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    let groups: Vec<&str> = main.split(group_sep).collect();
    if groups.len() < 2 {
        return None;
    }
    let first = groups[0];
    if first.is_empty() || first.len() > 3 || !first.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    for group in &groups[1..] {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    Some(groups.concat())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dot_grouped() {
        assert_eq!(parse_idr_input("100.000").unwrap(), 100_000);
        assert_eq!(parse_idr_input("1.000.000").unwrap(), 1_000_000);
        assert_eq!(parse_idr_input("Rp 50.000,50").unwrap(), 50_000);
    }

    #[test]
    fn comma_grouped() {
        assert_eq!(parse_idr_input("100,000").unwrap(), 100_000);
        assert_eq!(parse_idr_input("IDR 2,500,000.75").unwrap(), 2_500_000);
    }

    #[test]
    fn plain() {
        assert_eq!(parse_idr_input("100000").unwrap(), 100_000);
        assert_eq!(parse_idr_input("rp100000").unwrap(), 100_000);
        // Not the grouping pattern, so the dot starts a fraction.
        assert_eq!(parse_idr_input("100.5").unwrap(), 100);
        assert_eq!(parse_idr_input("100,5").unwrap(), 100);
        assert_eq!(parse_idr_input("10.00").unwrap(), 10);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_idr_input("abc").is_err());
        assert!(parse_idr_input("").is_err());
        assert!(parse_idr_input("Rp").is_err());
        assert!(parse_idr_input("0").is_err());
        assert!(parse_idr_input("10000000000000").is_err());
    }

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("yes".into()), false));
        assert!(!parse_boolean_flag(Some("off".into()), true));
        assert!(parse_boolean_flag(None, true));
    }
}
