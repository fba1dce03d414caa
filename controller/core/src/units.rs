//! Parsers for the Go-style durations and Kubernetes quantities used in policy
//! and annotation values.

use std::time::Duration;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("invalid duration {0:?}: expected a number followed by one of ns, us, ms, s, m, h")]
    Duration(String),

    #[error("negative duration {0:?}")]
    NegativeDuration(String),

    #[error("invalid quantity {0:?}")]
    Quantity(String),

    #[error("quantity {0:?} is out of range")]
    QuantityRange(String),
}

/// Parses a duration in Go `time.Duration` syntax, e.g. `1m30s` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, UnitError> {
    let err = || UnitError::Duration(input.to_string());
    let s = input.trim();
    if s.starts_with('-') {
        return Err(UnitError::NegativeDuration(input.to_string()));
    }
    let mut rest = s.trim_start_matches('+');
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(err());
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        let (num, tail) = rest.split_at(num_end);
        let value = num.parse::<f64>().map_err(|_| err())?;
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let base = match unit {
            "ns" => Duration::from_nanos(1),
            "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(60 * 60),
            _ => return Err(err()),
        };
        total += base.mul_f64(value);
        rest = tail;
    }
    Ok(total)
}

/// Parses a Kubernetes quantity such as `64Ki`, `1M` or `1024` into a whole
/// number, rounding fractional results up.
pub fn parse_quantity(input: &str) -> Result<u64, UnitError> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    if num.is_empty() {
        return Err(UnitError::Quantity(input.to_string()));
    }
    let value = num
        .parse::<f64>()
        .map_err(|_| UnitError::Quantity(input.to_string()))?;
    let multiplier: f64 = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0_f64.powi(4),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => return Err(UnitError::Quantity(input.to_string())),
    };
    let total = (value * multiplier).ceil();
    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(UnitError::QuantityRange(input.to_string()));
    }
    Ok(total as u64)
}

/// Parses a quantity that must fit into 32 bits, such as a buffer limit.
pub fn parse_quantity_u32(input: &str) -> Result<u32, UnitError> {
    let v = parse_quantity(input)?;
    u32::try_from(v).map_err(|_| UnitError::QuantityRange(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Duration::ZERO)]
    #[case("5s", Duration::from_secs(5))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case("250ms", Duration::from_millis(250))]
    #[case("1h30m", Duration::from_secs(90 * 60))]
    #[case("+10us", Duration::from_micros(10))]
    fn durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("5")]
    #[case("5d")]
    #[case("s")]
    #[case("-1s")]
    fn invalid_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err(), "{input:?}");
    }

    #[rstest]
    #[case("1024", 1024)]
    #[case("64Ki", 64 * 1024)]
    #[case("1Mi", 1024 * 1024)]
    #[case("1.5k", 1500)]
    #[case("0.5Ki", 512)]
    fn quantities(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(parse_quantity(input), Ok(expected));
    }

    #[test]
    fn quantity_limits() {
        assert!(parse_quantity("12Qi").is_err());
        assert!(parse_quantity("Ki").is_err());
        assert_eq!(
            parse_quantity_u32("8Gi"),
            Err(UnitError::QuantityRange("8Gi".to_string()))
        );
    }
}
