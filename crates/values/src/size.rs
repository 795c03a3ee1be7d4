use crate::Error;

// Decimal suffixes are powers of ten, binary suffixes powers of two, per
// the Kubernetes resource-quantity convention. Longest suffixes first so
// "Ki" is not read as "K".
const SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1048576.0),
    ("Gi", 1073741824.0),
    ("Ti", 1099511627776.0),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
];

/// Parse a size string like `10K`, `5Mi`, `1.5Gi` into a number of bytes.
/// A trailing `m` means milli, as in Kubernetes memory quantities.
pub fn parse_size(text: &str) -> Result<i64, Error> {
    let text = text.trim();
    let bad = || Error::BadSize(text.to_string());

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = text.strip_suffix(suffix) {
            let value: f64 = number.trim().parse().map_err(|_| bad())?;
            return Ok((value * multiplier).round() as i64);
        }
    }
    if let Some(number) = text.strip_suffix('m') {
        let value: f64 = number.trim().parse().map_err(|_| bad())?;
        return Ok((value / 1e3).round() as i64);
    }
    let value: f64 = text.parse().map_err(|_| bad())?;
    Ok(value.round() as i64)
}

/// Render a byte count using binary suffixes: `512`, `10Ki`, `2.0Gi`.
/// One decimal place below ten units, none at ten or above.
pub fn to_size(bytes: i64) -> String {
    if bytes < 1024 {
        return bytes.to_string();
    }
    for (suffix, divisor) in [
        ("Ti", 1099511627776.0),
        ("Gi", 1073741824.0),
        ("Mi", 1048576.0),
        ("Ki", 1024.0),
    ] {
        let value = bytes as f64 / divisor;
        if value >= 1.0 {
            return if value < 10.0 {
                format!("{value:.1}{suffix}")
            } else {
                format!("{}{suffix}", value.round() as i64)
            };
        }
    }
    bytes.to_string()
}

/// Parse a CPU quantity: a float, or millicores with an `m` suffix.
pub fn parse_cpu(text: &str) -> Result<f64, Error> {
    let text = text.trim();
    let bad = || Error::BadCpu(text.to_string());

    if let Some(number) = text.strip_suffix('m') {
        let value: f64 = number.trim().parse().map_err(|_| bad())?;
        return Ok(value / 1e3);
    }
    text.parse().map_err(|_| bad())
}
