use crate::Error;

/// A non-negative duration in whole seconds, with kubectl-style rendering.
///
/// Rendering uses at most two units: `40s`, `9m20s`, `80m`, `9h40m`, `26h`,
/// `2d2h`, `10d`. Parsing accepts any concatenation of `<n><unit>` parts
/// where the unit is one of `s`, `m`, `h`, `d`; repeated units accumulate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Age(pub u64);

impl Age {
    pub fn seconds(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Age {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let days = self.0 / 86_400;
        let hours = (self.0 % 86_400) / 3_600;
        if days > 9 {
            return write!(f, "{days}d");
        }
        // kubectl prints hours up to 47.
        if days > 1 {
            return match hours {
                0 => write!(f, "{days}d"),
                _ => write!(f, "{days}d{hours}h"),
            };
        }
        if days > 0 || hours > 9 {
            return write!(f, "{}h", days * 24 + hours);
        }
        let minutes = (self.0 % 3_600) / 60;
        // kubectl prints minutes up to 179.
        if hours > 2 {
            return match minutes {
                0 => write!(f, "{hours}h"),
                _ => write!(f, "{hours}h{minutes}m"),
            };
        }
        if hours > 0 || minutes > 9 {
            return write!(f, "{}m", hours * 60 + minutes);
        }
        let seconds = self.0 % 60;
        if minutes > 0 {
            return match seconds {
                0 => write!(f, "{minutes}m"),
                _ => write!(f, "{minutes}m{seconds}s"),
            };
        }
        write!(f, "{seconds}s")
    }
}

impl<'de> serde::Deserialize<'de> for Age {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AgeVisitor;

        impl<'de> serde::de::Visitor<'de> for AgeVisitor {
            type Value = Age;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an age string like '5m30s' or a number of seconds")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Age, E> {
                Ok(Age(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Age, E> {
                Ok(Age(v.unsigned_abs()))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Age, E> {
                parse_age(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AgeVisitor)
    }
}

/// Parse an age string like `10s`, `5m30s`, `1h`, `2d12h` into an [`Age`].
pub fn parse_age(text: &str) -> Result<Age, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::EmptyAge);
    }
    let mut total = 0u64;
    let mut rest = text;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if split == 0 || split == rest.len() {
            return Err(Error::BadAge(text.to_string()));
        }
        let amount: u64 = rest[..split]
            .parse()
            .map_err(|_| Error::BadAge(text.to_string()))?;
        let unit = rest[split..].chars().next().unwrap_or('?');
        let scale = match unit {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(Error::BadAgeSuffix(unit)),
        };
        total += amount * scale;
        rest = &rest[split + 1..];
    }
    Ok(Age(total))
}

/// Format a number of seconds the way `kubectl` would.
pub fn to_age(seconds: u64) -> String {
    Age(seconds).to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rendering() {
        let cases = [
            (0, "0s"),
            (10, "10s"),
            (40, "40s"),
            (80, "1m20s"),
            (120, "2m"),
            (560, "9m20s"),
            (620, "10m"),
            (4_800, "80m"),
            (7_200, "120m"),
            (10_800, "3h"),
            (32_420, "9h"),
            (34_800, "9h40m"),
            (38_400, "10h"),
            (93_600, "26h"),
            (180_000, "2d2h"),
            (777_600, "9d"),
            (810_000, "9d9h"),
            (896_400, "10d"),
        ];
        for (seconds, expect) in cases {
            assert_eq!(to_age(seconds), expect, "rendering {seconds} seconds");
        }
    }

    #[test]
    fn parsing() {
        assert_eq!(parse_age("10s").unwrap(), Age(10));
        assert_eq!(parse_age("5m30s").unwrap(), Age(330));
        assert_eq!(parse_age("1h").unwrap(), Age(3_600));
        assert_eq!(parse_age("2d12h").unwrap(), Age(216_000));
        // Units accumulate, even repeated or out of order.
        assert_eq!(parse_age("8m80s").unwrap(), Age(560));
        assert_eq!(parse_age("30s1m").unwrap(), Age(90));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_age("").unwrap_err().to_string(), "empty age");
        assert_eq!(
            parse_age("xxx").unwrap_err().to_string(),
            "invalid age syntax: xxx"
        );
        assert_eq!(
            parse_age("1x").unwrap_err().to_string(),
            "invalid suffix 'x', must be one of [dhms]"
        );
        assert_eq!(
            parse_age("5m3").unwrap_err().to_string(),
            "invalid age syntax: 5m3"
        );
    }

    #[test]
    fn round_trip() {
        // Every rendered form that carries full precision parses back to
        // the same number of seconds.
        for seconds in [0, 5, 59, 80, 560, 4_800, 34_800, 93_600, 180_000, 864_000] {
            let rendered = to_age(seconds);
            assert_eq!(parse_age(&rendered).unwrap(), Age(seconds), "{rendered}");
        }
    }
}
