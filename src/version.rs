use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SeekDbError};

/// Database version used to gate dialect-specific behavior.
///
/// Accepts `a.b.c` or `a.b.c.d`; a 3-part version is padded with a zero
/// build number, so `1.2.3` and `1.2.3.0` are the same version and both
/// render as `1.2.3.0`. Ordering is lexicographic over
/// `(major, minor, patch, build)`.
///
/// ```
/// use seekdb_client::Version;
///
/// let v1: Version = "1.0.1.0".parse().unwrap();
/// let v2: Version = "1.0.0.1".parse().unwrap();
/// assert!(v1 > v2);
/// assert_eq!(Version::parse("1.2.3").unwrap().to_string(), "1.2.3.0");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    parts: [u32; 4],
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            parts: [major, minor, patch, build],
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(SeekDbError::Format("version string cannot be empty".into()));
        }

        let raw: Vec<&str> = s.split('.').collect();
        if raw.len() != 3 && raw.len() != 4 {
            return Err(SeekDbError::Format(format!(
                "version format should be x.x.x or x.x.x.x (3 or 4 numeric parts), got: {s}"
            )));
        }

        let mut parts = [0u32; 4];
        for (slot, part) in parts.iter_mut().zip(&raw) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SeekDbError::Format(format!(
                    "version parts must be numeric, got: {s}"
                )));
            }
            *slot = part.parse::<u32>().map_err(|_| {
                SeekDbError::Format(format!("version part out of range in: {s}"))
            })?;
        }

        Ok(Self { parts })
    }

    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    pub fn minor(&self) -> u32 {
        self.parts[1]
    }

    pub fn patch(&self) -> u32 {
        self.parts[2]
    }

    /// Build number (0 when the source string had 3 parts).
    pub fn build(&self) -> u32 {
        self.parts[3]
    }

    pub fn parts(&self) -> (u32, u32, u32, u32) {
        let [a, b, c, d] = self.parts;
        (a, b, c, d)
    }
}

impl FromStr for Version {
    type Err = SeekDbError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl TryFrom<&str> for Version {
    type Error = SeekDbError;

    fn try_from(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.parts;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn comparison_follows_tuple_order() {
        let v1 = Version::parse("1.0.1.0").unwrap();
        let v2 = Version::parse("1.0.0.1").unwrap();
        assert!(v1 > v2);
        assert!(v1 >= v2);
        assert!(v2 < v1);
        assert!(v2 <= v1);
        assert_ne!(v1, v2);
        assert_eq!(v1, Version::parse("1.0.1.0").unwrap());
        assert!(Version::parse("1.2.3").unwrap() < Version::parse("1.2.4").unwrap());
    }

    #[test]
    fn three_parts_pad_with_zero() {
        let v3 = Version::parse("1.2.3").unwrap();
        let v4 = Version::parse("1.2.3.0").unwrap();
        assert_eq!(v3, v4);
        assert_eq!(v3.to_string(), "1.2.3.0");
        assert_eq!(v3.build(), 0);
        assert_eq!(v3.parts(), (1, 2, 3, 0));

        let mut set = HashSet::new();
        set.insert(v3);
        assert!(set.contains(&v4));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "1.2", "1.2.3.4.5", "1.a.3", "1..3", "+1.2.3", " 1.2.3", "1.2.99999999999"] {
            let err = Version::parse(bad).unwrap_err();
            assert!(matches!(err, SeekDbError::Format(_)), "{bad:?} should fail");
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let v = Version::new(4, 3, 5, 2);
        let s = serde_json::to_string(&v).unwrap();
        assert_eq!(s, "\"4.3.5.2\"");
        let back: Version = serde_json::from_str("\"4.3.5\"").unwrap();
        assert_eq!(back, Version::new(4, 3, 5, 0));
    }

    proptest! {
        #[test]
        fn parse_then_render_is_canonical(a in 0u32..10_000, b in 0u32..10_000, c in 0u32..10_000) {
            let three = format!("{a}.{b}.{c}");
            let four = format!("{three}.0");
            let v3 = Version::parse(&three).unwrap();
            prop_assert_eq!(v3, Version::parse(&four).unwrap());
            prop_assert_eq!(v3.to_string(), four);
        }

        #[test]
        fn order_matches_tuple_order(x in proptest::array::uniform4(0u32..5), y in proptest::array::uniform4(0u32..5)) {
            let vx = Version::new(x[0], x[1], x[2], x[3]);
            let vy = Version::new(y[0], y[1], y[2], y[3]);
            prop_assert_eq!(vx.cmp(&vy), x.cmp(&y));
        }
    }
}
