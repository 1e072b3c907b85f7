//! HTTP `Range` header values.
//!
//! Only single byte ranges are understood (RFC 7233 §2.1):
//! `bytes=first-last`, `bytes=first-` and `bytes=-suffix_length`.
//! [`ByteRange::offsets`] turns them into the half-open offsets the fetcher
//! takes.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("Range header must use the bytes unit: {0}")]
    Unit(String),
    #[error("Multiple ranges are not supported: {0}")]
    Multiple(String),
    #[error("Malformed byte range: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteRange {
    /// `bytes=first-last`, both inclusive.
    Bounded { first: u64, last: u64 },
    /// `bytes=first-`
    From(u64),
    /// `bytes=-length`: the final `length` bytes.
    Suffix(u64),
}

impl ByteRange {
    pub fn parse(value: &str) -> Result<Self, RangeParseError> {
        let set = value
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| RangeParseError::Unit(value.to_owned()))?
            .trim();
        if set.contains(',') {
            return Err(RangeParseError::Multiple(value.to_owned()));
        }
        let (first, last) = set
            .split_once('-')
            .ok_or_else(|| RangeParseError::Malformed(value.to_owned()))?;
        let number = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| RangeParseError::Malformed(value.to_owned()))
        };

        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err(RangeParseError::Malformed(value.to_owned())),
            (true, false) => Ok(Self::Suffix(number(last)?)),
            (false, true) => Ok(Self::From(number(first)?)),
            (false, false) => {
                let (first, last) = (number(first)?, number(last)?);
                if last < first {
                    return Err(RangeParseError::Malformed(value.to_owned()));
                }
                Ok(Self::Bounded { first, last })
            }
        }
    }

    /// Half-open `[start, end)` for a payload of `total` bytes.  `end` may
    /// exceed `total`; the fetcher clamps it.
    pub fn offsets(&self, total: u64) -> (u64, u64) {
        match *self {
            Self::Bounded { first, last } => (first, last.saturating_add(1)),
            Self::From(first) => (first, total),
            Self::Suffix(len) => (total.saturating_sub(len), total),
        }
    }
}

impl FromStr for ByteRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded { first, last } => write!(f, "bytes={first}-{last}"),
            Self::From(first) => write!(f, "bytes={first}-"),
            Self::Suffix(len) => write!(f, "bytes=-{len}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_forms() {
        assert_eq!(ByteRange::parse("bytes=0-499").unwrap(), ByteRange::Bounded { first: 0, last: 499 });
        assert_eq!(ByteRange::parse("bytes=9500-").unwrap(), ByteRange::From(9500));
        assert_eq!(ByteRange::parse(" bytes=-500 ").unwrap(), ByteRange::Suffix(500));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(ByteRange::parse("items=0-1"), Err(RangeParseError::Unit(_))));
        assert!(matches!(ByteRange::parse("bytes=0-1,5-9"), Err(RangeParseError::Multiple(_))));
        assert!(matches!(ByteRange::parse("bytes=-"), Err(RangeParseError::Malformed(_))));
        assert!(matches!(ByteRange::parse("bytes=9-3"), Err(RangeParseError::Malformed(_))));
        assert!(matches!(ByteRange::parse("bytes=a-b"), Err(RangeParseError::Malformed(_))));
        assert!(matches!(ByteRange::parse("bytes=12"), Err(RangeParseError::Malformed(_))));
    }

    #[test]
    fn offsets_are_half_open() {
        assert_eq!(ByteRange::Bounded { first: 0, last: 499 }.offsets(10_000), (0, 500));
        assert_eq!(ByteRange::From(9500).offsets(10_000), (9500, 10_000));
        assert_eq!(ByteRange::Suffix(500).offsets(10_000), (9500, 10_000));
        assert_eq!(ByteRange::Suffix(500).offsets(100), (0, 100));
        assert_eq!(ByteRange::Bounded { first: 0, last: u64::MAX }.offsets(1), (0, u64::MAX));
    }

    #[test]
    fn display_matches_header_syntax() {
        for value in ["bytes=1-2", "bytes=7-", "bytes=-3"] {
            assert_eq!(value.parse::<ByteRange>().unwrap().to_string(), value);
        }
    }
}
