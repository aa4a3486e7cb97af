// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `Range: bytes=<start>-[<end>]` parsing.
//!
//! The repository sees the client's header exactly as sent; parsing only
//! feeds logs. The one exception is a multi-range list, which is withheld
//! rather than truncated to its first clause: the relay cannot produce
//! `multipart/byteranges`, so the request is served in full instead.

use std::fmt;

const UNIT: &str = "bytes=";

/// A requested byte interval. `end` is inclusive; `None` reads to the end of
/// the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end:   Option<u64>,
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Returns `None` for anything that is not a usable single range: other
    /// units, suffix ranges (`bytes=-500`), multi-range lists, overflowing
    /// numbers, or an end before the start. A trailing segment that does not
    /// start with a digit (`bytes=100-abc`) degrades to an open range.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let spec = header
            .get(..UNIT.len())
            .filter(|unit| unit.eq_ignore_ascii_case(UNIT))
            .map(|_| &header[UNIT.len()..])?;
        if spec.contains(',') {
            return None;
        }

        let (start, end) = spec.split_once('-')?;
        let start = start.trim();
        if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let start = start.parse::<u64>().ok()?;

        let end = end.trim_start();
        let digits = end.bytes().take_while(u8::is_ascii_digit).count();
        let end = if digits == 0 {
            None
        } else {
            let end = end[..digits].parse::<u64>().ok()?;
            if end < start {
                return None;
            }
            Some(end)
        };

        Some(Self { start, end })
    }

    /// Number of bytes covered, when bounded.
    pub fn byte_count(&self) -> Option<u64> { self.end.map(|end| end - self.start + 1) }
}

/// Canonical header form, e.g. `bytes=0-99` or `bytes=500-`.
impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{UNIT}{}-{end}", self.start),
            None => write!(f, "{UNIT}{}-", self.start),
        }
    }
}

/// Parse an optional header; absent and unusable headers both yield `None`.
pub fn parse_range(header: Option<&str>) -> Option<ByteRange> { header.and_then(ByteRange::parse) }

/// The `Range` value to send upstream: the client's header unchanged, or
/// nothing when it lists more than one range.
pub fn forwarded_range(header: Option<&str>) -> Option<&str> {
    header.filter(|value| !value.contains(','))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_range() {
        assert_eq!(
            parse_range(Some("bytes=100-199")),
            Some(ByteRange {
                start: 100,
                end:   Some(199),
            })
        );
        assert_eq!(ByteRange::parse("bytes=0-99").unwrap().byte_count(), Some(100));
    }

    #[test]
    fn open_range() {
        let range = parse_range(Some("bytes=500-")).unwrap();
        assert_eq!(range, ByteRange {
            start: 500,
            end:   None,
        });
        assert_eq!(range.byte_count(), None);
    }

    #[test]
    fn absent_header() {
        assert_eq!(parse_range(None), None);
    }

    #[test]
    fn malformed_trailing_segment_degrades_to_open() {
        assert_eq!(
            parse_range(Some("bytes=100-abc")),
            Some(ByteRange {
                start: 100,
                end:   None,
            })
        );
        assert_eq!(
            parse_range(Some("bytes=100-150xyz")),
            Some(ByteRange {
                start: 100,
                end:   Some(150),
            })
        );
    }

    #[test]
    fn unusable_headers() {
        for header in [
            "",
            "bytes",
            "bytes=",
            "bytes=-500",
            "items=0-10",
            "bytes=abc-10",
            "bytes=20-10",
            "bytes=0-10,20-30",
            "bytes=99999999999999999999999-",
        ] {
            assert_eq!(ByteRange::parse(header), None, "{header:?}");
        }
    }

    #[test]
    fn unit_is_case_insensitive_and_trimmed() {
        assert_eq!(
            ByteRange::parse("  Bytes=5-6 "),
            Some(ByteRange {
                start: 5,
                end:   Some(6),
            })
        );
    }

    #[test]
    fn forwarded_unchanged_unless_multi_range() {
        assert_eq!(forwarded_range(Some("bytes=-500")), Some("bytes=-500"));
        assert_eq!(forwarded_range(Some("bytes=20-10")), Some("bytes=20-10"));
        assert_eq!(forwarded_range(Some("Bytes=5-6 ")), Some("Bytes=5-6 "));
        assert_eq!(forwarded_range(Some("bytes=0-10,20-30")), None);
        assert_eq!(forwarded_range(None), None);
    }

    #[test]
    fn canonical_rendering() {
        assert_eq!(ByteRange::parse("bytes=0-99").unwrap().to_string(), "bytes=0-99");
        assert_eq!(ByteRange::parse("bytes=500-").unwrap().to_string(), "bytes=500-");
        assert_eq!(ByteRange::parse("bytes=100-abc").unwrap().to_string(), "bytes=100-");
    }
}
