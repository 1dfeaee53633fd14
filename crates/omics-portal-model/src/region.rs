// SPDX-License-Identifier: Apache-2.0

use crate::dataset::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const CHROMOSOME_MAX_LEN: usize = 64;
pub const DEFAULT_RESOLUTION_FACTOR: f64 = 0.002;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Chromosome(String);

impl Chromosome {
    /// Parses a chromosome name, adding the `chr` prefix when it is missing (`1` -> `chr1`).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("chromosome must not be empty".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError(format!(
                "chromosome `{s}` must match [A-Za-z0-9_]+"
            )));
        }
        let name = match s.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("chr") && s.len() > 3 => {
                format!("chr{}", &s[3..])
            }
            _ => format!("chr{s}"),
        };
        if name.len() > CHROMOSOME_MAX_LEN {
            return Err(ValidationError(format!(
                "chromosome exceeds max length {CHROMOSOME_MAX_LEN}"
            )));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Chromosome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Chromosome {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Chromosome> for String {
    fn from(value: Chromosome) -> Self {
        value.0
    }
}

/// Half-open visible window `[start, end)` on one chromosome. `start < end` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct GenomicRange {
    pub chromosome: Chromosome,
    pub start: u64,
    pub end: u64,
}

impl GenomicRange {
    pub fn new(chromosome: Chromosome, start: u64, end: u64) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError(format!(
                "invalid region range {chromosome}:{start}-{end}: start must be < end"
            )));
        }
        Ok(Self {
            chromosome,
            start,
            end,
        })
    }

    /// Accepts `chr1:1000-2000`, `1:1,000-2,000` and `chr1 1000 2000`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let usage = || {
            ValidationError(format!(
                "invalid region `{}`; use chr1:1000000-2000000",
                input.trim()
            ))
        };
        let s = input.trim();
        let split_at = s
            .find(|c: char| c == ':' || c.is_whitespace())
            .ok_or_else(usage)?;
        let chromosome = Chromosome::parse(&s[..split_at])?;
        let rest = &s[split_at..];
        let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
        // One `-` (optionally padded) or one whitespace run separates the bounds.
        let (start, end) = match rest.split_once('-') {
            Some((start, end)) => (start.trim_end(), end.trim_start()),
            None => rest
                .split_once(char::is_whitespace)
                .map(|(start, end)| (start, end.trim_start()))
                .ok_or_else(usage)?,
        };
        if start.is_empty() || end.is_empty() {
            return Err(usage());
        }
        let start = parse_coordinate(start)?;
        let end = parse_coordinate(end)?;
        Self::new(chromosome, start, end)
    }

    #[must_use]
    pub fn width(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

impl Display for GenomicRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

fn parse_coordinate(raw: &str) -> Result<u64, ValidationError> {
    let well_formed = raw
        .split(',')
        .all(|group| !group.is_empty() && group.chars().all(|c| c.is_ascii_digit()));
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    if !well_formed {
        return Err(ValidationError(format!(
            "region coordinate `{raw}` must be a non-negative integer"
        )));
    }
    digits
        .parse::<u64>()
        .map_err(|e| ValidationError(format!("region coordinate `{raw}` out of range: {e}")))
}

/// `ceil(width * factor)`: the number of base pairs aggregated into one signal sample.
#[must_use]
pub fn bin_size_for_width(width: u64, resolution_factor: f64) -> u64 {
    (width as f64 * resolution_factor).ceil() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewportState {
    pub chromosome: Chromosome,
    pub visible_start: u64,
    pub visible_end: u64,
    pub bin_size: u64,
}

impl ViewportState {
    #[must_use]
    pub fn from_range(range: &GenomicRange, resolution_factor: f64) -> Self {
        Self {
            chromosome: range.chromosome.clone(),
            visible_start: range.start,
            visible_end: range.end,
            bin_size: bin_size_for_width(range.width(), resolution_factor),
        }
    }

    #[must_use]
    pub fn range(&self) -> GenomicRange {
        GenomicRange {
            chromosome: self.chromosome.clone(),
            start: self.visible_start,
            end: self.visible_end,
        }
    }

    /// A re-fetch is needed when the bin size changed or the window moved.
    #[must_use]
    pub fn differs_materially(&self, other: &ViewportState) -> bool {
        self.bin_size != other.bin_size
            || self.chromosome != other.chromosome
            || self.visible_start != other.visible_start
            || self.visible_end != other.visible_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromosome_gets_prefix() {
        assert_eq!(Chromosome::parse("1").expect("chr").as_str(), "chr1");
        assert_eq!(Chromosome::parse("chrX").expect("chr").as_str(), "chrX");
        assert_eq!(Chromosome::parse("CHR7").expect("chr").as_str(), "chr7");
        assert!(Chromosome::parse("chr 1").is_err());
    }

    #[test]
    fn region_formats_are_accepted() {
        for raw in ["chr1:1000-2000", "1:1,000-2,000", "chr1 1000 2000", " chr1:1000 - 2000 "] {
            let range = GenomicRange::parse(raw).expect(raw);
            assert_eq!(range.canonical_string(), "chr1:1000-2000");
        }
    }

    #[test]
    fn malformed_or_inverted_regions_are_rejected() {
        assert!(GenomicRange::parse("chr1:2000-1000").is_err());
        assert!(GenomicRange::parse("chr1:1000-1000").is_err());
        assert!(GenomicRange::parse("chr1").is_err());
        assert!(GenomicRange::parse("chr1:abc-200").is_err());
        assert!(GenomicRange::parse("chr1:1-2-3").is_err());
        for raw in [
            "chr1:-5-10",
            "chr1::5-10",
            "chr1:5--10",
            "chr1:5 - - 10",
            "chr1:5,,,-10",
            "chr1:,5-10",
            "chr1:5-10,",
            "chr1:5-",
            "chr1 5 10 20",
        ] {
            assert!(GenomicRange::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn bin_size_follows_resolution_factor() {
        assert_eq!(bin_size_for_width(1_000_000, DEFAULT_RESOLUTION_FACTOR), 2000);
        assert_eq!(bin_size_for_width(1, DEFAULT_RESOLUTION_FACTOR), 1);
        assert_eq!(bin_size_for_width(1_001, DEFAULT_RESOLUTION_FACTOR), 3);
    }

    #[test]
    fn viewport_difference_tracks_pan_and_zoom() {
        let a = GenomicRange::parse("chr1:1000000-2000000").expect("range");
        let panned = GenomicRange::parse("chr1:1500000-2500000").expect("range");
        let va = ViewportState::from_range(&a, DEFAULT_RESOLUTION_FACTOR);
        let vp = ViewportState::from_range(&panned, DEFAULT_RESOLUTION_FACTOR);
        assert_eq!(va.bin_size, vp.bin_size);
        assert!(va.differs_materially(&vp));
        assert!(!va.differs_materially(&va.clone()));
    }
}
