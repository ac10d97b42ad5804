//! Ordering of release version folders.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Pre-release stage, ordered alpha < beta < release candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha(u32),
    Beta(u32),
    Candidate(u32),
}

/// A parsed version folder such as `55.0`, `55.0.1`, `56.0b3` or `52.0esr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveVersion {
    raw: String,
    numbers: Vec<u64>,
    pre: Option<PreRelease>,
    esr: bool,
}

impl ArchiveVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a version folder should be crawled at all.
    pub fn is_indexable_folder(name: &str) -> bool {
        !name.contains("funnelcake") && name.parse::<ArchiveVersion>().is_ok()
    }

    fn number(&self, idx: usize) -> u64 {
        self.numbers.get(idx).copied().unwrap_or(0)
    }
}

impl FromStr for ArchiveVersion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::validation(format!("unparseable version '{s}'"));

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (numeric, suffix) = s.split_at(split);
        if numeric.is_empty() || numeric.starts_with('.') || numeric.ends_with('.') {
            return Err(invalid());
        }
        let numbers = numeric
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let (pre, esr) = match suffix {
            "" => (None, false),
            "esr" => (None, true),
            _ => {
                let digits = suffix
                    .find(|c: char| c.is_ascii_digit())
                    .ok_or_else(invalid)?;
                let (stage, n) = suffix.split_at(digits);
                let n: u32 = n.parse().map_err(|_| invalid())?;
                let pre = match stage {
                    "a" => PreRelease::Alpha(n),
                    "b" => PreRelease::Beta(n),
                    "rc" => PreRelease::Candidate(n),
                    _ => return Err(invalid()),
                };
                (Some(pre), false)
            }
        };

        Ok(Self {
            raw: s.to_string(),
            numbers,
            pre,
            esr,
        })
    }
}

impl Ord for ArchiveVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.numbers.len().max(other.numbers.len());
        for idx in 0..width {
            match self.number(idx).cmp(&other.number(idx)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // A final release sorts above any of its pre-releases.
        let stage = match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        };
        stage
            .then(self.esr.cmp(&other.esr))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ArchiveVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ArchiveVersion {
        s.parse().unwrap()
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert!(v("50.0") > v("49.0"));
        assert!(v("10.0") > v("9.0.1"));
        assert!(v("55.0.1") > v("55.0"));
        assert_eq!(v("55.0").cmp(&v("55.0")), Ordering::Equal);
    }

    #[test]
    fn prereleases_sort_below_final() {
        assert!(v("56.0b3") < v("56.0"));
        assert!(v("56.0b3") > v("56.0b2"));
        assert!(v("56.0b10") > v("56.0b9"));
        assert!(v("56.0a1") < v("56.0b1"));
        assert!(v("56.0rc1") > v("56.0b12"));
        assert!(v("56.0b1") > v("55.0.3"));
    }

    #[test]
    fn esr_orders_by_number() {
        assert!(v("52.0.1esr") > v("52.0esr"));
    }

    #[test]
    fn unindexable_folders() {
        assert!(ArchiveVersion::is_indexable_folder("55.0b3"));
        assert!(!ArchiveVersion::is_indexable_folder("55.0-funnelcake112"));
        assert!(!ArchiveVersion::is_indexable_folder("latest-beta"));
        assert!(!ArchiveVersion::is_indexable_folder("55.0.x"));
        assert!(!ArchiveVersion::is_indexable_folder(""));
    }
}
