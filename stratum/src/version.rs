//! Dotted version parsing and ordering.
//!
//! Versions are dot- or underscore-separated sequences of numeric
//! components ("1.2", "2.0.1", "1_3"). Comparison is componentwise numeric,
//! left to right, with missing trailing components treated as zero, so
//! "1.2" == "1.2.0" and "2.0.1" > "2.0".

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

/// A parsed version: the numeric components plus the original label.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    label: String,
}

impl Version {
    /// Parse a version string that must consist entirely of numeric
    /// components. Used for configured version values, where junk is a
    /// configuration mistake rather than a folder-naming liberty.
    pub fn parse(text: &str) -> Option<Self> {
        let re = Regex::new(r"^\d+(?:[._]\d+)*$").expect("valid version pattern");
        if !re.is_match(text) {
            return None;
        }
        Self::from_components(text)
    }

    /// Extract a version from a folder name by taking the leading numeric
    /// run ("1.1-members" -> 1.1). Returns None for names with no leading
    /// numeric run; callers log a warning and skip the folder.
    pub fn from_folder(name: &str) -> Option<Self> {
        let re = Regex::new(r"^(\d+(?:[._]\d+)*)").expect("valid version pattern");
        let m = re.captures(name)?;
        Self::from_components(m.get(1).expect("group 1 always present").as_str())
    }

    fn from_components(text: &str) -> Option<Self> {
        let components = text
            .split(['.', '_'])
            .map(|c| c.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()?;
        Some(Self {
            components,
            label: text.to_string(),
        })
    }

    /// The numeric run as written, e.g. "1.1" for folder "1.1-members".
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}
