// Firmware version comparison
//
// Versions are dotted decimal strings (`major.minor[.patch]`). Parsing is
// forgiving in the same way the version file on the server is: trailing
// junk and extra segments are ignored, a missing minor/patch counts as 0.

use core::cmp::Ordering;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionTriple {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse a dotted version. Returns `None` when not even the major
    /// component is numeric, or when any component overflows `u32`.
    pub fn parse(input: &str) -> Option<Self> {
        let mut rest = input.trim_start();
        let mut parts = [0u32; 3];
        let mut parsed = 0;

        while parsed < parts.len() {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                break;
            }
            // A component too large for u32 makes the whole version unusable
            let Ok(value) = rest[..digits].parse::<u32>() else {
                return None;
            };
            parts[parsed] = value;
            parsed += 1;

            rest = &rest[digits..];
            match rest.strip_prefix('.') {
                Some(next) => rest = next,
                None => break,
            }
        }

        if parsed == 0 {
            return None;
        }

        Some(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Result of comparing version `a` against version `b`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    /// `a` is older than `b`
    Older,
    Same,
    /// `a` is newer than `b`
    Newer,
    /// At least one side did not parse
    Invalid,
}

impl VersionOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionOrdering::Older => "OLDER",
            VersionOrdering::Same => "SAME",
            VersionOrdering::Newer => "NEWER",
            VersionOrdering::Invalid => "INVALID",
        }
    }
}

/// Compare two version strings. Total over all inputs.
pub fn compare(a: &str, b: &str) -> VersionOrdering {
    let (Some(a), Some(b)) = (VersionTriple::parse(a), VersionTriple::parse(b)) else {
        return VersionOrdering::Invalid;
    };

    match a.cmp(&b) {
        Ordering::Less => VersionOrdering::Older,
        Ordering::Equal => VersionOrdering::Same,
        Ordering::Greater => VersionOrdering::Newer,
    }
}
