//! Composite patch key derived from the four categorical layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator of the textual key form used by the value store.
pub const KEY_DELIMITER: char = ':';

/// Identity of one patch: its basin, hillslope, zone and patch ids.
///
/// The struct itself is the index key, so distinct 4-tuples never collide.
/// The textual form `basin:hillslope:zone:patch` only exists to talk to the
/// value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchKey {
    pub basin: u32,
    pub hillslope: u32,
    pub zone: u32,
    pub patch: u32,
}

impl PatchKey {
    pub fn new(basin: u32, hillslope: u32, zone: u32, patch: u32) -> Self {
        Self {
            basin,
            hillslope,
            zone,
            patch,
        }
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
            self.basin, self.hillslope, self.zone, self.patch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a canonical patch key: {0:?}")]
pub struct ParsePatchKeyError(pub String);

impl FromStr for PatchKey {
    type Err = ParsePatchKeyError;

    /// Accepts exactly the strings [`PatchKey`]'s `Display` produces, so a parse
    /// succeeds iff the identifier equals some key's textual form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePatchKeyError(s.to_string());
        let mut fields = [0u32; 4];
        let mut parts = s.split(KEY_DELIMITER);
        for field in &mut fields {
            let part = parts.next().ok_or_else(err)?;
            *field = parse_canonical_u32(part).ok_or_else(err)?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(fields[0], fields[1], fields[2], fields[3]))
    }
}

/// Plain decimal digits, no sign, no leading zeros (except "0" itself).
fn parse_canonical_u32(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    s.parse().ok()
}
