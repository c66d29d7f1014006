//! The fixed color palette.
//!
//! Every cell color and every agent default color is a member of
//! [`PALETTE`]. Parsing is case-insensitive and tolerates a missing leading
//! `#`, but the canonical form is always upper-case `#RRGGBB`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A palette color, stored as packed RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(u32);

/// The sixteen colors agents may place.
pub const PALETTE: [Color; 16] = [
    Color(0xFFFFFF), // white
    Color(0xC0C0C0), // silver
    Color(0x808080), // gray
    Color(0x000000), // black
    Color(0xFF0000), // red
    Color(0xFFA500), // orange
    Color(0xFFFF00), // yellow
    Color(0x00FF00), // lime
    Color(0x008000), // green
    Color(0x00FFFF), // cyan
    Color(0x0000FF), // blue
    Color(0x000080), // navy
    Color(0x800080), // purple
    Color(0xFF00FF), // magenta
    Color(0xFFC0CB), // pink
    Color(0x8B4513), // brown
];

/// Error returned when a string is not a palette member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{input}' is not a palette color")]
pub struct UnknownColor {
    pub input: String,
}

impl Color {
    /// Packed `0xRRGGBB` value.
    pub fn rgb(self) -> u32 {
        self.0
    }

    /// Canonical `#RRGGBB` form.
    pub fn to_hex(self) -> String {
        format!("#{:06X}", self.0)
    }

    /// Look a color up in the palette.
    ///
    /// Accepts `#rrggbb` or `rrggbb` in any letter case. Anything that is not
    /// exactly six hex digits, or that decodes to a non-palette RGB value, is
    /// rejected.
    pub fn parse(input: &str) -> Result<Self, UnknownColor> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let unknown = || UnknownColor {
            input: input.to_string(),
        };

        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(unknown());
        }
        let rgb = u32::from_str_radix(digits, 16).map_err(|_| unknown())?;

        PALETTE
            .iter()
            .copied()
            .find(|color| color.0 == rgb)
            .ok_or_else(unknown)
    }

    /// Pick a uniformly random palette color (used for agent defaults).
    pub fn random() -> Self {
        use rand::seq::IndexedRandom;
        PALETTE
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(PALETTE[0])
    }
}

/// The palette as canonical hex strings, for client-facing error details.
pub fn palette_hex() -> Vec<String> {
    PALETTE.iter().map(|c| c.to_hex()).collect()
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.0)
    }
}

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Color::parse(&raw).map_err(serde::de::Error::custom)
    }
}
