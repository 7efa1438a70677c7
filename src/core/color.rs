//! # Colors
//!
//! Bar colors are always emitted as `#AARRGGBB`. Users may write the
//! shorter forms too; everything is normalized at construction so a
//! malformed color fails at config time, never at render time.
//!
//! | Input       | Normalized  |
//! |-------------|-------------|
//! | `#F00`      | `#FFFF0000` |
//! | `#8F00`     | `#88FF0000` |
//! | `#1793D1`   | `#FF1793D1` |
//! | `#801793D1` | `#801793D1` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorError(pub String);

impl fmt::Display for ColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid color format", self.0)
    }
}

impl std::error::Error for ColorError {}

impl Color {
    pub const WHITE: Color = Color::rgb(0xFF, 0xFF, 0xFF);
    pub const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);
    pub const RED: Color = Color::rgb(0xFF, 0x00, 0x00);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { a: 0xFF, r, g, b }
    }

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    /// Parses `#RGB`, `#ARGB`, `#RRGGBB` or `#AARRGGBB` (case insensitive).
    pub fn parse(spec: &str) -> Result<Self, ColorError> {
        let err = || ColorError(spec.to_string());
        let hex = spec.strip_prefix('#').ok_or_else(err)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err());
        }

        // Short forms double each nibble: "F" -> 0xFF.
        let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).map(|n| n * 0x11);
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);

        let parsed = match hex.len() {
            3 => (Ok(0xFF), nibble(0), nibble(1), nibble(2)),
            4 => (nibble(0), nibble(1), nibble(2), nibble(3)),
            6 => (Ok(0xFF), byte(0), byte(2), byte(4)),
            8 => (byte(0), byte(2), byte(4), byte(6)),
            _ => return Err(err()),
        };

        match parsed {
            (Ok(a), Ok(r), Ok(g), Ok(b)) => Ok(Self { a, r, g, b }),
            _ => Err(err()),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_forms_double_nibbles() {
        assert_eq!(Color::parse("#F00").unwrap().to_string(), "#FFFF0000");
        assert_eq!(Color::parse("#8f00").unwrap().to_string(), "#88FF0000");
        assert_eq!(Color::parse("#944B").unwrap().to_string(), "#994444BB");
    }

    #[test]
    fn test_long_forms_keep_bytes() {
        assert_eq!(Color::parse("#1793D1").unwrap().to_string(), "#FF1793D1");
        assert_eq!(Color::parse("#FF02F3DD").unwrap().to_string(), "#FF02F3DD");
        assert_eq!(Color::parse("#00000000").unwrap(), Color::argb(0, 0, 0, 0));
    }

    #[test]
    fn test_invalid_colors_are_rejected() {
        for bad in ["", "F00", "#", "#12", "#12345", "#GGG", "#1234567", "red", "#+1F"] {
            assert!(Color::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_constants_render() {
        assert_eq!(Color::WHITE.to_string(), "#FFFFFFFF");
        assert_eq!(Color::BLACK.to_string(), "#FF000000");
        assert_eq!(Color::RED.to_string(), "#FFFF0000");
    }

    #[test]
    fn test_deserialize_from_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            color: Color,
        }
        let w: Wrapper = toml::from_str(r##"color = "#EEE""##).unwrap();
        assert_eq!(w.color, Color::rgb(0xEE, 0xEE, 0xEE));

        let bad: Result<Wrapper, _> = toml::from_str(r##"color = "#EEEE1""##);
        assert!(bad.is_err());
    }
}
