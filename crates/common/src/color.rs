//! Chat color registry: the platform's supported name-color presets and the
//! mapping from an arbitrary hex color to the nearest preset.

use {serde::Serialize, thiserror::Error};

/// The name colors the platform accepts for a bot's chat identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatColor {
    #[default]
    Blue,
    Coral,
    DodgerBlue,
    SpringGreen,
    YellowGreen,
    Green,
    OrangeRed,
    Red,
    GoldenRod,
    HotPink,
    CadetBlue,
    SeaGreen,
    Chocolate,
    BlueViolet,
    Firebrick,
}

/// Failure to interpret a caller-supplied hex color.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorParseError {
    #[error("expected a 6-digit hex color, got {0:?}")]
    BadLength(String),
    #[error("invalid hex digit in color {0:?}")]
    BadDigit(String),
}

impl ChatColor {
    /// All presets, for iteration.
    pub const ALL: &'static [ChatColor] = &[
        Self::Blue,
        Self::Coral,
        Self::DodgerBlue,
        Self::SpringGreen,
        Self::YellowGreen,
        Self::Green,
        Self::OrangeRed,
        Self::Red,
        Self::GoldenRod,
        Self::HotPink,
        Self::CadetBlue,
        Self::SeaGreen,
        Self::Chocolate,
        Self::BlueViolet,
        Self::Firebrick,
    ];

    /// Canonical `RRGGBB` code for this preset.
    #[must_use]
    pub fn hex(&self) -> &'static str {
        match self {
            Self::Blue => "0000FF",
            Self::Coral => "FF7F50",
            Self::DodgerBlue => "1E90FF",
            Self::SpringGreen => "00FF7F",
            Self::YellowGreen => "9ACD32",
            Self::Green => "008000",
            Self::OrangeRed => "FF4500",
            Self::Red => "FF0000",
            Self::GoldenRod => "DAA520",
            Self::HotPink => "FF69B4",
            Self::CadetBlue => "5F9EA0",
            Self::SeaGreen => "2E8B57",
            Self::Chocolate => "D2691E",
            Self::BlueViolet => "8A2BE2",
            Self::Firebrick => "B22222",
        }
    }

    fn rgb(&self) -> (i32, i32, i32) {
        // Presets carry known-good codes; the parse cannot fail.
        parse_hex(self.hex()).unwrap_or((0, 0, 0))
    }

    /// Map an arbitrary `RRGGBB` / `#RRGGBB` color to the preset with the
    /// smallest squared RGB distance.
    pub fn nearest(hex: &str) -> Result<ChatColor, ColorParseError> {
        let (r, g, b) = parse_hex(hex)?;
        let mut closest = ChatColor::Blue;
        let mut best = i32::MAX;
        for preset in Self::ALL {
            let (pr, pg, pb) = preset.rgb();
            let diff = (r - pr).pow(2) + (g - pg).pow(2) + (b - pb).pow(2);
            if diff < best {
                closest = *preset;
                best = diff;
            }
        }
        Ok(closest)
    }
}

impl std::fmt::Display for ChatColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

fn parse_hex(hex: &str) -> Result<(i32, i32, i32), ColorParseError> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 {
        return Err(ColorParseError::BadLength(hex.to_string()));
    }
    let channel = |range: std::ops::Range<usize>| {
        i32::from_str_radix(&digits[range], 16)
            .map_err(|_| ColorParseError::BadDigit(hex.to_string()))
    };
    Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}
