//! Physical link attributes: speed, duplex and operational state.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Negotiated speed of a physical link.
///
/// Each speed carries a small index (1..=17) that link-aggregation protocols
/// fold into their port keys, plus its nominal bandwidth in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LinkSpeed {
    /// Speed not reported by the driver.
    #[default]
    Unknown,
    Mb1,
    Mb10,
    Mb100,
    Gb1,
    Gb2_5,
    Gb5,
    Gb10,
    Gb14,
    Gb20,
    Gb25,
    Gb40,
    Gb50,
    Gb56,
    Gb100,
    Gb200,
    Gb400,
    Gb800,
}

impl LinkSpeed {
    /// All known speeds in ascending order.
    pub const ALL: [LinkSpeed; 17] = [
        LinkSpeed::Mb1,
        LinkSpeed::Mb10,
        LinkSpeed::Mb100,
        LinkSpeed::Gb1,
        LinkSpeed::Gb2_5,
        LinkSpeed::Gb5,
        LinkSpeed::Gb10,
        LinkSpeed::Gb14,
        LinkSpeed::Gb20,
        LinkSpeed::Gb25,
        LinkSpeed::Gb40,
        LinkSpeed::Gb50,
        LinkSpeed::Gb56,
        LinkSpeed::Gb100,
        LinkSpeed::Gb200,
        LinkSpeed::Gb400,
        LinkSpeed::Gb800,
    ];

    /// Compact index of this speed, 0 for [`LinkSpeed::Unknown`].
    pub const fn index(&self) -> u8 {
        match self {
            LinkSpeed::Unknown => 0,
            LinkSpeed::Mb1 => 1,
            LinkSpeed::Mb10 => 2,
            LinkSpeed::Mb100 => 3,
            LinkSpeed::Gb1 => 4,
            LinkSpeed::Gb2_5 => 5,
            LinkSpeed::Gb5 => 6,
            LinkSpeed::Gb10 => 7,
            LinkSpeed::Gb14 => 8,
            LinkSpeed::Gb20 => 9,
            LinkSpeed::Gb25 => 10,
            LinkSpeed::Gb40 => 11,
            LinkSpeed::Gb50 => 12,
            LinkSpeed::Gb56 => 13,
            LinkSpeed::Gb100 => 14,
            LinkSpeed::Gb200 => 15,
            LinkSpeed::Gb400 => 16,
            LinkSpeed::Gb800 => 17,
        }
    }

    /// Nominal bandwidth in Mbps (0 when unknown).
    pub const fn mbps(&self) -> u32 {
        match self {
            LinkSpeed::Unknown => 0,
            LinkSpeed::Mb1 => 1,
            LinkSpeed::Mb10 => 10,
            LinkSpeed::Mb100 => 100,
            LinkSpeed::Gb1 => 1_000,
            LinkSpeed::Gb2_5 => 2_500,
            LinkSpeed::Gb5 => 5_000,
            LinkSpeed::Gb10 => 10_000,
            LinkSpeed::Gb14 => 14_000,
            LinkSpeed::Gb20 => 20_000,
            LinkSpeed::Gb25 => 25_000,
            LinkSpeed::Gb40 => 40_000,
            LinkSpeed::Gb50 => 50_000,
            LinkSpeed::Gb56 => 56_000,
            LinkSpeed::Gb100 => 100_000,
            LinkSpeed::Gb200 => 200_000,
            LinkSpeed::Gb400 => 400_000,
            LinkSpeed::Gb800 => 800_000,
        }
    }

    /// Maps a driver-reported speed in Mbps to a known speed.
    pub fn from_mbps(mbps: u32) -> LinkSpeed {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.mbps() == mbps)
            .unwrap_or(LinkSpeed::Unknown)
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkSpeed::Unknown => "unknown",
            LinkSpeed::Mb1 => "1M",
            LinkSpeed::Mb10 => "10M",
            LinkSpeed::Mb100 => "100M",
            LinkSpeed::Gb1 => "1G",
            LinkSpeed::Gb2_5 => "2.5G",
            LinkSpeed::Gb5 => "5G",
            LinkSpeed::Gb10 => "10G",
            LinkSpeed::Gb14 => "14G",
            LinkSpeed::Gb20 => "20G",
            LinkSpeed::Gb25 => "25G",
            LinkSpeed::Gb40 => "40G",
            LinkSpeed::Gb50 => "50G",
            LinkSpeed::Gb56 => "56G",
            LinkSpeed::Gb100 => "100G",
            LinkSpeed::Gb200 => "200G",
            LinkSpeed::Gb400 => "400G",
            LinkSpeed::Gb800 => "800G",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LinkSpeed {
    type Err = ParseError;

    /// Accepts the display form ("25G", "100M") or a plain Mbps count ("25000").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unknown") {
            return Ok(LinkSpeed::Unknown);
        }
        if let Ok(mbps) = trimmed.parse::<u32>() {
            return match LinkSpeed::from_mbps(mbps) {
                LinkSpeed::Unknown => Err(ParseError::InvalidLinkSpeed(s.to_string())),
                speed => Ok(speed),
            };
        }
        Self::ALL
            .iter()
            .copied()
            .find(|speed| speed.to_string().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseError::InvalidLinkSpeed(s.to_string()))
    }
}

impl TryFrom<String> for LinkSpeed {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LinkSpeed> for String {
    fn from(speed: LinkSpeed) -> String {
        speed.to_string()
    }
}

/// Duplex mode of a physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    /// Half duplex (default until the driver reports otherwise).
    #[default]
    Half,
    /// Full duplex.
    Full,
}

impl Duplex {
    /// Returns true for full duplex.
    pub const fn is_full(&self) -> bool {
        matches!(self, Duplex::Full)
    }
}

impl fmt::Display for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Duplex::Half => write!(f, "half"),
            Duplex::Full => write!(f, "full"),
        }
    }
}

impl FromStr for Duplex {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "half" => Ok(Duplex::Half),
            "full" => Ok(Duplex::Full),
            _ => Err(ParseError::InvalidDuplex(s.to_string())),
        }
    }
}
