//! Slot addressing: one scheme over three AMS topologies.
//!
//! A printer can carry up to four quad-slot AMS units (ids 0–3), up to eight
//! single-slot high-temperature units (ids 128–135) and two external spool
//! holders (254 = left, 255 = right). Every addressable slot maps to a stable
//! display name and to one bit of the printer's 32-bit "tray reading" mask:
//!
//! | topology  | unit ids | trays | bits    |
//! |-----------|----------|-------|---------|
//! | quad      | 0–3      | 0–3   | 0–15    |
//! | high-temp | 128–135  | 0     | 16–23   |
//! | external  | 254–255  | 0     | 24–25   |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const QUAD_UNITS: std::ops::RangeInclusive<u8> = 0..=3;
const HIGH_TEMP_UNITS: std::ops::RangeInclusive<u8> = 128..=135;
const EXTERNAL_UNITS: std::ops::RangeInclusive<u8> = 254..=255;

const QUAD_TRAYS: u8 = 4;
const HIGH_TEMP_BIT_BASE: u8 = 16;
const EXTERNAL_BIT_BASE: u8 = 24;

/// The physical family an AMS unit id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Quad,
    HighTemp,
    External,
}

impl Topology {
    /// Classify a unit id. `None` for ids outside the closed set.
    pub fn of(unit_id: u8) -> Option<Self> {
        if QUAD_UNITS.contains(&unit_id) {
            Some(Topology::Quad)
        } else if HIGH_TEMP_UNITS.contains(&unit_id) {
            Some(Topology::HighTemp)
        } else if EXTERNAL_UNITS.contains(&unit_id) {
            Some(Topology::External)
        } else {
            None
        }
    }

    /// Number of trays a unit of this family exposes.
    pub fn tray_count(self) -> u8 {
        match self {
            Topology::Quad => QUAD_TRAYS,
            Topology::HighTemp | Topology::External => 1,
        }
    }
}

/// A tray slot on a printer: `(unit_id, tray_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub unit_id: u8,
    pub tray_index: u8,
}

impl SlotAddress {
    pub const fn new(unit_id: u8, tray_index: u8) -> Self {
        Self {
            unit_id,
            tray_index,
        }
    }

    /// The topology family, if the address is structurally valid
    /// (known unit id and a tray index that unit actually has).
    pub fn topology(&self) -> Option<Topology> {
        Topology::of(self.unit_id).filter(|t| self.tray_index < t.tray_count())
    }

    pub fn is_addressable(&self) -> bool {
        self.topology().is_some()
    }

    /// Human-readable slot name: `A1`, `D4`, `HT-B`, `EXT-L`.
    pub fn display_name(&self) -> String {
        match Topology::of(self.unit_id) {
            Some(Topology::Quad) => {
                format!("{}{}", unit_letter(self.unit_id), self.tray_index as u32 + 1)
            }
            Some(Topology::HighTemp) => format!("HT-{}", unit_letter(self.unit_id - 128)),
            Some(Topology::External) if self.unit_id == 254 => "EXT-L".into(),
            Some(Topology::External) => "EXT-R".into(),
            None => format!("Slot {}", self.tray_index as u32 + 1),
        }
    }

    /// Bit index of this slot in the printer's tray-reading mask.
    pub fn bit_position(&self) -> Result<u8> {
        match self.topology() {
            Some(Topology::Quad) => Ok(self.unit_id * QUAD_TRAYS + self.tray_index),
            Some(Topology::HighTemp) => Ok(HIGH_TEMP_BIT_BASE + (self.unit_id - 128)),
            Some(Topology::External) => Ok(EXTERNAL_BIT_BASE + (self.unit_id - 254)),
            None => Err(Error::UnaddressableSlot(*self)),
        }
    }

    /// Every addressable slot, in bit order.
    pub fn all_addressable() -> Vec<SlotAddress> {
        let quad = QUAD_UNITS.flat_map(|u| (0..QUAD_TRAYS).map(move |t| SlotAddress::new(u, t)));
        let single = HIGH_TEMP_UNITS
            .chain(EXTERNAL_UNITS)
            .map(|u| SlotAddress::new(u, 0));
        quad.chain(single).collect()
    }
}

fn unit_letter(offset: u8) -> char {
    (b'A' + offset) as char
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognised slot name '{0}' (expected e.g. A1, D4, HT-A, EXT-L)")]
pub struct ParseSlotError(String);

impl FromStr for SlotAddress {
    type Err = ParseSlotError;

    /// Parses the display names produced by [`SlotAddress::display_name`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let err = || ParseSlotError(s.to_string());

        match upper.as_str() {
            "EXT-L" => return Ok(SlotAddress::new(254, 0)),
            "EXT-R" => return Ok(SlotAddress::new(255, 0)),
            _ => {}
        }

        if let Some(letter) = upper.strip_prefix("HT-") {
            let offset = single_letter(letter).ok_or_else(err)?;
            let addr = SlotAddress::new(128u8.checked_add(offset).ok_or_else(err)?, 0);
            return addr.is_addressable().then_some(addr).ok_or_else(err);
        }

        let mut chars = upper.chars();
        let unit = chars.next().ok_or_else(err)?;
        let tray: u8 = chars.as_str().parse().map_err(|_| err())?;
        let unit_offset = single_letter(&unit.to_string()).ok_or_else(err)?;
        if tray == 0 {
            return Err(err());
        }
        let addr = SlotAddress::new(unit_offset, tray - 1);
        match addr.topology() {
            Some(Topology::Quad) => Ok(addr),
            _ => Err(err()),
        }
    }
}

fn single_letter(s: &str) -> Option<u8> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() => Some(c as u8 - b'A'),
        _ => None,
    }
}

/// A printer's tray-reading mask as reported by the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingMask {
    /// The device has not reported a mask (negative sentinel upstream).
    Unknown,
    Known(u32),
}

impl ReadingMask {
    /// Interpret a raw upstream value. Negative or wider than 32 bits means unknown.
    pub fn from_raw(raw: i64) -> Self {
        u32::try_from(raw).map_or(ReadingMask::Unknown, ReadingMask::Known)
    }

    /// Whether the given slot is currently being read (RFID scan in progress).
    pub fn is_reading(&self, addr: &SlotAddress) -> bool {
        is_reading(*self, addr)
    }
}

/// Free-function form of [`ReadingMask::is_reading`].
pub fn is_reading(mask: ReadingMask, addr: &SlotAddress) -> bool {
    let ReadingMask::Known(bits) = mask else {
        return false;
    };
    match addr.bit_position() {
        Ok(bit) => bits & (1u32 << bit) != 0,
        Err(_) => false,
    }
}
