//! Unit filter
//!
//! A server resource services a configurable subset of the 256 possible
//! unit ids: a 32-byte bit map (bit `u` set means unit `u` is serviced)
//! combined with a broadcast flag. A missing map accepts every unit.

use std::fmt;
use std::str::FromStr;

use crate::UNIT_MAP_SIZE;

/// Decides whether a received unit id is serviced by this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFilter {
    map: Option<Box<[u8; UNIT_MAP_SIZE]>>,
    broadcast_enabled: bool,
}

impl Default for UnitFilter {
    fn default() -> Self {
        Self {
            map: None,
            broadcast_enabled: true,
        }
    }
}

impl UnitFilter {
    /// Filter with no unit map (all units accepted) and broadcast enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether requests to unit 0 are treated as broadcast.
    pub fn is_broadcast_enabled(&self) -> bool {
        self.broadcast_enabled
    }

    pub fn set_broadcast_enabled(&mut self, enable: bool) {
        self.broadcast_enabled = enable;
    }

    /// Whether this unit id addresses a broadcast request.
    pub fn is_broadcast(&self, unit: u8) -> bool {
        unit == 0 && self.broadcast_enabled
    }

    /// Whether a received request for `unit` is serviced here.
    pub fn is_accepted(&self, unit: u8) -> bool {
        if self.map.is_none() || self.is_broadcast(unit) {
            return true;
        }
        self.is_unit_set(unit)
    }

    /// Raw unit map, if one is installed.
    pub fn unit_map(&self) -> Option<&[u8; UNIT_MAP_SIZE]> {
        self.map.as_deref()
    }

    /// Install or remove the unit map. The map is copied.
    pub fn set_unit_map(&mut self, map: Option<&[u8; UNIT_MAP_SIZE]>) {
        self.map = map.map(|m| Box::new(*m));
    }

    /// Enable or disable a single unit, lazily allocating a zeroed map on
    /// the first enable.
    pub fn set_unit_enabled(&mut self, unit: u8, enable: bool) {
        let map = self
            .map
            .get_or_insert_with(|| Box::new([0u8; UNIT_MAP_SIZE]));
        let byte = &mut map[unit as usize / 8];
        let bit = 1u8 << (unit % 8);
        if enable {
            *byte |= bit;
        } else {
            *byte &= !bit;
        }
    }

    /// Whether the map bit for `unit` is set. With no map installed this is
    /// false; use [`UnitFilter::is_accepted`] for the full predicate.
    pub fn is_unit_set(&self, unit: u8) -> bool {
        self.map
            .as_ref()
            .map_or(false, |map| map[unit as usize / 8] & (1 << (unit % 8)) != 0)
    }

    /// String form of the unit map: comma-separated units and ranges, e.g.
    /// `"1,3,10-20"`. Empty when no map is installed.
    pub fn unit_map_string(&self) -> String {
        let Some(map) = self.map.as_ref() else {
            return String::new();
        };
        let mut parts = Vec::new();
        let mut run_start: Option<u16> = None;
        for unit in 0u16..=256 {
            let set = unit < 256 && map[unit as usize / 8] & (1 << (unit % 8)) != 0;
            match (run_start, set) {
                (None, true) => run_start = Some(unit),
                (Some(start), false) => {
                    let end = unit - 1;
                    if start == end {
                        parts.push(format!("{}", start));
                    } else {
                        parts.push(format!("{}-{}", start, end));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        parts.join(",")
    }

    /// Install a unit map from its string form. An empty string removes the
    /// map.
    pub fn set_unit_map_string(&mut self, s: &str) -> Result<(), UnitMapParseError> {
        if s.trim().is_empty() {
            self.map = None;
            return Ok(());
        }
        let parsed: UnitFilter = s.parse()?;
        self.map = parsed.map;
        Ok(())
    }
}

/// Error parsing the string form of a unit map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid unit map element: {element}")]
pub struct UnitMapParseError {
    /// The element that failed to parse
    pub element: String,
}

impl FromStr for UnitFilter {
    type Err = UnitMapParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = UnitFilter::new();
        for element in s.split(',') {
            let element = element.trim();
            if element.is_empty() {
                continue;
            }
            let err = || UnitMapParseError {
                element: element.to_string(),
            };
            match element.split_once('-') {
                Some((start, end)) => {
                    let start: u8 = start.trim().parse().map_err(|_| err())?;
                    let end: u8 = end.trim().parse().map_err(|_| err())?;
                    if start > end {
                        return Err(err());
                    }
                    for unit in start..=end {
                        filter.set_unit_enabled(unit, true);
                    }
                }
                None => {
                    let unit: u8 = element.parse().map_err(|_| err())?;
                    filter.set_unit_enabled(unit, true);
                }
            }
        }
        Ok(filter)
    }
}

impl fmt::Display for UnitFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unit_map_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_map_accepts_everything() {
        let filter = UnitFilter::new();
        for unit in 0..=255u8 {
            assert!(filter.is_accepted(unit));
        }
    }

    #[test]
    fn test_broadcast_flag_governs_unit_zero() {
        let mut filter = UnitFilter::new();
        filter.set_unit_enabled(1, true); // allocates a map with only unit 1
        assert!(filter.is_accepted(0)); // broadcast enabled by default
        filter.set_broadcast_enabled(false);
        assert!(!filter.is_accepted(0));
        assert!(filter.is_accepted(1));
        assert!(!filter.is_accepted(2));
    }

    #[test]
    fn test_set_unit_enabled_lazily_allocates() {
        let mut filter = UnitFilter::new();
        assert!(filter.unit_map().is_none());
        filter.set_unit_enabled(9, true);
        let map = filter.unit_map().unwrap();
        assert_eq!(map[1], 0x02);
        assert!(filter.is_unit_set(9));
        filter.set_unit_enabled(9, false);
        assert!(!filter.is_unit_set(9));
        // disabling keeps the (now empty) map installed
        assert!(filter.unit_map().is_some());
        assert!(!filter.is_accepted(9));
    }

    #[test]
    fn test_map_is_copied_on_install() {
        let mut source = [0u8; UNIT_MAP_SIZE];
        source[0] = 0xFF;
        source[1] = 0x01;
        let mut filter = UnitFilter::new();
        filter.set_unit_map(Some(&source));
        source[0] = 0x00;
        assert!(filter.is_unit_set(7));
        assert!(filter.is_unit_set(8));
        assert!(!filter.is_unit_set(9));
    }

    #[test]
    fn test_string_round_trip() {
        let filter: UnitFilter = "1,3,10-20".parse().unwrap();
        assert!(filter.is_unit_set(1));
        assert!(!filter.is_unit_set(2));
        assert!(filter.is_unit_set(3));
        assert!(filter.is_unit_set(10));
        assert!(filter.is_unit_set(20));
        assert!(!filter.is_unit_set(21));
        assert_eq!(filter.unit_map_string(), "1,3,10-20");

        let filter: UnitFilter = "250-255".parse().unwrap();
        assert!(filter.is_unit_set(255));
        assert_eq!(filter.unit_map_string(), "250-255");
    }

    #[test]
    fn test_string_parse_errors() {
        assert!("abc".parse::<UnitFilter>().is_err());
        assert!("5-1".parse::<UnitFilter>().is_err());
        assert!("300".parse::<UnitFilter>().is_err());
    }

    #[test]
    fn test_empty_string_removes_map() {
        let mut filter: UnitFilter = "1-5".parse().unwrap();
        assert!(filter.unit_map().is_some());
        filter.set_unit_map_string("").unwrap();
        assert!(filter.unit_map().is_none());
        assert!(filter.is_accepted(200));
    }
}
