//! Remote ID parameter table
//!
//! Typed, range-checked parameters that a SET_CONFIG command may change.

use std::collections::BTreeMap;
use std::fmt;

use remoteid_shared::ParameterStore;
use thiserror::Error;
use tracing::warn;

/// Longest value a text parameter holds
pub const MAX_TEXT_LEN: usize = 20;

#[derive(Error, Debug, PartialEq)]
pub enum ParamError {
    #[error("Unknown parameter {0}")]
    Unknown(String),

    #[error("Cannot parse {value:?} for {name}")]
    Parse { name: String, value: String },

    #[error("{name}={value} outside [{min}, {max}]")]
    OutOfRange { name: String, value: f64, min: f64, max: f64 },

    #[error("{name} too long: {len} chars (max: {MAX_TEXT_LEN})")]
    TooLong { name: String, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Uint8,
    Uint32,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Uint8(u8),
    Uint32(u32),
    Float(f32),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Uint8(v) => write!(f, "{}", v),
            ParamValue::Uint32(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

struct ParamDef {
    name: &'static str,
    ptype: ParamType,
    default: f64,
    min: f64,
    max: f64,
}

const fn def(name: &'static str, ptype: ParamType, default: f64, min: f64, max: f64) -> ParamDef {
    ParamDef {
        name,
        ptype,
        default,
        min,
        max,
    }
}

const PARAMS: &[ParamDef] = &[
    def("LOCK_LEVEL", ParamType::Uint8, 0.0, 0.0, 2.0),
    def("CAN_NODE", ParamType::Uint8, 0.0, 0.0, 127.0),
    def("UAS_ID", ParamType::Text, 0.0, 0.0, 0.0),
    def("BAUDRATE", ParamType::Uint32, 57600.0, 9600.0, 921600.0),
    def("WIFI_NAN_RATE", ParamType::Float, 0.0, 0.0, 5.0),
    def("BT4_RATE", ParamType::Float, 1.0, 0.0, 5.0),
    def("BT5_RATE", ParamType::Float, 1.0, 0.0, 5.0),
    def("WEBSERVER_ENABLE", ParamType::Uint8, 1.0, 0.0, 1.0),
    def("WIFI_SSID", ParamType::Text, 0.0, 0.0, 0.0),
    def("WIFI_PASSWORD", ParamType::Text, 0.0, 0.0, 0.0),
    def("BCAST_POWERUP", ParamType::Uint8, 1.0, 0.0, 1.0),
];

impl ParamDef {
    fn default_value(&self) -> ParamValue {
        match self.ptype {
            ParamType::Uint8 => ParamValue::Uint8(self.default as u8),
            ParamType::Uint32 => ParamValue::Uint32(self.default as u32),
            ParamType::Float => ParamValue::Float(self.default as f32),
            ParamType::Text => ParamValue::Text(String::new()),
        }
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ParamError> {
        let value = value.trim();

        if self.ptype == ParamType::Text {
            let len = value.chars().count();
            if len > MAX_TEXT_LEN {
                return Err(ParamError::TooLong {
                    name: self.name.into(),
                    len,
                });
            }
            return Ok(ParamValue::Text(value.to_string()));
        }

        let number: f64 = value
            .parse()
            .ok()
            .filter(|n: &f64| n.is_finite())
            .ok_or_else(|| ParamError::Parse {
                name: self.name.into(),
                value: value.into(),
            })?;

        if number < self.min || number > self.max {
            return Err(ParamError::OutOfRange {
                name: self.name.into(),
                value: number,
                min: self.min,
                max: self.max,
            });
        }

        let integral = number.fract() == 0.0;
        match self.ptype {
            ParamType::Uint8 if integral => Ok(ParamValue::Uint8(number as u8)),
            ParamType::Uint32 if integral => Ok(ParamValue::Uint32(number as u32)),
            ParamType::Float => Ok(ParamValue::Float(number as f32)),
            _ => Err(ParamError::Parse {
                name: self.name.into(),
                value: value.into(),
            }),
        }
    }
}

/// In-memory parameter store of a node
#[derive(Debug, Clone)]
pub struct ParameterTable {
    values: BTreeMap<&'static str, ParamValue>,
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterTable {
    /// Table with every parameter at its default
    pub fn new() -> Self {
        let values = PARAMS.iter().map(|p| (p.name, p.default_value())).collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Current LOCK_LEVEL. 0 means unlocked.
    pub fn lock_level(&self) -> u8 {
        match self.values.get("LOCK_LEVEL") {
            Some(ParamValue::Uint8(level)) => *level,
            _ => 0,
        }
    }

    /// Parse and store `value` for `name`
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ParamError> {
        let def = PARAMS
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ParamError::Unknown(name.into()))?;

        let parsed = def.parse(value)?;
        self.values.insert(def.name, parsed);
        Ok(())
    }

    /// All parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> + '_ {
        self.values.iter().map(|(name, value)| (*name, value))
    }
}

impl ParameterStore for ParameterTable {
    fn set_by_name(&mut self, name: &str, value: &str) -> bool {
        match self.set(name, value) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = ParameterTable::new();
        assert_eq!(table.get("LOCK_LEVEL"), Some(&ParamValue::Uint8(0)));
        assert_eq!(table.get("BAUDRATE"), Some(&ParamValue::Uint32(57600)));
        assert_eq!(table.get("BT4_RATE"), Some(&ParamValue::Float(1.0)));
        assert_eq!(table.get("UAS_ID"), Some(&ParamValue::Text(String::new())));
        assert_eq!(table.iter().count(), PARAMS.len());
    }

    #[test]
    fn test_set_values() {
        let mut table = ParameterTable::new();
        table.set("LOCK_LEVEL", "2").unwrap();
        table.set("BAUDRATE", "115200").unwrap();
        table.set("WIFI_NAN_RATE", "0.5").unwrap();
        table.set("UAS_ID", "ABC123").unwrap();

        assert_eq!(table.get("LOCK_LEVEL"), Some(&ParamValue::Uint8(2)));
        assert_eq!(table.lock_level(), 2);
        assert_eq!(table.get("BAUDRATE"), Some(&ParamValue::Uint32(115200)));
        assert_eq!(table.get("WIFI_NAN_RATE"), Some(&ParamValue::Float(0.5)));
        assert_eq!(table.get("UAS_ID"), Some(&ParamValue::Text("ABC123".into())));
    }

    #[test]
    fn test_range_checks() {
        let mut table = ParameterTable::new();
        assert!(matches!(table.set("LOCK_LEVEL", "3"), Err(ParamError::OutOfRange { .. })));
        assert!(matches!(table.set("CAN_NODE", "128"), Err(ParamError::OutOfRange { .. })));
        assert!(matches!(table.set("BAUDRATE", "4800"), Err(ParamError::OutOfRange { .. })));
        assert!(matches!(table.set("BT5_RATE", "-1"), Err(ParamError::OutOfRange { .. })));
        assert_eq!(table.get("LOCK_LEVEL"), Some(&ParamValue::Uint8(0)));
    }

    #[test]
    fn test_bad_values() {
        let mut table = ParameterTable::new();
        assert!(matches!(table.set("CAN_NODE", "abc"), Err(ParamError::Parse { .. })));
        assert!(matches!(table.set("CAN_NODE", "1.5"), Err(ParamError::Parse { .. })));
        assert!(matches!(table.set("BT4_RATE", "NaN"), Err(ParamError::Parse { .. })));
        assert!(matches!(
            table.set("WIFI_SSID", "a-very-long-network-name"),
            Err(ParamError::TooLong { len: 24, .. })
        ));
        assert_eq!(table.set("NOPE", "1"), Err(ParamError::Unknown("NOPE".into())));
    }

    #[test]
    fn test_parameter_store() {
        let mut table = ParameterTable::new();
        assert!(table.set_by_name("BCAST_POWERUP", "0"));
        assert!(!table.set_by_name("BCAST_POWERUP", "2"));
        assert_eq!(table.get("BCAST_POWERUP"), Some(&ParamValue::Uint8(0)));
    }
}
