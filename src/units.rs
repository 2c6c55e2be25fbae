//! Unit ladders and magnitude humanization.
//!
//! A ladder is an ordered list of unit suffixes sharing one divisor between
//! consecutive steps. Humanizing a value walks up the ladder until the value
//! drops below the divisor, unless a preferred unit pins the result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Default display precision used when picking a batch unit.
pub const MAX_UNIT_PRECISION: u32 = 2;

/// Largest precision `round_to` honours; `10^308` is the last finite power.
pub const MAX_PRECISION: u32 = 308;

/// Unit-type identifier attached to each query template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Numeric,
    Count,
    Percentage,
    Cores,
    DecimalBytes,
    BinaryBytes,
    BytesPerSecond,
    PacketsPerSecond,
    Seconds,
}

/// One ladder: suffixes in ascending magnitude plus the step divisor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitTypeEntry {
    pub units: &'static [&'static str],
    pub divisor: f64,
}

impl UnitTypeEntry {
    pub fn position(&self, unit: &str) -> Option<usize> {
        self.units.iter().position(|u| *u == unit)
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.position(unit).is_some()
    }

    pub fn base_unit(&self) -> &'static str {
        self.units.first().copied().unwrap_or("")
    }
}

impl UnitType {
    pub const ALL: [UnitType; 9] = [
        UnitType::Numeric,
        UnitType::Count,
        UnitType::Percentage,
        UnitType::Cores,
        UnitType::DecimalBytes,
        UnitType::BinaryBytes,
        UnitType::BytesPerSecond,
        UnitType::PacketsPerSecond,
        UnitType::Seconds,
    ];

    pub fn entry(self) -> UnitTypeEntry {
        match self {
            UnitType::Numeric => UnitTypeEntry {
                units: &["", "k", "M", "G", "T"],
                divisor: 1000.0,
            },
            UnitType::Count => UnitTypeEntry {
                units: &[""],
                divisor: 1.0,
            },
            UnitType::Percentage => UnitTypeEntry {
                units: &["%"],
                divisor: 1.0,
            },
            UnitType::Cores => UnitTypeEntry {
                units: &["cores"],
                divisor: 1.0,
            },
            UnitType::DecimalBytes => UnitTypeEntry {
                units: &["B", "kB", "MB", "GB", "TB", "PB"],
                divisor: 1000.0,
            },
            UnitType::BinaryBytes => UnitTypeEntry {
                units: &["B", "KiB", "MiB", "GiB", "TiB", "PiB"],
                divisor: 1024.0,
            },
            UnitType::BytesPerSecond => UnitTypeEntry {
                units: &["B/s", "kB/s", "MB/s", "GB/s", "TB/s"],
                divisor: 1000.0,
            },
            UnitType::PacketsPerSecond => UnitTypeEntry {
                units: &["p/s", "kp/s", "Mp/s", "Gp/s"],
                divisor: 1000.0,
            },
            UnitType::Seconds => UnitTypeEntry {
                units: &["s"],
                divisor: 1.0,
            },
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitType::Numeric => "numeric",
            UnitType::Count => "count",
            UnitType::Percentage => "percentage",
            UnitType::Cores => "cores",
            UnitType::DecimalBytes => "decimal_bytes",
            UnitType::BinaryBytes => "binary_bytes",
            UnitType::BytesPerSecond => "bytes_per_second",
            UnitType::PacketsPerSecond => "packets_per_second",
            UnitType::Seconds => "seconds",
        };
        write!(f, "{}", name)
    }
}

/// Static catalog of all unit ladders.
pub struct UnitTable;

impl UnitTable {
    /// Check every ladder once at load time.
    pub fn validate() -> Result<()> {
        for unit_type in UnitType::ALL {
            validate_entry(unit_type, &unit_type.entry())?;
        }
        Ok(())
    }
}

fn validate_entry(unit_type: UnitType, entry: &UnitTypeEntry) -> Result<()> {
    if entry.units.is_empty() {
        return Err(MetricsError::Config(format!(
            "unit type {} has an empty ladder",
            unit_type
        )));
    }
    if !(entry.divisor >= 1.0) {
        return Err(MetricsError::Config(format!(
            "unit type {} has divisor {} (must be >= 1)",
            unit_type, entry.divisor
        )));
    }
    if entry.divisor == 1.0 && entry.units.len() > 1 {
        return Err(MetricsError::Config(format!(
            "unit type {} has a multi-step ladder with divisor 1",
            unit_type
        )));
    }
    Ok(())
}

/// A value paired with the unit it is expressed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumanizedValue {
    pub value: f64,
    pub unit: String,
}

impl HumanizedValue {
    /// String form used in assembled responses.
    pub fn formatted_value(&self) -> String {
        format!("{}", self.value)
    }
}

impl fmt::Display for HumanizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

/// Convert `value` into the best-fitting unit of `unit_type`'s ladder.
///
/// `initial_unit` names the unit `value` is already expressed in (empty means
/// the base unit). An unknown initial unit passes the value through with an
/// empty unit. A non-empty `preferred_unit` found on the remaining ladder pins
/// the result to that unit.
pub fn humanize(
    value: f64,
    unit_type: UnitType,
    initial_unit: &str,
    preferred_unit: &str,
    precision: u32,
) -> HumanizedValue {
    let entry = unit_type.entry();
    let start = if initial_unit.is_empty() {
        0
    } else {
        match entry.position(initial_unit) {
            Some(index) => index,
            None => {
                return HumanizedValue {
                    value,
                    unit: String::new(),
                }
            }
        }
    };

    let ladder = &entry.units[start..];
    let (shifted, unit) = shift(value, ladder, entry.divisor, preferred_unit);
    HumanizedValue {
        value: round_nonzero(shifted, precision),
        unit: unit.to_string(),
    }
}

fn shift(
    mut value: f64,
    ladder: &[&'static str],
    divisor: f64,
    preferred_unit: &str,
) -> (f64, &'static str) {
    if !preferred_unit.is_empty() {
        if let Some(k) = ladder.iter().position(|u| *u == preferred_unit) {
            return (value / divisor.powi(k as i32), ladder[k]);
        }
    }

    let mut index = 0;
    while value >= divisor && index + 1 < ladder.len() {
        value /= divisor;
        index += 1;
    }
    (value, ladder.get(index).copied().unwrap_or(""))
}

/// Pick the unit that the largest of `values` humanizes to.
pub fn find_max_unit(unit_type: UnitType, values: &[f64]) -> String {
    let max = values
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
        .unwrap_or(0.0);
    humanize(max, unit_type, "", "", MAX_UNIT_PRECISION).unit
}

/// Round half away from zero to `precision` decimal digits.
///
/// Precision is capped at [`MAX_PRECISION`]; a rounding that overflows
/// returns `value` unchanged.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

// Small non-zero values must never display as 0: widen the precision to
// two digits past the first significant decimal.
fn round_nonzero(value: f64, precision: u32) -> f64 {
    let rounded = round_to(value, precision);
    if !rounded.is_finite() {
        return value;
    }
    if rounded != 0.0 || value == 0.0 || !value.is_finite() {
        return rounded;
    }

    let digits = format!("{}", value.abs());
    let first_significant = digits
        .split_once('.')
        .and_then(|(_, frac)| frac.bytes().position(|b| b != b'0'));

    match first_significant {
        Some(i) => {
            let widened = round_to(value, (i + 2) as u32);
            if widened.is_finite() && widened != 0.0 {
                widened
            } else {
                value
            }
        }
        None => rounded,
    }
}
