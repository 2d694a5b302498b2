use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Calendar quarter a bulk file reports on, rendered as `YYYY-Qn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuarterKey {
    pub year: i32,
    pub quarter: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid quarter key '{0}': expected YYYY-Qn with n in 1..=4")]
pub struct InvalidQuarter(pub String);

impl QuarterKey {
    pub fn new(year: i32, quarter: u8) -> Result<Self, InvalidQuarter> {
        if !(1..=4).contains(&quarter) {
            return Err(InvalidQuarter(format!("{}-Q{}", year, quarter)));
        }
        Ok(Self { year, quarter })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: ((date.month() - 1) / 3 + 1) as u8,
        }
    }
}

impl fmt::Display for QuarterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for QuarterKey {
    type Err = InvalidQuarter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, quarter) = trimmed
            .split_once("-Q")
            .or_else(|| trimmed.split_once("-q"))
            .ok_or_else(|| InvalidQuarter(s.to_string()))?;

        let year: i32 = year.parse().map_err(|_| InvalidQuarter(s.to_string()))?;
        let quarter: u8 = quarter.parse().map_err(|_| InvalidQuarter(s.to_string()))?;
        if year.to_string().len() != 4 {
            return Err(InvalidQuarter(s.to_string()));
        }

        Self::new(year, quarter).map_err(|_| InvalidQuarter(s.to_string()))
    }
}

impl Serialize for QuarterKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuarterKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
