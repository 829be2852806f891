use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
        }
    }

    /// Binance kline `interval` query value.
    pub fn binance_interval(&self) -> &'static str {
        self.as_str()
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            Interval::M1 => Duration::from_secs(60),
            Interval::M5 => Duration::from_secs(300),
            Interval::M15 => Duration::from_secs(900),
            Interval::H1 => Duration::from_secs(3600),
        }
    }

    pub fn as_seconds(&self) -> u64 {
        self.as_duration().as_secs()
    }

    pub fn as_millis(&self) -> i64 {
        self.as_seconds() as i64 * 1000
    }

    pub fn from_str_loose(s: &str) -> Option<Interval> {
        match s {
            "1m" => Some(Interval::M1),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "1h" => Some(Interval::H1),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
