use std::fmt;

use serde::{Deserialize, Serialize};

/// A live stat value, typed to match its definition variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i32),
    Float(f32),
}

impl StatValue {
    pub fn as_i32(&self) -> i32 {
        match self {
            StatValue::Int(value) => *value,
            StatValue::Float(value) => *value as i32,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            StatValue::Int(value) => *value as f32,
            StatValue::Float(value) => *value,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(value) => write!(f, "{value}"),
            StatValue::Float(value) => write!(f, "{value}"),
        }
    }
}

/// The native achievement/stat backend for one running title. All calls are
/// synchronous; a `false` or `None` result is a rejection, never a panic.
/// The engine treats rejection identically at every call site.
pub trait StatsBackend {
    fn get_achievement(&self, id: &str) -> Option<(bool, u32)>;
    fn set_achievement(&mut self, id: &str, achieved: bool) -> bool;
    fn get_stat(&self, id: &str) -> Option<StatValue>;
    fn set_stat(&mut self, id: &str, value: StatValue) -> bool;
    fn persist(&mut self) -> bool;
    fn reset_all(&mut self, also_achievements: bool) -> bool;
}
