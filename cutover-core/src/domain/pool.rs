//! Target pool and listener domain types

use serde::{Deserialize, Serialize};

/// Color of one of the two target pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolColor {
    Blue,
    Green,
}

impl PoolColor {
    /// The opposite pool
    pub fn other(self) -> Self {
        match self {
            PoolColor::Blue => PoolColor::Green,
            PoolColor::Green => PoolColor::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoolColor::Blue => "blue",
            PoolColor::Green => "green",
        }
    }
}

impl std::fmt::Display for PoolColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a traffic listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerRole {
    /// Normal user traffic
    Prod,
    /// Pre-promotion verification traffic
    Test,
}

/// Addressable HTTP listener in front of the pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRef {
    pub role: ListenerRole,
    pub host: String,
    pub port: u16,
}

impl ListenerRef {
    pub fn new(role: ListenerRole, host: impl Into<String>, port: u16) -> Self {
        Self {
            role,
            host: host.into(),
            port,
        }
    }

    /// URL for an HTTP path on this listener
    pub fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

/// A named, independently addressable set of task instances behind a listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPool {
    pub color: PoolColor,
    /// Port of the listener currently bound to this pool
    pub listener_port: u16,
    pub health_check_path: String,
    /// Name of the service whose tasks make up this pool
    pub service: String,
}

/// Production listener weights across the two pools, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerWeights {
    pub blue: u8,
    pub green: u8,
}

impl ListenerWeights {
    /// Full weight on one pool
    pub fn all_to(color: PoolColor) -> Self {
        Self::split(color.other(), 0)
    }

    /// `standby_percent` on `standby`, the rest on the other pool
    pub fn split(standby: PoolColor, standby_percent: u8) -> Self {
        let standby_percent = standby_percent.min(100);
        let rest = 100 - standby_percent;
        match standby {
            PoolColor::Blue => Self {
                blue: standby_percent,
                green: rest,
            },
            PoolColor::Green => Self {
                blue: rest,
                green: standby_percent,
            },
        }
    }

    pub fn weight_of(&self, color: PoolColor) -> u8 {
        match color {
            PoolColor::Blue => self.blue,
            PoolColor::Green => self.green,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_color() {
        assert_eq!(PoolColor::Blue.other(), PoolColor::Green);
        assert_eq!(PoolColor::Green.other(), PoolColor::Blue);
    }

    #[test]
    fn test_weights_always_sum_to_100() {
        for percent in [0u8, 10, 55, 100, 200] {
            let w = ListenerWeights::split(PoolColor::Green, percent);
            assert_eq!(w.blue as u16 + w.green as u16, 100);
        }
        assert_eq!(
            ListenerWeights::all_to(PoolColor::Blue),
            ListenerWeights { blue: 100, green: 0 }
        );
    }

    #[test]
    fn test_listener_url() {
        let listener = ListenerRef::new(ListenerRole::Test, "alb.local", 8080);
        assert_eq!(listener.url("/"), "http://alb.local:8080/");
        assert_eq!(listener.url("health"), "http://alb.local:8080/health");
    }
}
