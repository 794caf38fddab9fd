//! Connectivity signal and network-quality timeouts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Effective connection type reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkQuality {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "unknown")]
    Unknown,
}

impl NetworkQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkQuality::Slow2g => "slow-2g",
            NetworkQuality::TwoG => "2g",
            NetworkQuality::ThreeG => "3g",
            NetworkQuality::FourG => "4g",
            NetworkQuality::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slow-2g" | "slow2g" => Ok(NetworkQuality::Slow2g),
            "2g" => Ok(NetworkQuality::TwoG),
            "3g" => Ok(NetworkQuality::ThreeG),
            "4g" | "wifi" => Ok(NetworkQuality::FourG),
            "unknown" => Ok(NetworkQuality::Unknown),
            other => Err(format!("unknown network quality '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Offline,
    Online(NetworkQuality),
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online(_))
    }
}

/// Online verification timeout per network quality.
///
/// Slow links get longer budgets so that a healthy but slow request is
/// not misclassified as offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutTable {
    #[serde(with = "humantime_serde")]
    pub slow_2g: Duration,
    #[serde(with = "humantime_serde")]
    pub two_g: Duration,
    #[serde(with = "humantime_serde")]
    pub three_g: Duration,
    #[serde(with = "humantime_serde")]
    pub four_g: Duration,
    #[serde(with = "humantime_serde")]
    pub unknown: Duration,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            slow_2g: Duration::from_secs(20),
            two_g: Duration::from_secs(15),
            three_g: Duration::from_secs(10),
            four_g: Duration::from_secs(5),
            unknown: Duration::from_secs(8),
        }
    }
}

impl TimeoutTable {
    pub fn for_quality(&self, quality: NetworkQuality) -> Duration {
        match quality {
            NetworkQuality::Slow2g => self.slow_2g,
            NetworkQuality::TwoG => self.two_g,
            NetworkQuality::ThreeG => self.three_g,
            NetworkQuality::FourG => self.four_g,
            NetworkQuality::Unknown => self.unknown,
        }
    }

    pub fn all(&self) -> [Duration; 5] {
        [self.slow_2g, self.two_g, self.three_g, self.four_g, self.unknown]
    }
}

/// Device connectivity as last reported by the platform.
///
/// Cloning yields another handle onto the same signal.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Record a new state, returning whether it changed
    pub fn set(&self, next: Connectivity) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            info!(?next, "Connectivity changed");
        }
        changed
    }

    pub fn set_offline(&self) -> bool {
        self.set(Connectivity::Offline)
    }

    pub fn set_online(&self, quality: NetworkQuality) -> bool {
        self.set(Connectivity::Online(quality))
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slower_networks_wait_longer() {
        let table = TimeoutTable::default();
        assert!(table.for_quality(NetworkQuality::Slow2g) > table.for_quality(NetworkQuality::TwoG));
        assert!(table.for_quality(NetworkQuality::TwoG) > table.for_quality(NetworkQuality::ThreeG));
        assert!(table.for_quality(NetworkQuality::ThreeG) > table.for_quality(NetworkQuality::FourG));
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!("4G".parse::<NetworkQuality>(), Ok(NetworkQuality::FourG));
        assert_eq!("slow-2g".parse::<NetworkQuality>(), Ok(NetworkQuality::Slow2g));
        assert!("5g".parse::<NetworkQuality>().is_err());
    }

    #[tokio::test]
    async fn test_monitor_notifies_on_change_only() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_offline());
        assert!(monitor.set_online(NetworkQuality::FourG));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online(NetworkQuality::FourG));
        assert!(monitor.current().is_online());
    }
}
