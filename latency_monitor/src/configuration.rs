use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_icmp_latency::monitor::DEFAULT_WINDOW;
use tokio_icmp_latency::ping::{
    DEFAULT_INTERVAL, DEFAULT_REAP_PERIOD, DEFAULT_SWEEP_PERIOD, DEFAULT_TIMEOUT,
};
use tokio_icmp_latency::{MonitorConfig, ProbeTimings};

pub const CONFIG_FILE_NAME: &str = "config.json";
/// Upper bound on results kept across all destinations.
pub const MAX_RESULTS: usize = 10_000_000;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot locate the executable directory: {0}")]
    Executable(#[source] std::io::Error),
    #[error("invalid destination address {0:?}")]
    Destination(String),
    #[error("invalid listen address {0:?}")]
    ListenAddress(String),
    #[error("invalid monitor address {0:?}")]
    MonitorAddress(String),
    #[error("no destinations configured")]
    NoDestinations,
    #[error("window of {window} for {destinations} destinations exceeds {max} results")]
    Window {
        window: usize,
        destinations: usize,
        max: usize,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL.as_millis() as u64
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_reap_period_ms() -> u64 {
    DEFAULT_REAP_PERIOD.as_millis() as u64
}

fn default_sweep_period_ms() -> u64 {
    DEFAULT_SWEEP_PERIOD.as_millis() as u64
}

/// On-disk configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Configuration {
    /// Local IPv4 address for the raw sockets. Empty means any.
    #[serde(default)]
    pub listen_address: String,
    pub destinations: Vec<String>,
    /// `host:port`, or `:port` for every interface.
    pub monitor_address: String,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_reap_period_ms")]
    pub reap_period_ms: u64,
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,
}

fn non_zero(value: u64, name: &'static str) -> Result<Duration, ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::Zero(name));
    }
    Ok(Duration::from_millis(value))
}

impl Configuration {
    /// `config.json` in the directory holding the executable.
    pub fn default_path() -> Result<PathBuf, ConfigurationError> {
        let exe = std::env::current_exe().map_err(ConfigurationError::Executable)?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let data = std::fs::read(path).map_err(|source| ConfigurationError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigurationError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn listen_address(&self) -> Result<Ipv4Addr, ConfigurationError> {
        let address = self.listen_address.trim();
        if address.is_empty() {
            return Ok(Ipv4Addr::UNSPECIFIED);
        }
        address
            .parse()
            .map_err(|_| ConfigurationError::ListenAddress(self.listen_address.clone()))
    }

    pub fn monitor_address(&self) -> Result<SocketAddr, ConfigurationError> {
        let address = self.monitor_address.trim();
        let parsed = match address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port).parse::<SocketAddr>(),
            None => address.parse::<SocketAddr>(),
        };
        parsed.map_err(|_| ConfigurationError::MonitorAddress(self.monitor_address.clone()))
    }

    pub fn timings(&self) -> Result<ProbeTimings, ConfigurationError> {
        Ok(ProbeTimings {
            interval: non_zero(self.interval_ms, "intervalMs")?,
            timeout: non_zero(self.timeout_ms, "timeoutMs")?,
            reap_period: non_zero(self.reap_period_ms, "reapPeriodMs")?,
            sweep_period: non_zero(self.sweep_period_ms, "sweepPeriodMs")?,
        })
    }

    /// Validates everything the probing core consumes.
    pub fn monitor_config(&self) -> Result<MonitorConfig, ConfigurationError> {
        if self.destinations.is_empty() {
            return Err(ConfigurationError::NoDestinations);
        }
        if self.window == 0 {
            return Err(ConfigurationError::Zero("window"));
        }
        match self.destinations.len().checked_mul(self.window) {
            Some(total) if total <= MAX_RESULTS => {}
            _ => {
                return Err(ConfigurationError::Window {
                    window: self.window,
                    destinations: self.destinations.len(),
                    max: MAX_RESULTS,
                })
            }
        }
        let destinations = self
            .destinations
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Ipv4Addr>()
                    .map_err(|_| ConfigurationError::Destination(d.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MonitorConfig {
            listen_address: self.listen_address()?,
            destinations,
            timings: self.timings()?,
            window: self.window,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> Configuration {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_layout_uses_defaults() {
        let conf = parse(
            r#"{
                "listenAddress": "0.0.0.0",
                "destinations": ["1.1.1.1", "8.8.8.8"],
                "monitorAddress": ":8080"
            }"#,
        );
        let monitor = conf.monitor_config().unwrap();
        assert_eq!(monitor.listen_address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            monitor.destinations,
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)]
        );
        assert_eq!(monitor.timings, ProbeTimings::default());
        assert_eq!(monitor.window, 500);
        assert_eq!(monitor.capacity(), 1000);
        assert_eq!(
            conf.monitor_address().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn overrides() {
        let conf = parse(
            r#"{
                "destinations": ["10.0.0.1"],
                "monitorAddress": "127.0.0.1:9000",
                "window": 10,
                "intervalMs": 250,
                "timeoutMs": 2000,
                "reapPeriodMs": 1000,
                "sweepPeriodMs": 3000
            }"#,
        );
        let monitor = conf.monitor_config().unwrap();
        assert_eq!(monitor.listen_address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            monitor.timings,
            ProbeTimings {
                interval: Duration::from_millis(250),
                timeout: Duration::from_millis(2000),
                reap_period: Duration::from_millis(1000),
                sweep_period: Duration::from_millis(3000),
            }
        );
        assert_eq!(monitor.capacity(), 10);
        assert_eq!(
            conf.monitor_address().unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn rejects_bad_values() {
        let base = parse(r#"{"destinations": ["10.0.0.1"], "monitorAddress": ":80"}"#);

        let mut conf = base.clone();
        conf.destinations.push("10.0.0.256".to_string());
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Destination(d)) if d == "10.0.0.256"
        ));

        let mut conf = base.clone();
        conf.destinations = vec!["::1".to_string()];
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Destination(_))
        ));

        let mut conf = base.clone();
        conf.destinations.clear();
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::NoDestinations)
        ));

        let mut conf = base.clone();
        conf.listen_address = "localhost".to_string();
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::ListenAddress(_))
        ));

        let mut conf = base.clone();
        conf.timeout_ms = 0;
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Zero("timeoutMs"))
        ));

        let mut conf = base.clone();
        conf.window = 0;
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Zero("window"))
        ));

        let mut conf = base.clone();
        conf.monitor_address = "nowhere".to_string();
        assert!(matches!(
            conf.monitor_address(),
            Err(ConfigurationError::MonitorAddress(_))
        ));
    }

    #[test]
    fn rejects_oversized_window() {
        let conf = parse(
            r#"{
                "destinations": ["10.0.0.1"],
                "monitorAddress": ":80",
                "window": 18446744073709551615
            }"#,
        );
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Window { destinations: 1, .. })
        ));

        let mut conf = parse(r#"{"destinations": [], "monitorAddress": ":80"}"#);
        conf.destinations = (1..=10).map(|i| format!("10.0.0.{}", i)).collect();
        conf.window = MAX_RESULTS / 10;
        assert_eq!(conf.monitor_config().unwrap().capacity(), MAX_RESULTS);
        conf.window += 1;
        assert!(matches!(
            conf.monitor_config(),
            Err(ConfigurationError::Window { destinations: 10, .. })
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_str::<Configuration>(
            r#"{"destinations": [], "monitorAddress": ":80", "payloadSize": 64}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_reports_path() {
        let path = std::env::temp_dir().join(format!(
            "latency_monitor_missing_{}.json",
            std::process::id()
        ));
        match Configuration::load(&path) {
            Err(ConfigurationError::Read { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn load_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!(
            "latency_monitor_config_{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"listenAddress": "", "destinations": ["127.0.0.1"], "monitorAddress": ":8080"}"#,
        )
        .unwrap();
        let conf = Configuration::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(conf.destinations, vec!["127.0.0.1".to_string()]);
        assert_eq!(conf.listen_address().unwrap(), Ipv4Addr::UNSPECIFIED);
    }
}
