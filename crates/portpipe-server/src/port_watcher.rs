//! Periodic detection of newly listening local ports
//!
//! The watcher keeps the set of ports seen on the previous scan. Each scan
//! emits `current - known` and then replaces the known set with `current`,
//! so a port that stops listening and later comes back is reported again.

use crate::proc_net::PortScanError;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Anything that can list the ports currently in LISTEN state
pub trait PortSource: Send + 'static {
    fn listening_ports(&mut self) -> Result<BTreeSet<u16>, PortScanError>;
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Time between scans after the initial one
    pub scan_interval: Duration,
    /// Capacity of the event queue; a full queue stalls the watcher
    pub queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            queue_capacity: 10,
        }
    }
}

impl WatcherConfig {
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), WatcherConfigError> {
        if self.scan_interval.is_zero() {
            return Err(WatcherConfigError("scan interval must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(WatcherConfigError("event queue capacity must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("Invalid port watcher configuration: {0}")]
pub struct WatcherConfigError(&'static str);

pub struct PortWatcher<S> {
    source: S,
    known_ports: BTreeSet<u16>,
    scan_interval: Duration,
    events: mpsc::Sender<u16>,
}

impl<S: PortSource> PortWatcher<S> {
    /// Create a watcher and the receiving end of its event queue
    pub fn new(
        source: S,
        config: &WatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<u16>), WatcherConfigError> {
        config.validate()?;

        let (events, rx) = mpsc::channel(config.queue_capacity);
        let watcher = Self {
            source,
            known_ports: BTreeSet::new(),
            scan_interval: config.scan_interval,
            events,
        };
        Ok((watcher, rx))
    }

    pub fn known_ports(&self) -> &BTreeSet<u16> {
        &self.known_ports
    }

    /// Scan once and return the ports not seen on the previous scan
    ///
    /// On failure the known set is left untouched.
    pub fn scan(&mut self) -> Result<Vec<u16>, PortScanError> {
        let current = self.source.listening_ports()?;
        let new_ports = current.difference(&self.known_ports).copied().collect();
        self.known_ports = current;
        Ok(new_ports)
    }

    /// Initial scan, then poll forever
    ///
    /// Returns once the receiving end of the event queue is gone.
    pub async fn run(mut self) {
        if !self.detect_existing().await {
            return;
        }
        self.watch_new().await;
    }

    /// Report every port already listening. Returns false if nobody listens
    /// for events anymore.
    pub async fn detect_existing(&mut self) -> bool {
        match self.scan() {
            Ok(ports) => {
                tracing::info!(count = ports.len(), "Found existing listening ports");
                self.emit(ports, "Detected existing listening port").await
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed initial port scan");
                true
            }
        }
    }

    pub async fn watch_new(&mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.scan_interval, self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.events.is_closed() {
                tracing::debug!("Port event receiver dropped, stopping watcher");
                return;
            }

            match self.scan() {
                Ok(ports) => {
                    if !self.emit(ports, "Detected new listening port").await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to scan ports");
                }
            }
        }
    }

    async fn emit(&self, ports: Vec<u16>, message: &'static str) -> bool {
        for port in ports {
            tracing::info!(port, "{}", message);
            if self.events.send(port).await.is_err() {
                tracing::debug!("Port event receiver dropped, stopping watcher");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::path::PathBuf;

    /// Replays a fixed sequence of scan results, repeating the last one
    struct ScriptedSource {
        script: VecDeque<Option<Vec<u16>>>,
        last: Option<Vec<u16>>,
    }

    impl ScriptedSource {
        /// `None` entries make that scan fail
        fn new(script: Vec<Option<Vec<u16>>>) -> Self {
            Self {
                script: script.into(),
                last: Some(Vec::new()),
            }
        }
    }

    impl PortSource for ScriptedSource {
        fn listening_ports(&mut self) -> Result<BTreeSet<u16>, PortScanError> {
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            match &self.last {
                Some(ports) => Ok(ports.iter().copied().collect()),
                None => Err(PortScanError::Read {
                    path: PathBuf::from("/proc/net/tcp"),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                }),
            }
        }
    }

    fn watcher(script: Vec<Option<Vec<u16>>>) -> (PortWatcher<ScriptedSource>, mpsc::Receiver<u16>) {
        PortWatcher::new(ScriptedSource::new(script), &WatcherConfig::default()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_scan_interval_rejected() {
        let config = WatcherConfig::default().with_scan_interval(Duration::ZERO);
        let err = PortWatcher::new(ScriptedSource::new(vec![]), &config)
            .err()
            .expect("zero interval must not build a watcher");
        assert!(err.to_string().contains("scan interval"));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let config = WatcherConfig {
            queue_capacity: 0,
            ..WatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unchanged_scan_emits_nothing() {
        let (mut watcher, _rx) = watcher(vec![Some(vec![22, 8080]), Some(vec![22, 8080])]);

        assert_eq!(watcher.scan().unwrap(), vec![22, 8080]);
        assert!(watcher.scan().unwrap().is_empty());
        assert_eq!(watcher.known_ports(), &BTreeSet::from([22, 8080]));
    }

    #[test]
    fn test_disappeared_port_is_reported_again() {
        let (mut watcher, _rx) = watcher(vec![
            Some(vec![22, 8080]),
            Some(vec![22]),
            Some(vec![22, 8080]),
        ]);

        watcher.scan().unwrap();
        // Disappearance is silent
        assert!(watcher.scan().unwrap().is_empty());
        assert_eq!(watcher.scan().unwrap(), vec![8080]);
    }

    #[test]
    fn test_failed_scan_keeps_known_ports() {
        let (mut watcher, _rx) = watcher(vec![Some(vec![22]), None, Some(vec![22, 9000])]);

        watcher.scan().unwrap();
        assert!(watcher.scan().is_err());
        assert_eq!(watcher.known_ports(), &BTreeSet::from([22]));
        assert_eq!(watcher.scan().unwrap(), vec![9000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_existing_then_new_ports() {
        let (watcher, mut rx) = watcher(vec![
            Some(vec![22, 8080]),
            Some(vec![22, 8080]),
            Some(vec![22, 8080, 9000]),
        ]);
        let start = Instant::now();
        let handle = tokio::spawn(watcher.run());

        assert_eq!(rx.recv().await, Some(22));
        assert_eq!(rx.recv().await, Some(8080));
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Two ticks later 9000 shows up, exactly once
        assert_eq!(rx.recv().await, Some(9000));
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        let quiet = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(quiet.is_err(), "no further events expected");

        drop(rx);
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("watcher should stop once the receiver is gone")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_scan_failure_keeps_watching() {
        let (watcher, mut rx) = watcher(vec![None, Some(vec![3000])]);
        let start = Instant::now();
        tokio::spawn(watcher.run());

        assert_eq!(rx.recv().await, Some(3000));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let (watcher, rx) = watcher(vec![Some(vec![22])]);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), watcher.run())
            .await
            .expect("watcher should return immediately");
    }
}
