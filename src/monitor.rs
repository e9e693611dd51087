//! CPU and memory sampling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use sysinfo::System;

use crate::command::{SharedState, Status};
use crate::observer::Observer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemStatus {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Keeps one `System` alive between samples; CPU usage is computed from
/// the delta between two refreshes, so a fresh instance would always
/// report zero.
pub struct SystemMonitor {
    sys: Mutex<System>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
        }
    }

    pub fn sample(&self) -> SystemStatus {
        let mut sys = match self.sys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        SystemStatus {
            cpu_percent: sys.global_cpu_usage(),
            memory_percent,
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Push a sample to the observer every `interval` while nothing is being
/// processed. Returns once shutdown is requested.
pub async fn run_monitor(
    monitor: Arc<SystemMonitor>,
    state: Arc<SharedState>,
    observer: Arc<dyn Observer>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while !state.is_shutdown() {
        ticker.tick().await;
        if state.processing_state() != Status::Ready {
            continue;
        }
        let m = Arc::clone(&monitor);
        match tokio::task::spawn_blocking(move || m.sample()).await {
            Ok(status) => observer.on_system_status(&status),
            Err(e) => log::warn!("System monitor sample failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_within_range() {
        let monitor = SystemMonitor::new();
        let s = monitor.sample();
        assert!((0.0..=100.0).contains(&s.memory_percent), "{s:?}");
        assert!(s.cpu_percent >= 0.0, "{s:?}");
    }

    #[tokio::test]
    async fn monitor_stops_on_shutdown() {
        struct Count(std::sync::atomic::AtomicUsize);
        impl Observer for Count {
            fn on_system_status(&self, _: &SystemStatus) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let state = Arc::new(SharedState::new());
        let count = Arc::new(Count(Default::default()));
        let task = tokio::spawn(run_monitor(
            Arc::new(SystemMonitor::new()),
            Arc::clone(&state),
            count.clone(),
            Duration::from_millis(10),
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        state.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("monitor exits")
            .unwrap();
        assert!(count.0.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
