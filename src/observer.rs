//! Notifications for whatever is displaying Jarvis's state.
//!
//! The dispatcher and the input sources only see the [`Observer`] trait.
//! Implementations must return quickly and must never fail; a display
//! that cannot keep up should drop updates rather than stall the queue.

use std::sync::Arc;

use chrono::Local;

use crate::command::{Command, Status};
use crate::monitor::SystemStatus;

pub trait Observer: Send + Sync {
    fn on_status(&self, _status: Status) {}

    /// A command was taken off the queue.
    fn on_command(&self, _command: &Command) {}

    fn on_response(&self, _command: &Command, _response: &str) {}

    fn on_system_status(&self, _status: &SystemStatus) {}
}

/// Activity log written through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_status(&self, status: Status) {
        log::debug!("Status: {}", status);
    }

    fn on_command(&self, command: &Command) {
        let waited = Local::now() - command.enqueued_at();
        log::info!(
            "Processing command from {} (queued {} ms): {}",
            command.source(),
            waited.num_milliseconds(),
            command.text()
        );
    }

    fn on_response(&self, _command: &Command, response: &str) {
        log::info!("Response: {}", response);
    }

    fn on_system_status(&self, status: &SystemStatus) {
        log::debug!(
            "Ready | CPU: {:.1}% | RAM: {:.1}%",
            status.cpu_percent,
            status.memory_percent
        );
    }
}

/// Forwards every notification to each inner observer in order.
#[derive(Default)]
pub struct Observers {
    inner: Vec<Arc<dyn Observer>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.inner.push(observer);
        self
    }
}

impl Observer for Observers {
    fn on_status(&self, status: Status) {
        for o in &self.inner {
            o.on_status(status);
        }
    }

    fn on_command(&self, command: &Command) {
        for o in &self.inner {
            o.on_command(command);
        }
    }

    fn on_response(&self, command: &Command, response: &str) {
        for o in &self.inner {
            o.on_response(command, response);
        }
    }

    fn on_system_status(&self, status: &SystemStatus) {
        for o in &self.inner {
            o.on_system_status(status);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Status(Status),
        Command(String),
        Response(String, String),
    }

    /// Records every notification for later assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn responses(&self) -> Vec<(String, String)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Response(c, r) => Some((c, r)),
                    _ => None,
                })
                .collect()
        }

        pub fn statuses(&self) -> Vec<Status> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Status(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    impl Observer for RecordingObserver {
        fn on_status(&self, status: Status) {
            self.events.lock().unwrap().push(Event::Status(status));
        }

        fn on_command(&self, command: &Command) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Command(command.text().to_string()));
        }

        fn on_response(&self, command: &Command, response: &str) {
            self.events.lock().unwrap().push(Event::Response(
                command.text().to_string(),
                response.to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Event, RecordingObserver};
    use super::*;
    use crate::command::Source;

    #[test]
    fn fan_out_reaches_every_observer() {
        let a = Arc::new(RecordingObserver::default());
        let b = Arc::new(RecordingObserver::default());
        let all = Observers::new().with(a.clone()).with(b.clone());

        all.on_status(Status::Queued);
        all.on_response(&Command::new("hi", Source::Text), "hello");

        for rec in [a, b] {
            assert_eq!(
                rec.events(),
                vec![
                    Event::Status(Status::Queued),
                    Event::Response("hi".into(), "hello".into()),
                ]
            );
        }
    }
}
