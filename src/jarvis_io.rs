//! Status files under `~/.jarvis` for external widgets (status bars,
//! desktop overlays) to display what Jarvis is doing.
//!
//! | file | contents |
//! |---|---|
//! | `jarvis` | process id |
//! | `jarvis.status` | `ready`, `queued`, `processing` or `listening` |
//! | `jarvis.heard` | text of the command being processed |
//! | `jarvis.spoken` | last reply |
//! | `jarvis.system` | last CPU/RAM sample as JSON |

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::command::{Command, Status};
use crate::monitor::SystemStatus;
use crate::observer::Observer;

pub struct StatusFiles {
    base: PathBuf,
}

impl StatusFiles {
    pub fn new() -> Result<Self> {
        let base = dirs::home_dir()
            .ok_or_else(|| anyhow!("could not determine home directory"))?
            .join(".jarvis");
        Self::with_base(base)
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .with_context(|| format!("failed to create {}", base.display()))?;
        Ok(Self { base })
    }

    pub fn set_pid(&self) {
        self.write("jarvis", &std::process::id().to_string());
    }

    // Display only; a failed write must not disturb processing.
    fn write(&self, name: &str, contents: &str) {
        if let Err(e) = std::fs::write(self.base.join(name), contents) {
            log::debug!("Failed to write {}: {e}", name);
        }
    }
}

impl Observer for StatusFiles {
    fn on_status(&self, status: Status) {
        self.write("jarvis.status", status.as_str());
    }

    fn on_command(&self, command: &Command) {
        self.write("jarvis.heard", command.text());
    }

    fn on_response(&self, _command: &Command, response: &str) {
        self.write("jarvis.spoken", response);
    }

    fn on_system_status(&self, status: &SystemStatus) {
        match serde_json::to_string(status) {
            Ok(json) => self.write("jarvis.system", &json),
            Err(e) => log::debug!("Failed to encode system status: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Source;

    #[test]
    fn failed_write_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let files = StatusFiles::with_base(tmp.path()).unwrap();
        // A directory where the status file should be makes every write fail.
        std::fs::create_dir(tmp.path().join("jarvis.status")).unwrap();
        files.on_status(Status::Ready);
        files.on_response(&Command::new("hi", Source::Text), "Hello");
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("jarvis.spoken")).unwrap(),
            "Hello"
        );
    }

    #[test]
    fn writes_state_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".jarvis");
        let files = StatusFiles::with_base(&dir).unwrap();
        let cmd = Command::new("what time is it", Source::Voice);

        files.set_pid();
        files.on_status(Status::Processing);
        files.on_command(&cmd);
        files.on_response(&cmd, "The current time is 09:15 AM");
        files.on_system_status(&SystemStatus {
            cpu_percent: 12.5,
            memory_percent: 40.0,
        });

        let read = |name: &str| std::fs::read_to_string(dir.join(name)).unwrap();
        assert_eq!(read("jarvis.status"), "processing");
        assert_eq!(read("jarvis"), std::process::id().to_string());
        assert_eq!(read("jarvis.heard"), "what time is it");
        assert_eq!(read("jarvis.spoken"), "The current time is 09:15 AM");
        assert_eq!(
            read("jarvis.system"),
            r#"{"cpu_percent":12.5,"memory_percent":40.0}"#
        );
    }
}
