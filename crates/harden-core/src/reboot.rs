//! Host restart after reboot-requiring changes

use std::cell::Cell;
use std::rc::Rc;

use tracing::warn;

use crate::Result;
use crate::store::run_tool;

/// Restarts the host
pub trait RebootHandler {
    fn reboot(&self, reason: &str) -> Result<()>;
}

/// Restart through the operating system's shutdown command
#[derive(Debug, Default)]
pub struct SystemReboot {
    /// Seconds of grace before the restart
    pub delay_secs: u32,
}

impl SystemReboot {
    pub fn new(delay_secs: u32) -> Self {
        Self { delay_secs }
    }
}

impl RebootHandler for SystemReboot {
    fn reboot(&self, reason: &str) -> Result<()> {
        warn!(delay_secs = self.delay_secs, reason, "Restarting host");
        if cfg!(windows) {
            run_tool(
                "shutdown.exe",
                [
                    "/r".to_string(),
                    "/t".to_string(),
                    self.delay_secs.to_string(),
                    "/c".to_string(),
                    reason.to_string(),
                ],
            )?
            .into_success()?;
        } else {
            let when = format!("+{}", self.delay_secs.div_ceil(60));
            run_tool("shutdown", ["-r", when.as_str(), reason])?.into_success()?;
        }
        Ok(())
    }
}

/// Counts restart requests instead of restarting
///
/// Clones share one counter, so a clone kept by the caller observes requests
/// made through the one handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RecordingReboot {
    requests: Rc<Cell<usize>>,
}

impl RecordingReboot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> usize {
        self.requests.get()
    }
}

impl RebootHandler for RecordingReboot {
    fn reboot(&self, reason: &str) -> Result<()> {
        warn!(reason, "Restart requested (recorded only)");
        self.requests.set(self.requests.get() + 1);
        Ok(())
    }
}
