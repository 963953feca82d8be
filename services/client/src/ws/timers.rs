//! Named one-shot timers owned by the session driver.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Sleep, sleep};
use tracing::trace;

/// A cancellable one-shot timer that can be polled from `select!`.
///
/// An unarmed timer never fires. Once fired it disarms itself.
pub(crate) struct Timer {
    name: &'static str,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the timer to fire after `after`.
    pub(crate) fn arm(&mut self, after: Duration) {
        trace!(timer = self.name, ?after, "Timer armed");
        self.deadline = Some(Box::pin(sleep(after)));
    }

    pub(crate) fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            trace!(timer = self.name, "Timer cancelled");
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline passes; pends forever when unarmed.
    pub(crate) async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
