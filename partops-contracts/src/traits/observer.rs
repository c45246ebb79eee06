// SPDX-License-Identifier: GPL-3.0-only

use tokio::sync::mpsc::UnboundedSender;

use crate::OperationEvent;

/// Receives progress notifications. Not part of the success/failure contract:
/// a slow or gone observer never affects an operation's outcome.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: OperationEvent);
}

impl ProgressObserver for UnboundedSender<OperationEvent> {
    fn notify(&self, event: OperationEvent) {
        // Receiver dropped: nobody is listening anymore.
        let _ = self.send(event);
    }
}
