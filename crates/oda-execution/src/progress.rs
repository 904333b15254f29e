use oda_core::progress::{Progress, ProgressSink};
use tokio::sync::mpsc;

/// Forwards loading progress to a channel.
///
/// Sending never blocks; updates are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<Progress>,
}

impl ChannelProgressSink {
    pub fn new(sender: mpsc::UnboundedSender<Progress>) -> Self {
        Self { sender }
    }

    /// Creates a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, progress: &Progress) {
        let _ = self.sender.send(progress.clone());
    }
}
