pub mod types;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

pub use types::GeneratedArtifact;

/// Hand-off queue for finished generation artifacts.
///
/// Workers publish through a [`ResultSender`]; the single consumer calls
/// [`ResultChannel::poll`] without ever blocking.
pub struct ResultChannel {
    tx: UnboundedSender<GeneratedArtifact>,
    rx: Mutex<UnboundedReceiver<GeneratedArtifact>>,
}

#[derive(Clone)]
pub struct ResultSender {
    tx: UnboundedSender<GeneratedArtifact>,
}

impl ResultChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> ResultSender {
        ResultSender {
            tx: self.tx.clone(),
        }
    }

    pub fn poll(&self) -> Option<GeneratedArtifact> {
        match self.rx.lock().try_recv() {
            Ok(artifact) => Some(artifact),
            // The channel owns a sender, so it cannot disconnect while `self` lives.
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Default for ResultChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSender {
    pub fn publish(&self, artifact: GeneratedArtifact) {
        if self.tx.send(artifact).is_err() {
            tracing::warn!("result channel closed, artifact dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::TaskId;

    #[test]
    fn poll_is_empty_until_published() {
        let channel = ResultChannel::new();
        assert!(channel.poll().is_none());

        let task = TaskId::new();
        channel.sender().publish(GeneratedArtifact {
            task,
            code: "print(1)".into(),
        });

        let artifact = channel.poll().unwrap();
        assert_eq!(artifact.task, task);
        assert_eq!(artifact.code, "print(1)");
        assert!(channel.poll().is_none());
    }

    #[test]
    fn artifacts_arrive_in_publish_order() {
        let channel = ResultChannel::new();
        let sender = channel.sender();
        let handle = std::thread::spawn(move || {
            for i in 0..3 {
                sender.publish(GeneratedArtifact {
                    task: TaskId::new(),
                    code: format!("print({i})"),
                });
            }
        });
        handle.join().unwrap();

        let codes: Vec<_> = std::iter::from_fn(|| channel.poll()).map(|a| a.code).collect();
        assert_eq!(codes, ["print(0)", "print(1)", "print(2)"]);
    }
}
