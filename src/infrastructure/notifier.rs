use crate::domain::account::AccountId;
use crate::domain::ports::{Notification, Notifier, Topic};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

/// Writes every notification to the log. Used when no push channel is wired.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, topic: Topic, id: AccountId, message: Notification) -> Result<()> {
        let payload = serde_json::to_string(&message)?;
        info!(?topic, recipient = id, %payload, "notification");
        Ok(())
    }
}

/// A notification addressed to one hospital or vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: Topic,
    pub recipient: AccountId,
    pub message: Notification,
}

/// Fans notifications out to any number of subscribers (websocket sessions,
/// test receivers). Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, topic: Topic, id: AccountId, message: Notification) -> Result<()> {
        let _ = self.sender.send(Envelope {
            topic,
            recipient: id,
            message,
        });
        Ok(())
    }
}
