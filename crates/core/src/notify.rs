use crate::quota::Plan;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Delivery is best-effort; a failed or slow sink never blocks the
/// request path.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    UsageRecorded { tenant_id: i64, tokens: i64 },
    QuotaExhausted { tenant_id: i64, plan: Plan },
    DocumentDeleted { tenant_id: i64, document_id: i64 },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(?notification, "notification");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn spawn(sink: impl NotificationSink + 'static) -> Notifier {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                if let Err(error) = sink.deliver(&notification).await {
                    tracing::warn!(%error, ?notification, "notification delivery failed");
                }
            }
        });

        Notifier { sender }
    }

    // Never blocks; a closed channel is ignored.
    pub fn emit(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}
