//! Out-of-band notification seam
//!
//! The prober emits edge-triggered alerts when a token drops offline.
//! Delivery (e.g. a chat-bot webhook) is an external collaborator
//! behind the [`Notifier`] trait; the pool only produces the message.

use async_trait::async_trait;

/// Delivers short, HTML-capable alert messages out of band.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, message: &str) -> anyhow::Result<()>;
}

/// Notifier that drops messages on the floor, for deployments without
/// a configured notification channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn emit(&self, message: &str) -> anyhow::Result<()> {
        tracing::debug!(message = %message, "notification dropped (no notifier configured)");
        Ok(())
    }
}
