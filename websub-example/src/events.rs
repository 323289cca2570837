//! Printing of subscription events.

use tokio::sync::mpsc;
use tracing::warn;
use websub_subscriber::SubscriptionEvent;

/// An event tagged with the callback it belongs to.
#[derive(Debug)]
pub struct LabeledEvent {
    pub callback: String,
    pub hub: String,
    pub event: SubscriptionEvent,
}

/// Forward one subscription's events into the shared printer channel.
///
/// Ends when the engine drops the subscription or the printer goes away.
pub async fn forward(
    callback: String,
    hub: String,
    mut events: mpsc::Receiver<SubscriptionEvent>,
    sink: mpsc::Sender<LabeledEvent>,
) {
    while let Some(event) = events.recv().await {
        let labeled = LabeledEvent {
            callback: callback.clone(),
            hub: hub.clone(),
            event,
        };
        if sink.send(labeled).await.is_err() {
            break;
        }
    }
}

fn short(callback: &str) -> &str {
    callback.get(..12).unwrap_or(callback)
}

/// One line per event; bodies only when asked for.
pub fn describe(labeled: &LabeledEvent, show_body: bool) -> String {
    let prefix = format!("[{} @ {}]", short(&labeled.callback), labeled.hub);
    match &labeled.event {
        SubscriptionEvent::Validated { expires_at } => {
            format!("{prefix} verified, lease ends {}", expires_at.to_rfc3339())
        }
        SubscriptionEvent::Denied { reason } => format!(
            "{prefix} denied: {}",
            reason.as_deref().unwrap_or("no reason given")
        ),
        SubscriptionEvent::Content { content_type, body } => {
            let content_type = content_type.as_deref().unwrap_or("unknown type");
            if show_body {
                format!(
                    "{prefix} update ({content_type}, {} bytes)\n{}",
                    body.len(),
                    String::from_utf8_lossy(body)
                )
            } else {
                format!("{prefix} update ({content_type}, {} bytes)", body.len())
            }
        }
        SubscriptionEvent::ContentRejected { reason } => {
            warn!(callback = %labeled.callback, %reason, "rejected delivery");
            format!("{prefix} rejected delivery: {reason}")
        }
        SubscriptionEvent::Renewing => format!("{prefix} renewing"),
        SubscriptionEvent::Expired => format!("{prefix} expired"),
        SubscriptionEvent::Cancelled => format!("{prefix} cancelled"),
    }
}
