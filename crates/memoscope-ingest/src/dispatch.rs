//! Plugin dispatch (`4.D`): an in-process `tokio::sync::broadcast` channel
//! fans "entity ready" events out to the builtin OCR/caption subscribers,
//! which call the Model Gateway and patch the catalog with the result.
//! Externally-registered plugins (`Plugin.webhook_url` set) are notified
//! over HTTP instead — the same POST-a-JSON-body idiom the Model Gateway
//! uses for its remote back-ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use memoscope_catalog::{Catalog, DataType, SourceType};
use memoscope_gateway::ModelGateway;
use tokio::sync::{broadcast, Mutex};
use tracing::{instrument, warn};

const CHANNEL_CAPACITY: usize = 1024;
const WEBHOOK_RETRIES: u32 = 3;
const WEBHOOK_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EntityReadyEvent {
    pub entity_id: i64,
    pub path: PathBuf,
}

/// Owns the broadcast sender and the HTTP client used for external
/// webhooks; builtin subscriber tasks are spawned once at construction and
/// live for the process lifetime.
pub struct PluginDispatcher {
    tx: broadcast::Sender<EntityReadyEvent>,
    http: reqwest::Client,
}

impl PluginDispatcher {
    /// Spawns the builtin OCR and caption subscriber tasks, each patching
    /// the catalog with its result and bumping `last_scan_at` so the
    /// reindex job picks the entity up (`4.D`/`4.A`: `entities_needing_reindex`).
    pub fn spawn(catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let dispatcher = Arc::new(Self { tx, http: reqwest::Client::new() });

        spawn_ocr_subscriber(dispatcher.subscribe(), catalog.clone(), gateway.clone());
        spawn_caption_subscriber(dispatcher.subscribe(), catalog, gateway);

        dispatcher
    }

    fn subscribe(&self) -> broadcast::Receiver<EntityReadyEvent> {
        self.tx.subscribe()
    }

    /// Publishes an "entity ready" event to every builtin subscriber, then
    /// fires (fire-and-forget) webhook notifications to every externally
    /// registered plugin bound to the entity's library.
    #[instrument(skip(self))]
    pub async fn entity_ready(&self, entity_id: i64, path: PathBuf) {
        // No subscribers is not an error: a fresh process may not have
        // finished spawning yet, and the reindex job is the backstop.
        let _ = self.tx.send(EntityReadyEvent { entity_id, path });
    }

    pub async fn notify_webhooks(&self, webhook_urls: &[String], entity_id: i64) {
        for url in webhook_urls {
            let http = self.http.clone();
            let url = url.clone();
            tokio::spawn(async move {
                post_with_retry(&http, &url, entity_id).await;
            });
        }
    }
}

async fn post_with_retry(http: &reqwest::Client, url: &str, entity_id: i64) {
    for attempt in 1..=WEBHOOK_RETRIES {
        let result = http
            .post(url)
            .json(&serde_json::json!({ "entity_id": entity_id }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => warn!(url, status = %resp.status(), attempt, "webhook returned non-success"),
            Err(e) => warn!(url, attempt, error = %e, "webhook request failed"),
        }
        if attempt < WEBHOOK_RETRIES {
            tokio::time::sleep(WEBHOOK_BACKOFF).await;
        }
    }
}

fn spawn_ocr_subscriber(mut rx: broadcast::Receiver<EntityReadyEvent>, catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>) {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ocr subscriber lagged behind entity-ready events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            match gateway.recognize_text(&event.path).await {
                Ok(lines) => {
                    let text = lines.iter().map(|l| l.text.clone()).collect::<Vec<_>>().join("\n");
                    let cat = catalog.lock().await;
                    memoscope_catalog::log_and_ignore(
                        cat.upsert_metadata(event.entity_id, "ocr_result", &text, "builtin_ocr", SourceType::PluginGenerated, DataType::Text),
                        "ocr metadata patch",
                    );
                    memoscope_catalog::log_and_ignore(cat.touch(event.entity_id), "ocr touch");
                }
                Err(e) => warn!(entity_id = event.entity_id, error = %e, "ocr plugin failed"),
            }
        }
    });
}

fn spawn_caption_subscriber(mut rx: broadcast::Receiver<EntityReadyEvent>, catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>) {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "caption subscriber lagged behind entity-ready events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            match gateway.caption_image(&event.path, None).await {
                Ok(caption) => {
                    let cat = catalog.lock().await;
                    memoscope_catalog::log_and_ignore(
                        cat.upsert_metadata(event.entity_id, "caption", &caption, "builtin_caption", SourceType::PluginGenerated, DataType::Text),
                        "caption metadata patch",
                    );
                    memoscope_catalog::log_and_ignore(cat.touch(event.entity_id), "caption touch");
                }
                Err(e) => warn!(entity_id = event.entity_id, error = %e, "caption plugin failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoscope_gateway::{EmbeddingConfig, OcrConfig, VlmConfig};

    #[tokio::test]
    async fn entity_ready_with_no_subscribers_does_not_error() {
        let (tx, _) = broadcast::channel(8);
        let dispatcher = PluginDispatcher { tx, http: reqwest::Client::new() };
        dispatcher.entity_ready(1, PathBuf::from("/tmp/a.webp")).await;
    }

    #[tokio::test]
    async fn spawn_wires_both_builtin_subscribers() {
        let catalog = Arc::new(Mutex::new(Catalog::in_memory().unwrap()));
        let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
        let dispatcher = PluginDispatcher::spawn(catalog, gateway);
        // Two builtin subscribers were registered at spawn time.
        assert_eq!(dispatcher.tx.receiver_count(), 2);
    }
}
