use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use shoal_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use shoal_core::message::{Message, Scope, WireMessage};

const HISTORY_SOURCE: &str = "history";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("history endpoint returned status {0}")]
    Status(u16),

    #[error("history payload could not be decoded: {0}")]
    Decode(String),
}

/// Backward-pagination state for one conversation context.
///
/// `loading` and `exhausted` gate every fetch: at most one request is in
/// flight per context, and once a page comes back empty no further requests
/// are made until the next context switch resets this state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub offset: u32,
    pub limit: u32,
    pub exhausted: bool,
    pub loading: bool,
}

impl PaginationState {
    pub fn new(limit: u32) -> Self {
        Self {
            offset: 0,
            limit: limit.max(1),
            exhausted: false,
            loading: false,
        }
    }

    /// Back to the initial window; called on context switch.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.exhausted = false;
        self.loading = false;
    }

    /// Claim the in-flight slot. Returns `false` (and changes nothing) when a
    /// fetch is already running or the context is exhausted.
    pub fn try_begin(&mut self) -> bool {
        if self.loading || self.exhausted {
            return false;
        }
        self.loading = true;
        true
    }

    /// Record a resolved page. An empty page marks the context exhausted; a
    /// non-empty one advances the window. Clears `loading` either way.
    pub fn complete_page(&mut self, page_len: usize) {
        self.loading = false;
        if page_len == 0 {
            self.exhausted = true;
        } else {
            self.offset += page_len as u32;
        }
    }

    /// Record a failed fetch: the window stays where it was so a retry is
    /// safe, and `loading` is cleared so the indicator cannot stick.
    pub fn complete_failed(&mut self) {
        self.loading = false;
    }
}

/// The paginated retrieval endpoint, newest-first.
pub trait HistoryService: Send + Sync + 'static {
    fn fetch(
        &self,
        scope: &Scope,
        offset: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<WireMessage>, HistoryError>> + Send;
}

/// REST history endpoint: `GET {base}/api/messages?limit&offset[&peer]`.
pub struct HttpHistoryService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistoryService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl HistoryService for HttpHistoryService {
    async fn fetch(
        &self,
        scope: &Scope,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<WireMessage>, HistoryError> {
        let url = format!("{}/api/messages", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)]);
        if let Scope::Private(peer) = scope {
            request = request.query(&[("peer", peer.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status.as_u16()));
        }

        response
            .json::<Vec<WireMessage>>()
            .await
            .map_err(|e| HistoryError::Decode(e.to_string()))
    }
}

/// Runs history fetches off the dispatch loop and reports the outcome as
/// `system.history.*` events.
///
/// Each request carries the context epoch captured when it was issued; the
/// controller drops a page whose epoch no longer matches the active context,
/// so a switch that happens mid-fetch can never merge a stale page into the
/// wrong timeline. That check substitutes for cancellation.
pub struct HistoryLoader<H: HistoryService> {
    service: Arc<H>,
    bus: Arc<dyn EventBus>,
    viewer_id: String,
}

impl<H: HistoryService> HistoryLoader<H> {
    pub fn new(service: Arc<H>, bus: Arc<dyn EventBus>, viewer_id: impl Into<String>) -> Self {
        Self {
            service,
            bus,
            viewer_id: viewer_id.into(),
        }
    }

    /// Fire the fetch for `[offset, offset + limit)` of `scope`. The caller
    /// is responsible for the at-most-one-in-flight gate
    /// ([`PaginationState::try_begin`]).
    pub fn spawn_fetch(&self, scope: Scope, epoch: u64, offset: u32, limit: u32) {
        let service = Arc::clone(&self.service);
        let bus = Arc::clone(&self.bus);
        let viewer_id = self.viewer_id.clone();

        tokio::spawn(async move {
            let payload = match service.fetch(&scope, offset, limit).await {
                Ok(page) => {
                    debug!(count = page.len(), offset, epoch, "history page fetched");
                    let messages = decode_page(page, &viewer_id);
                    EventPayload::HistoryPageLoaded { epoch, messages }
                }
                Err(e) => {
                    warn!(error = %e, offset, epoch, "history fetch failed");
                    EventPayload::HistoryPageFailed {
                        epoch,
                        error: e.to_string(),
                    }
                }
            };

            let channel = match &payload {
                EventPayload::HistoryPageLoaded { .. } => "system.history.loaded",
                _ => "system.history.failed",
            };
            let event = Event::new(
                Channel::new(channel).unwrap(),
                EventSource::System(HISTORY_SOURCE.to_string()),
                payload,
            );
            if let Err(error) = bus.publish(event) {
                warn!(error = %error, "failed to publish history result");
            }
        });
    }
}

/// Decode a fetched page, dropping records the timeline could not order.
/// Wire order (newest-first) is preserved for the timeline merge.
fn decode_page(page: Vec<WireMessage>, viewer_id: &str) -> Vec<Message> {
    page.into_iter()
        .filter_map(|record| match record.into_message(viewer_id) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "dropping malformed history record");
                None
            }
        })
        .collect()
}
