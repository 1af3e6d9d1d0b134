//! The adapter contract, registry, and shared upstream HTTP client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;

use relay_core::{
    ChannelKind, ChatChunk, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse,
    RelayContext, RelayError, RelayResult,
};

use crate::stream::{self, StreamHandle, StreamSettings};

/// Longest upstream error body carried into a [`RelayError::Upstream`].
const MAX_ERROR_BODY: usize = 2048;

/// Per-stream decoder state handed to [`RelayAdapter::decode_chunk`].
///
/// Tracks the text already emitted downstream. Providers with cumulative
/// delta semantics (each frame repeats the whole transcript so far) are
/// normalized here into true increments; incremental providers append
/// through [`StreamState::push_delta`] so the final transcript is available
/// for the stream summary either way.
#[derive(Debug, Default)]
pub struct StreamState {
    emitted: String,
}

impl StreamState {
    /// Fresh state for a new stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incremental delta that is about to be forwarded.
    pub fn push_delta(&mut self, delta: &str) {
        self.emitted.push_str(delta);
    }

    /// Reduce a cumulative transcript snapshot to the not-yet-emitted suffix.
    ///
    /// Returns `None` when the snapshot adds nothing. If the snapshot does
    /// not extend the emitted text (the provider rewrote history), the whole
    /// snapshot is re-emitted and becomes the new baseline.
    pub fn diff_cumulative(&mut self, full_text: &str) -> Option<String> {
        let suffix = full_text
            .strip_prefix(self.emitted.as_str())
            .unwrap_or(full_text);
        if suffix.is_empty() {
            return None;
        }
        let delta = suffix.to_string();
        self.emitted = full_text.to_string();
        Some(delta)
    }

    /// Text emitted downstream so far.
    #[must_use]
    pub fn emitted_text(&self) -> &str {
        &self.emitted
    }

    /// Consume the state, yielding the full emitted transcript.
    #[must_use]
    pub fn into_text(self) -> String {
        self.emitted
    }
}

/// Translation between the hub's canonical wire format and one provider
/// family's native format.
///
/// Implementations are stateless value translators; all I/O lives in
/// [`UpstreamClient`] and [`stream`]. Dispatch is by the channel's
/// [`ChannelKind`] through the [`AdapterRegistry`].
pub trait RelayAdapter: Send + Sync + std::fmt::Debug {
    /// Endpoint URL for this attempt, derived from the channel's base URL
    /// and the relay mode.
    fn build_url(&self, ctx: &RelayContext) -> String;

    /// Install authorization and provider dialect headers.
    fn setup_headers(&self, ctx: &RelayContext, headers: &mut HeaderMap) -> RelayResult<()>;

    /// Canonical chat request to provider request body, with the upstream
    /// model name substituted.
    fn convert_chat(&self, ctx: &RelayContext, request: &ChatRequest) -> RelayResult<Value>;

    /// Canonical embeddings request to provider request body.
    fn convert_embeddings(
        &self,
        ctx: &RelayContext,
        request: &EmbeddingsRequest,
    ) -> RelayResult<Value>;

    /// Provider batch body to canonical chat response.
    ///
    /// Usage normalization is applied by the caller afterwards; decoders
    /// return the figures as the provider reported them.
    fn decode_chat(&self, ctx: &RelayContext, body: &[u8]) -> RelayResult<ChatResponse>;

    /// Provider embeddings body to canonical response.
    ///
    /// The default parses the OpenAI wire shape; providers with a native
    /// envelope override it.
    fn decode_embeddings(
        &self,
        _ctx: &RelayContext,
        body: &[u8],
    ) -> RelayResult<EmbeddingsResponse> {
        serde_json::from_slice(body).map_err(RelayError::decode)
    }

    /// One SSE data payload to zero or one canonical chunk.
    ///
    /// The payload never includes the `data:` prefix or the `[DONE]`
    /// sentinel. Cumulative providers diff against `state` here. Usage
    /// attached to the returned chunk is absorbed by the stream relay and
    /// re-emitted once at stream end, so decoders simply pass it through.
    fn decode_chunk(
        &self,
        ctx: &RelayContext,
        payload: &str,
        state: &mut StreamState,
    ) -> RelayResult<Option<ChatChunk>>;
}

/// Adapter lookup keyed by channel kind.
pub struct AdapterRegistry {
    adapters: HashMap<ChannelKind, Arc<dyn RelayAdapter>>,
}

impl AdapterRegistry {
    /// Registry with every compiled-in provider family registered.
    #[must_use]
    pub fn new() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "openai")]
        registry.register(ChannelKind::OpenAi, Arc::new(crate::OpenAiAdapter::new()));
        #[cfg(feature = "deepseek")]
        registry.register(ChannelKind::DeepSeek, Arc::new(crate::DeepSeekAdapter::new()));
        #[cfg(feature = "dashscope")]
        registry.register(
            ChannelKind::DashScope,
            Arc::new(crate::DashScopeAdapter::new()),
        );
        registry
    }

    /// Registry with no adapters; tests register stubs into it.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register (or replace) the adapter for a kind.
    pub fn register(&mut self, kind: ChannelKind, adapter: Arc<dyn RelayAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    /// Adapter for a kind; a miss means the hub is misconfigured.
    pub fn get(&self, kind: ChannelKind) -> RelayResult<Arc<dyn RelayAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| RelayError::config(format!("no adapter registered for channel kind {kind}")))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables for the shared [`UpstreamClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// TCP/TLS connect timeout for every upstream request
    pub connect_timeout: Duration,
    /// Total deadline for batch requests; streams are exempt
    pub upstream_timeout: Duration,
    /// Inactivity window after which a stream is abandoned
    pub stream_idle_timeout: Duration,
    /// Capacity of the bounded producer/consumer chunk channel
    pub stream_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(60),
            stream_buffer: 16,
        }
    }
}

impl ClientSettings {
    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the batch request deadline.
    #[must_use]
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Set the stream inactivity window.
    #[must_use]
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Set the chunk channel capacity.
    #[must_use]
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }
}

/// Shared HTTP front door for all relay attempts.
///
/// One instance serves every channel; everything attempt-specific arrives
/// in the [`RelayContext`]. The inner client carries only a connect timeout
/// so long-lived streams are never cut off mid-flight; batch calls get a
/// per-request deadline instead.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    registry: Arc<AdapterRegistry>,
    settings: ClientSettings,
}

impl UpstreamClient {
    /// Build the client around an adapter registry.
    pub fn new(registry: Arc<AdapterRegistry>, settings: ClientSettings) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(RelayError::transport)?;
        Ok(Self {
            http,
            registry,
            settings,
        })
    }

    /// Execute a batch chat completion against the channel in `ctx`.
    pub async fn relay_chat(
        &self,
        ctx: &RelayContext,
        request: &ChatRequest,
    ) -> RelayResult<ChatResponse> {
        let adapter = self.registry.get(ctx.channel_kind)?;
        let body = adapter.convert_chat(ctx, request)?;
        let response = self
            .post_json(adapter.as_ref(), ctx, &body, Some(self.settings.upstream_timeout))
            .await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(RelayError::transport)?;
        if !status.is_success() {
            return Err(upstream_error(status, &bytes));
        }
        let mut decoded = adapter.decode_chat(ctx, &bytes)?;
        if let Some(usage) = decoded.usage.as_mut() {
            usage.apply_cache_discount(ctx.cache_discount);
        }
        Ok(decoded)
    }

    /// Open a streaming chat completion and hand back the normalized stream.
    ///
    /// The upstream status line is checked before any chunk is forwarded, so
    /// a provider-side rejection surfaces as a regular [`RelayError`] rather
    /// than a broken stream.
    pub async fn relay_chat_stream(
        &self,
        ctx: &RelayContext,
        request: &ChatRequest,
    ) -> RelayResult<StreamHandle> {
        let adapter = self.registry.get(ctx.channel_kind)?;
        let body = adapter.convert_chat(ctx, request)?;
        let response = self.post_json(adapter.as_ref(), ctx, &body, None).await?;
        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.map_err(RelayError::transport)?;
            return Err(upstream_error(status, &bytes));
        }
        let settings = StreamSettings {
            idle_timeout: self.settings.stream_idle_timeout,
            buffer: self.settings.stream_buffer,
            include_usage: request.include_usage(),
        };
        Ok(stream::relay_sse(adapter, ctx.clone(), response, settings))
    }

    /// Execute an embeddings request against the channel in `ctx`.
    pub async fn relay_embeddings(
        &self,
        ctx: &RelayContext,
        request: &EmbeddingsRequest,
    ) -> RelayResult<EmbeddingsResponse> {
        let adapter = self.registry.get(ctx.channel_kind)?;
        let body = adapter.convert_embeddings(ctx, request)?;
        let response = self
            .post_json(adapter.as_ref(), ctx, &body, Some(self.settings.upstream_timeout))
            .await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(RelayError::transport)?;
        if !status.is_success() {
            return Err(upstream_error(status, &bytes));
        }
        let mut decoded = adapter.decode_embeddings(ctx, &bytes)?;
        decoded.usage.apply_cache_discount(ctx.cache_discount);
        Ok(decoded)
    }

    async fn post_json(
        &self,
        adapter: &dyn RelayAdapter,
        ctx: &RelayContext,
        body: &Value,
        deadline: Option<Duration>,
    ) -> RelayResult<reqwest::Response> {
        let url = adapter.build_url(ctx);
        let mut headers = HeaderMap::new();
        adapter.setup_headers(ctx, &mut headers)?;
        debug!(
            channel_id = ctx.channel_id,
            kind = %ctx.channel_kind,
            url = %url,
            stream = ctx.stream,
            "dispatching upstream request"
        );
        let mut request = self.http.post(&url).headers(headers).json(body);
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }
        request.send().await.map_err(RelayError::transport)
    }
}

/// Standard `Authorization: Bearer <key>` header value.
pub(crate) fn bearer_value(ctx: &RelayContext) -> RelayResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", ctx.api_key.expose_secret()))
        .map_err(|_| RelayError::config("api key contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Install the standard bearer authorization header.
pub(crate) fn insert_bearer(ctx: &RelayContext, headers: &mut HeaderMap) -> RelayResult<()> {
    headers.insert(AUTHORIZATION, bearer_value(ctx)?);
    Ok(())
}

/// Map a non-success upstream status and body into [`RelayError::Upstream`].
pub(crate) fn upstream_error(status: StatusCode, body: &[u8]) -> RelayError {
    let text = String::from_utf8_lossy(body);
    let body = if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    } else {
        text.into_owned()
    };
    RelayError::Upstream {
        status: status.as_u16(),
        body,
    }
}
