//! Uniform call interface between stages.
//!
//! Every capability has a client trait with two implementations: a local
//! one that calls the co-located handler directly, and a remote one that
//! posts the same message as JSON to the stage's HTTP route. Stages only
//! ever hold `Arc<dyn ...Client>`, so which one is used is decided when the
//! pipeline is wired.

use async_trait::async_trait;
use parking_lot::Mutex;
use recflow_core::message::{
    ContextReply, ForwardRequest, IndexerReply, InvertedRequest, ItemReply, RecRequest,
};
use recflow_core::status::ErrorBody;
use recflow_core::{HashIndex, ScopeId, Status, StatusResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const RECOMMEND_PATH: &str = "/recommend";

pub fn forward_path(indexer: &str) -> String { format!("/indexer/{indexer}/forward") }
pub fn inverted_path(indexer: &str) -> String { format!("/indexer/{indexer}/inverted") }
pub fn context_path(scope: ScopeId) -> String { format!("/context/{scope}") }
pub fn retrieval_path(retrieval_id: i32) -> String { format!("/retrieval/{retrieval_id}") }

// --- Handler side ---

#[async_trait]
pub trait ContextService: Send + Sync {
    async fn context(&self, req: &RecRequest) -> StatusResult<ContextReply>;
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply>;
}

#[async_trait]
pub trait RecommendService: Send + Sync {
    async fn recommend(&self, req: &RecRequest) -> StatusResult<ItemReply>;
}

// --- Caller side ---

#[async_trait]
pub trait IndexerClient: Send + Sync {
    async fn call_forward(&self, req: &ForwardRequest) -> StatusResult<IndexerReply>;
    async fn call_inverted(&self, req: &InvertedRequest) -> StatusResult<IndexerReply>;
}

#[async_trait]
pub trait ContextClient: Send + Sync {
    async fn call_context(&self, req: &RecRequest) -> StatusResult<ContextReply>;
}

#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn call_retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply>;
}

#[async_trait]
pub trait RecommendClient: Send + Sync {
    async fn call_recommend(&self, req: &RecRequest) -> StatusResult<ItemReply>;
}

pub struct LocalIndexerClient {
    index: Arc<HashIndex>,
}

impl LocalIndexerClient {
    pub fn new(index: Arc<HashIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl IndexerClient for LocalIndexerClient {
    async fn call_forward(&self, req: &ForwardRequest) -> StatusResult<IndexerReply> {
        self.index.forward(req)
    }

    async fn call_inverted(&self, req: &InvertedRequest) -> StatusResult<IndexerReply> {
        self.index.inverted(req)
    }
}

pub struct LocalContextClient {
    server: Arc<dyn ContextService>,
}

impl LocalContextClient {
    pub fn new(server: Arc<dyn ContextService>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ContextClient for LocalContextClient {
    async fn call_context(&self, req: &RecRequest) -> StatusResult<ContextReply> {
        self.server.context(req).await
    }
}

pub struct LocalRetrievalClient {
    server: Arc<dyn RetrievalService>,
}

impl LocalRetrievalClient {
    pub fn new(server: Arc<dyn RetrievalService>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl RetrievalClient for LocalRetrievalClient {
    async fn call_retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        self.server.retrieval(req).await
    }
}

pub struct LocalRecommendClient {
    server: Arc<dyn RecommendService>,
}

impl LocalRecommendClient {
    pub fn new(server: Arc<dyn RecommendService>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl RecommendClient for LocalRecommendClient {
    async fn call_recommend(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        self.server.recommend(req).await
    }
}

/// Lazily created HTTP handle to one peer.
///
/// Creating the handle does not touch the network, so a peer that is down
/// only shows up as a failed call. A connect failure drops the handle and
/// the next call builds a fresh one. The mutex only covers the
/// create-if-absent step; requests run outside it.
pub struct RemoteChannel {
    base_url: String,
    handle: Mutex<Option<Client>>,
}

impl RemoteChannel {
    pub fn connect(address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        let channel = Self { base_url, handle: Mutex::new(None) };
        channel.ping();
        channel
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn ping(&self) -> Option<Client> {
        let mut handle = self.handle.lock();
        if let Some(client) = handle.as_ref() {
            return Some(client.clone());
        }
        match Client::builder().build() {
            Ok(client) => {
                tracing::debug!(peer = %self.base_url, "created connection handle");
                *handle = Some(client.clone());
                Some(client)
            }
            Err(e) => {
                tracing::warn!(
                    peer = %self.base_url,
                    error = %e,
                    "could not create connection handle"
                );
                None
            }
        }
    }

    fn disconnect(&self) {
        self.handle.lock().take();
    }

    pub async fn call<Req, Rep>(&self, path: &str, req: &Req) -> StatusResult<Rep>
    where
        Req: Serialize + Sync,
        Rep: DeserializeOwned,
    {
        let client = self
            .ping()
            .ok_or_else(|| Status::cancelled(format!("no connection to {}", self.base_url)))?;
        let url = format!("{}{}", self.base_url, path);

        let resp = match client.post(&url).json(req).send().await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_connect() {
                    tracing::warn!(
                        %url,
                        error = %e,
                        "peer unreachable, dropping connection handle"
                    );
                    self.disconnect();
                }
                return Err(Status::cancelled(format!("calling {url}: {e}")));
            }
        };

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Rep>()
                .await
                .map_err(|e| Status::cancelled(format!("decoding reply from {url}: {e}")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Status::unimplemented(format!("{url} is not served")));
        }
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(body.into()),
            Err(_) => Err(Status::cancelled(format!("{url} answered {status}"))),
        }
    }
}

pub struct RemoteIndexerClient {
    channel: RemoteChannel,
    name: String,
}

impl RemoteIndexerClient {
    pub fn connect(address: &str, name: impl Into<String>) -> Self {
        Self { channel: RemoteChannel::connect(address), name: name.into() }
    }
}

#[async_trait]
impl IndexerClient for RemoteIndexerClient {
    async fn call_forward(&self, req: &ForwardRequest) -> StatusResult<IndexerReply> {
        self.channel.call(&forward_path(&self.name), req).await
    }

    async fn call_inverted(&self, req: &InvertedRequest) -> StatusResult<IndexerReply> {
        self.channel.call(&inverted_path(&self.name), req).await
    }
}

pub struct RemoteContextClient {
    channel: RemoteChannel,
    scope: ScopeId,
}

impl RemoteContextClient {
    pub fn connect(address: &str, scope: ScopeId) -> Self {
        Self { channel: RemoteChannel::connect(address), scope }
    }
}

#[async_trait]
impl ContextClient for RemoteContextClient {
    async fn call_context(&self, req: &RecRequest) -> StatusResult<ContextReply> {
        self.channel.call(&context_path(self.scope), req).await
    }
}

pub struct RemoteRetrievalClient {
    channel: RemoteChannel,
    retrieval_id: i32,
}

impl RemoteRetrievalClient {
    pub fn connect(address: &str, retrieval_id: i32) -> Self {
        Self { channel: RemoteChannel::connect(address), retrieval_id }
    }
}

#[async_trait]
impl RetrievalClient for RemoteRetrievalClient {
    async fn call_retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        self.channel.call(&retrieval_path(self.retrieval_id), req).await
    }
}

pub struct RemoteRecommendClient {
    channel: RemoteChannel,
}

impl RemoteRecommendClient {
    pub fn connect(address: &str) -> Self {
        Self { channel: RemoteChannel::connect(address) }
    }
}

#[async_trait]
impl RecommendClient for RemoteRecommendClient {
    async fn call_recommend(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        self.channel.call(RECOMMEND_PATH, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recflow_core::message::SearchClause;
    use recflow_core::{build_from_reader, BulkFormat};
    use std::io::Cursor;

    #[tokio::test]
    async fn local_indexer_passes_through() {
        let format = BulkFormat::new(vec![1, 2]);
        let (index, _) = build_from_reader(Cursor::new("a,x\nb,y\n"), &format).unwrap();
        let client = LocalIndexerClient::new(Arc::new(index));
        let req = InvertedRequest {
            clauses: vec![SearchClause::new().with_bytes(2, "y")],
            max_results: 5,
            requested_fields: vec![],
        };
        let reply = client.call_inverted(&req).await.unwrap();
        assert_eq!(reply.items.len(), 1);

        let bad = ForwardRequest { key_field: 9, keys: vec!["a".into()], requested_fields: vec![] };
        assert!(matches!(client.call_forward(&bad).await, Err(Status::Cancelled(_))));
    }

    #[test]
    fn channel_normalizes_address() {
        assert_eq!(RemoteChannel::connect("127.0.0.1:9000").base_url(), "http://127.0.0.1:9000");
        assert_eq!(RemoteChannel::connect("https://idx.local/").base_url(), "https://idx.local");
    }

    #[tokio::test]
    async fn unreachable_peer_is_cancelled() {
        // Nothing listens on port 1.
        let client = RemoteIndexerClient::connect("127.0.0.1:1", "items");
        assert!(client.channel.is_connected());
        let req = ForwardRequest { key_field: 1, keys: vec!["a".into()], requested_fields: vec![] };
        let res = client.call_forward(&req).await;
        assert!(matches!(res, Err(Status::Cancelled(_))));
        assert!(!client.channel.is_connected());

        // The next call reconnects before failing again.
        assert!(client.call_forward(&req).await.is_err());
    }
}
