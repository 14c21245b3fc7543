use crate::dispatch::{ContextClient, RecommendService, RetrievalClient};
use anyhow::{bail, Result};
use async_trait::async_trait;
use recflow_core::message::{ItemReply, RecRequest};
use recflow_core::{ScopeId, Status, StatusResult};
use std::sync::Arc;

/// What the orchestrator does when a context or retrieval call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The failed stage contributes nothing; the request carries on.
    #[default]
    BestEffort,
    /// The first failure aborts the request.
    Strict,
}

/// Enriches the request with every context stage in order, then fans out to
/// the retrieval stages and concatenates their candidates.
pub struct Recommender {
    contexts: Vec<(ScopeId, Arc<dyn ContextClient>)>,
    retrievals: Vec<Arc<dyn RetrievalClient>>,
    request_num: usize,
    policy: FailurePolicy,
}

impl Recommender {
    pub fn new(request_num: usize) -> Self {
        Self {
            contexts: Vec::new(),
            retrievals: Vec::new(),
            request_num,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a context stage writing into `scope`. Each scope has one writer.
    pub fn add_context(&mut self, scope: ScopeId, client: Arc<dyn ContextClient>) -> Result<()> {
        if self.contexts.iter().any(|(s, _)| *s == scope) {
            bail!("context scope {scope} is already wired");
        }
        self.contexts.push((scope, client));
        Ok(())
    }

    pub fn add_retrieval(&mut self, client: Arc<dyn RetrievalClient>) {
        self.retrievals.push(client);
    }

    async fn enrich(&self, req: &RecRequest) -> StatusResult<RecRequest> {
        let mut working = req.clone();
        for (scope, client) in &self.contexts {
            match client.call_context(&working).await {
                Ok(reply) => {
                    working.context.insert(*scope, reply.context);
                }
                Err(e) if self.policy == FailurePolicy::Strict => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        request_id = %req.request_id,
                        scope,
                        error = %e,
                        "context stage failed"
                    );
                }
            }
        }
        Ok(working)
    }
}

#[async_trait]
impl RecommendService for Recommender {
    async fn recommend(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        let enriched = Arc::new(self.enrich(req).await?);

        // Retrievals do not depend on each other; run them together and
        // collect in wiring order.
        let handles: Vec<_> = self
            .retrievals
            .iter()
            .map(|client| {
                let client = Arc::clone(client);
                let request = Arc::clone(&enriched);
                tokio::spawn(async move { client.call_retrieval(&request).await })
            })
            .collect();

        let mut reply = ItemReply { request_id: req.request_id.clone(), items: Vec::new() };
        let mut handles = handles.into_iter().enumerate();
        while let Some((position, handle)) = handles.next() {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(Status::cancelled(format!("retrieval task failed: {e}"))));
            match result {
                Ok(items) => reply.items.extend(items.items),
                Err(e) if self.policy == FailurePolicy::Strict => {
                    // Stages still in flight must not keep calling their peers.
                    for (_, pending) in handles.by_ref() {
                        pending.abort();
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %req.request_id,
                        position,
                        error = %e,
                        "retrieval stage failed"
                    );
                }
            }
        }
        reply.items.truncate(self.request_num);
        tracing::debug!(request_id = %req.request_id, items = reply.items.len(), "recommended");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recflow_core::message::{ContextReply, RecItem};
    use recflow_core::FeatureList;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FailingContext;

    #[async_trait]
    impl ContextClient for FailingContext {
        async fn call_context(&self, _req: &RecRequest) -> StatusResult<ContextReply> {
            Err(Status::cancelled("down"))
        }
    }

    /// Writes field 1 = "<scope-count>" so later stages can see earlier ones.
    struct CountingContext;

    #[async_trait]
    impl ContextClient for CountingContext {
        async fn call_context(&self, req: &RecRequest) -> StatusResult<ContextReply> {
            let mut reply =
                ContextReply { request_id: req.request_id.clone(), ..Default::default() };
            reply.context.insert(1, FeatureList::bytes([req.context.len().to_string()]));
            Ok(reply)
        }
    }

    /// Returns `count` items tagged with `name`, plus what it saw in scope 10.
    struct FixedRetrieval {
        name: &'static str,
        count: usize,
    }

    #[async_trait]
    impl RetrievalClient for FixedRetrieval {
        async fn call_retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply> {
            let seen = req.context.get(&10).map(|m| m.len()).unwrap_or(0);
            let items = (0..self.count)
                .map(|i| {
                    let mut item = RecItem::default();
                    item.item_id.insert(100, FeatureList::bytes([format!("{}{}", self.name, i)]));
                    item.item_id.insert(1, FeatureList::IntList(vec![seen as i64]));
                    item
                })
                .collect();
            Ok(ItemReply { request_id: req.request_id.clone(), items })
        }
    }

    /// Sleeps before answering like `inner`, then records that it finished.
    struct SlowRetrieval {
        inner: FixedRetrieval,
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    impl SlowRetrieval {
        fn new(name: &'static str, count: usize, delay_ms: u64) -> Self {
            Self {
                inner: FixedRetrieval { name, count },
                delay: Duration::from_millis(delay_ms),
                finished: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl RetrievalClient for SlowRetrieval {
        async fn call_retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            self.inner.call_retrieval(req).await
        }
    }

    struct FailingRetrieval;

    #[async_trait]
    impl RetrievalClient for FailingRetrieval {
        async fn call_retrieval(&self, _req: &RecRequest) -> StatusResult<ItemReply> {
            Err(Status::cancelled("down"))
        }
    }

    fn ids(reply: &ItemReply) -> Vec<String> {
        reply.items.iter().map(|i| i.item_id[&100].as_bytes().unwrap()[0].clone()).collect()
    }

    fn request() -> RecRequest {
        RecRequest { request_id: "req-7".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn truncates_in_wiring_order() {
        let mut rec = Recommender::new(4);
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "a", count: 3 }));
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "b", count: 3 }));
        let reply = rec.recommend(&request()).await.unwrap();
        assert_eq!(ids(&reply), vec!["a0", "a1", "a2", "b0"]);
        assert_eq!(reply.request_id, "req-7");
    }

    #[tokio::test]
    async fn slow_first_stage_still_comes_first() {
        let mut rec = Recommender::new(10);
        rec.add_retrieval(Arc::new(SlowRetrieval::new("a", 2, 100)));
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "b", count: 2 }));
        let reply = rec.recommend(&request()).await.unwrap();
        assert_eq!(ids(&reply), vec!["a0", "a1", "b0", "b1"]);
    }

    #[tokio::test]
    async fn strict_failure_aborts_pending_stages() {
        let slow = Arc::new(SlowRetrieval::new("b", 1, 100));
        let finished = Arc::clone(&slow.finished);
        let mut rec = Recommender::new(10).with_policy(FailurePolicy::Strict);
        rec.add_retrieval(Arc::new(FailingRetrieval));
        rec.add_retrieval(slow);
        assert!(rec.recommend(&request()).await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_stages_are_swallowed() {
        let mut rec = Recommender::new(10);
        rec.add_context(10, Arc::new(FailingContext)).unwrap();
        rec.add_retrieval(Arc::new(FailingRetrieval));
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "b", count: 2 }));
        let reply = rec.recommend(&request()).await.unwrap();
        assert_eq!(reply.request_id, "req-7");
        assert_eq!(ids(&reply), vec!["b0", "b1"]);
        // Scope 10 was never written.
        assert_eq!(reply.items[0].item_id[&1], FeatureList::IntList(vec![0]));
    }

    #[tokio::test]
    async fn every_stage_failing_still_replies() {
        let mut rec = Recommender::new(10);
        rec.add_context(10, Arc::new(FailingContext)).unwrap();
        rec.add_retrieval(Arc::new(FailingRetrieval));
        let reply = rec.recommend(&request()).await.unwrap();
        assert_eq!(reply.request_id, "req-7");
        assert!(reply.items.is_empty());
    }

    #[tokio::test]
    async fn strict_policy_aborts() {
        let mut rec = Recommender::new(10).with_policy(FailurePolicy::Strict);
        rec.add_context(10, Arc::new(FailingContext)).unwrap();
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "b", count: 2 }));
        assert!(matches!(rec.recommend(&request()).await, Err(Status::Cancelled(_))));

        let mut rec = Recommender::new(10).with_policy(FailurePolicy::Strict);
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "a", count: 1 }));
        rec.add_retrieval(Arc::new(FailingRetrieval));
        assert!(rec.recommend(&request()).await.is_err());
    }

    #[tokio::test]
    async fn contexts_run_in_order_and_feed_retrieval() {
        let mut rec = Recommender::new(10);
        rec.add_context(20, Arc::new(CountingContext)).unwrap();
        rec.add_context(10, Arc::new(CountingContext)).unwrap();
        rec.add_retrieval(Arc::new(FixedRetrieval { name: "a", count: 1 }));
        let reply = rec.recommend(&request()).await.unwrap();
        // Scope 10 ran second and saw scope 20 already written.
        assert_eq!(reply.items[0].item_id[&1], FeatureList::IntList(vec![1]));
    }

    #[test]
    fn duplicate_scope_is_rejected() {
        let mut rec = Recommender::new(1);
        rec.add_context(5, Arc::new(FailingContext)).unwrap();
        assert!(rec.add_context(5, Arc::new(FailingContext)).is_err());
    }
}
