//! Request dispatcher
//!
//! Routes each request to its provider's bounded queue. A full queue
//! blocks the caller (backpressure) until a slot frees or the request's
//! context is cancelled. Pools are created lazily on first use.

pub mod pool;

pub use pool::{ProviderPool, WorkItem};

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::GatewayConfig;
use crate::core::keys::KeySelector;
use crate::core::providers::ProviderRegistry;
use crate::core::types::{GatewayRequest, GatewayResponse, ProviderType, StreamChunk};
use crate::utils::error::{GatewayError, Result};

/// Routes requests onto per-provider worker pools
pub struct Dispatcher {
    config: Arc<GatewayConfig>,
    registry: Arc<ProviderRegistry>,
    pools: DashMap<ProviderType, Arc<ProviderPool>>,
    selectors: DashMap<ProviderType, Arc<KeySelector>>,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher over the registry; pools start lazily
    pub fn new(config: Arc<GatewayConfig>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            registry,
            pools: DashMap::new(),
            selectors: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Key selector for one provider, built from config on first use
    pub fn selector(&self, provider: &ProviderType) -> Arc<KeySelector> {
        self.selectors
            .entry(provider.clone())
            .or_insert_with(|| {
                let keys = self
                    .config
                    .provider(provider)
                    .map(|section| section.keys.clone())
                    .unwrap_or_default();
                Arc::new(KeySelector::new(provider.clone(), keys))
            })
            .clone()
    }

    fn pool(&self, provider: &ProviderType) -> Result<Arc<ProviderPool>> {
        if let Some(pool) = self.pools.get(provider) {
            return Ok(pool.clone());
        }
        let adapter = self.registry.get(provider)?;
        let selector = self.selector(provider);
        let section = self.config.provider_or_default(provider);
        let entry = self
            .pools
            .entry(provider.clone())
            .or_insert_with(|| {
                Arc::new(ProviderPool::new(provider.clone(), &section, adapter, selector))
            });
        Ok(entry.clone())
    }

    fn sender(&self, provider: &ProviderType) -> Result<mpsc::Sender<WorkItem>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::ShuttingDown);
        }
        self.pool(provider)?
            .sender()
            .ok_or(GatewayError::ShuttingDown)
    }

    /// Enqueue a work item, respecting cancellation while blocked on a
    /// full queue.
    async fn enqueue(&self, request: &GatewayRequest, item: WorkItem) -> Result<()> {
        let sender = self.sender(&request.provider)?;
        let cancel = request.context.cancel_token().clone();
        tokio::select! {
            sent = sender.send(item) => {
                sent.map_err(|_| GatewayError::ShuttingDown)
            }
            _ = cancel.cancelled() => Err(GatewayError::RequestCancelled),
        }
    }

    /// Execute a unary request on the provider's pool
    pub async fn dispatch(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(
            request,
            WorkItem::Unary {
                request: request.clone(),
                reply: reply_tx,
            },
        )
        .await?;

        let cancel = request.context.cancel_token().clone();
        tokio::select! {
            reply = reply_rx => {
                reply.map_err(|_| GatewayError::ShuttingDown)?
            }
            _ = cancel.cancelled() => Err(GatewayError::RequestCancelled),
        }
    }

    /// Execute a streaming request; resolves once the stream is
    /// established, returning the live chunk channel.
    pub async fn dispatch_stream(
        &self,
        request: &GatewayRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(
            request,
            WorkItem::Stream {
                request: request.clone(),
                reply: reply_tx,
            },
        )
        .await?;

        let cancel = request.context.cancel_token().clone();
        tokio::select! {
            reply = reply_rx => {
                reply.map_err(|_| GatewayError::ShuttingDown)?
            }
            _ = cancel.cancelled() => Err(GatewayError::RequestCancelled),
        }
    }

    /// Close every queue, drain in-flight work, join all workers
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let pools: Vec<Arc<ProviderPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.shutdown().await;
        }
        info!("dispatcher drained");
    }
}
