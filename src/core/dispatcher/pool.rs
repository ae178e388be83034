//! Per-provider worker pool
//!
//! One bounded queue and a fixed set of workers per provider. Queue
//! capacity is the provider's `buffer_size`, worker count its
//! `concurrency`; together they bound queued-or-in-flight work at
//! `buffer_size + concurrency`.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info};

use crate::config::{KeyConfig, ProviderConfig};
use crate::core::keys::KeySelector;
use crate::core::providers::ProviderAdapter;
use crate::core::resilience::with_retry;
use crate::core::types::{GatewayRequest, GatewayResponse, ProviderType, StreamChunk};
use crate::utils::error::{GatewayError, Result};

/// Work item handed to a pool worker
pub enum WorkItem {
    /// Unary request with its reply channel
    Unary {
        /// The request
        request: GatewayRequest,
        /// Reply channel
        reply: oneshot::Sender<Result<GatewayResponse>>,
    },
    /// Streaming request; the reply carries the live chunk channel
    Stream {
        /// The request
        request: GatewayRequest,
        /// Reply channel delivering the chunk receiver
        reply: oneshot::Sender<Result<mpsc::Receiver<Result<StreamChunk>>>>,
    },
}

/// One provider's queue and workers
pub struct ProviderPool {
    provider: ProviderType,
    sender: parking_lot::Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ProviderPool {
    /// Spawn `concurrency` workers over a queue of `buffer_size` slots
    pub fn new(
        provider: ProviderType,
        config: &ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
        selector: Arc<KeySelector>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<WorkItem>(config.buffer_size);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(config.concurrency);
        for worker_id in 0..config.concurrency {
            let receiver = receiver.clone();
            let adapter = adapter.clone();
            let selector = selector.clone();
            let retry = config.retry.clone();
            let provider = provider.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(item) = item else {
                        debug!(%provider, worker_id, "queue closed, worker exiting");
                        break;
                    };
                    Self::handle(item, &adapter, &selector, &retry).await;
                }
            }));
        }

        info!(
            %provider,
            concurrency = config.concurrency,
            buffer_size = config.buffer_size,
            "provider pool started"
        );
        Self {
            provider,
            sender: parking_lot::Mutex::new(Some(sender)),
            workers: parking_lot::Mutex::new(workers),
        }
    }

    /// The enqueue side of the pool's queue; `None` once shut down
    pub fn sender(&self) -> Option<mpsc::Sender<WorkItem>> {
        self.sender.lock().clone()
    }

    /// Handle one item; handler errors go to the reply channel, never
    /// terminate the worker.
    async fn handle(
        item: WorkItem,
        adapter: &Arc<dyn ProviderAdapter>,
        selector: &Arc<KeySelector>,
        retry: &crate::config::RetryConfig,
    ) {
        match item {
            WorkItem::Unary { request, reply } => {
                let result = Self::run_unary(&request, adapter, selector, retry).await;
                if reply.send(result).is_err() {
                    debug!("unary caller went away before reply");
                }
            }
            WorkItem::Stream { request, reply } => {
                let result = Self::run_stream(&request, adapter, selector, retry).await;
                if reply.send(result).is_err() {
                    debug!("stream caller went away before handoff");
                }
            }
        }
    }

    fn select_key(request: &GatewayRequest, selector: &Arc<KeySelector>) -> Result<KeyConfig> {
        selector.select(&request.model)
    }

    async fn run_unary(
        request: &GatewayRequest,
        adapter: &Arc<dyn ProviderAdapter>,
        selector: &Arc<KeySelector>,
        retry: &crate::config::RetryConfig,
    ) -> Result<GatewayResponse> {
        if request.context.cancel_token().is_cancelled() {
            return Err(GatewayError::RequestCancelled);
        }
        let key = Self::select_key(request, selector)?;
        with_retry(retry, request.context.cancel_token(), || {
            adapter.execute(request, &key)
        })
        .await
    }

    /// Establish the stream, then hand the pump off to its own task so
    /// the worker slot frees as soon as the channel is delivered.
    async fn run_stream(
        request: &GatewayRequest,
        adapter: &Arc<dyn ProviderAdapter>,
        selector: &Arc<KeySelector>,
        retry: &crate::config::RetryConfig,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        use futures_util::StreamExt;

        if request.context.cancel_token().is_cancelled() {
            return Err(GatewayError::RequestCancelled);
        }
        let key = Self::select_key(request, selector)?;
        let mut upstream = with_retry(retry, request.context.cancel_token(), || {
            adapter.execute_stream(request, &key)
        })
        .await?;

        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(64);
        let cancel = request.context.cancel_token().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx.send(Err(GatewayError::RequestCancelled)).await;
                        break;
                    }
                    next = upstream.next() => {
                        match next {
                            Some(chunk) => {
                                if tx.send(chunk).await.is_err() {
                                    break; // caller dropped the stream
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    /// Close the queue and join every worker after it drains
    pub async fn shutdown(&self) {
        // Dropping the sender closes the queue; workers finish in-flight
        // items, drain what is already queued, then exit
        self.sender.lock().take();
        let handles: Vec<_> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(provider = %self.provider, "worker panicked during drain: {e}");
            }
        }
    }
}
