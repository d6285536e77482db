//! Change subscription bridge.
//!
//! Turns a table and the engine's tenant scope into a live stream of
//! [`ChangeEvent`]s. When isolation applies, the change feed receives the
//! server-side filter `<tenant_column>=eq.<tenant>`, so events of other
//! tenants never reach the callback.
//!
//! Each subscription runs its own worker thread, which owns the feed
//! subscription and invokes the callback. Teardown through
//! [`SubscriptionHandle::unsubscribe`] (or dropping the handle) is safe at any
//! point, including from inside the callback.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc as tokio_mpsc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, warn};

use bookbuddy_core::{DataError, DataResult, Table, TenantPolicy};
use bookbuddy_events::{ChangeEnvelope, ChangeEvent, ChangeKind, ServerFilter, Subscription};

use crate::backend::ChangeFeed;
use crate::query::QueryOptions;

const TICK: Duration = Duration::from_millis(100);

/// Opens tenant-scoped change subscriptions on a [`ChangeFeed`].
pub struct SubscriptionBridge<F> {
    feed: F,
    policy: TenantPolicy,
}

impl<F> core::fmt::Debug for SubscriptionBridge<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionBridge")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<F: ChangeFeed> SubscriptionBridge<F> {
    pub fn new(feed: F, policy: TenantPolicy) -> Self {
        Self { feed, policy }
    }

    pub fn policy(&self) -> &TenantPolicy {
        &self.policy
    }

    /// Channel identity: `<table>:<tenant>`, or `<table>:*` when unscoped.
    pub fn channel_name(&self, table: &str, options: &QueryOptions) -> String {
        if self.policy.should_inject(table, options.skip_tenant_filter) {
            format!("{table}:{}", self.policy.tenant())
        } else {
            format!("{table}:*")
        }
    }

    /// The server-side filter applied to a subscription, if any.
    pub fn server_filter(&self, table: &str, options: &QueryOptions) -> Option<ServerFilter> {
        self.policy
            .should_inject(table, options.skip_tenant_filter)
            .then(|| ServerFilter::eq(self.policy.tenant_column(), self.policy.tenant().as_str()))
    }

    /// Deliver `kind` changes on `table` to `callback` until unsubscribed.
    #[instrument(skip_all, fields(table = table.name(), kind = kind.as_str()), err)]
    pub async fn subscribe<C>(
        &self,
        table: impl Table,
        kind: ChangeKind,
        callback: C,
        options: &QueryOptions,
    ) -> DataResult<SubscriptionHandle>
    where
        C: FnMut(ChangeEvent) + Send + 'static,
    {
        let table = table.name();
        if table.trim().is_empty() {
            return Err(DataError::invalid_table("table name is empty"));
        }

        let channel = self.channel_name(table, options);
        let filter = self.server_filter(table, options);
        let subscription = self.feed.listen(&channel, table, filter.as_ref()).await?;

        SubscriptionHandle::spawn(channel, kind, subscription, callback)
    }

    /// Like [`subscribe`](Self::subscribe), delivering into an async stream.
    ///
    /// The stream ends once it is closed or the feed goes away.
    pub async fn subscribe_stream(
        &self,
        table: impl Table,
        kind: ChangeKind,
        options: &QueryOptions,
    ) -> DataResult<ChangeStream> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = self
            .subscribe(
                table,
                kind,
                move |event| {
                    if tx.send(event).is_err() {
                        debug!("change stream receiver dropped");
                    }
                },
                options,
            )
            .await?;

        Ok(ChangeStream {
            inner: UnboundedReceiverStream::new(rx),
            handle,
        })
    }
}

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    // Held for the duration of each callback invocation.
    delivery: Mutex<()>,
    worker: OnceLock<ThreadId>,
}

/// Handle to a live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    shared: Arc<Shared>,
}

impl SubscriptionHandle {
    fn spawn<C>(
        channel: String,
        kind: ChangeKind,
        subscription: Subscription<ChangeEnvelope>,
        callback: C,
    ) -> DataResult<Self>
    where
        C: FnMut(ChangeEvent) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            cancelled: AtomicBool::new(false),
            delivery: Mutex::new(()),
            worker: OnceLock::new(),
        });

        let worker_shared = shared.clone();
        let worker_channel = channel.clone();
        thread::Builder::new()
            .name(format!("subscription-{channel}"))
            .spawn(move || delivery_loop(&worker_channel, kind, subscription, &worker_shared, callback))
            .map_err(|e| DataError::backend(format!("failed to spawn subscription worker: {e}")))?;

        Ok(Self { channel, shared })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `false` once unsubscribed or after the feed closed.
    pub fn is_active(&self) -> bool {
        !self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Stop delivery. Idempotent.
    ///
    /// Once this returns, no callback invocation is running or will start,
    /// except when called from inside the callback itself, where the current
    /// invocation finishes and no further one starts.
    pub fn unsubscribe(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.channel, "unsubscribed");

        if self.shared.worker.get() == Some(&thread::current().id()) {
            return;
        }
        // Wait out an in-flight delivery.
        drop(self.shared.delivery.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn delivery_loop<C>(
    channel: &str,
    kind: ChangeKind,
    subscription: Subscription<ChangeEnvelope>,
    shared: &Shared,
    mut callback: C,
) where
    C: FnMut(ChangeEvent),
{
    let _ = shared.worker.set(thread::current().id());

    loop {
        if shared.cancelled.load(Ordering::SeqCst) {
            break;
        }

        match subscription.recv_timeout(TICK) {
            Ok(envelope) => {
                if !kind.matches(envelope.event()) {
                    continue;
                }
                let _guard = shared.delivery.lock().unwrap_or_else(|e| e.into_inner());
                if shared.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                callback(envelope.into_event());
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!(channel, "change feed closed");
                shared.cancelled.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

/// Async stream of change events for one subscription.
///
/// Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    inner: UnboundedReceiverStream<ChangeEvent>,
    handle: SubscriptionHandle,
}

impl ChangeStream {
    pub fn channel(&self) -> &str {
        self.handle.channel()
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.inner.next().await
    }

    /// Stop delivery; events already queued can still be read.
    pub fn close(&self) {
        self.handle.unsubscribe();
    }
}

impl Stream for ChangeStream {
    type Item = ChangeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
