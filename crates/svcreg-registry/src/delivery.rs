//! Patch delivery.
//!
//! Every dependent, keyed by its update URL, owns a FIFO mailbox drained by
//! a single worker task. Patches for one dependent therefore arrive in the
//! order they were planned, while a slow or unreachable dependent only
//! delays its own mailbox. A shared semaphore bounds the number of POSTs in
//! flight, and each POST runs under the configured timeout.
//!
//! Delivery is best effort: failures are logged and reported to whoever
//! holds the [`PendingDelivery`], never retried.

use crate::config::DeliveryConfig;
use crate::fanout::PlannedDelivery;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use svcreg_common::{Error, Patch, Result};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Sends one patch to one update endpoint.
#[async_trait]
pub trait PatchSender: Send + Sync {
    async fn send_patch(&self, update_url: &str, patch: &Patch) -> Result<()>;
}

struct Delivery {
    patch: Patch,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
struct Mailbox {
    tx: mpsc::UnboundedSender<Delivery>,
    /// Enqueued but not yet completed deliveries.
    pending: Arc<AtomicUsize>,
    /// Set once the dependent left while deliveries were still queued.
    orphaned: Arc<AtomicBool>,
}

type Mailboxes = DashMap<String, Mailbox>;

/// Routes planned patches into per-dependent mailboxes.
pub struct Dispatcher {
    sender: Arc<dyn PatchSender>,
    mailboxes: Arc<Mailboxes>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher. Mailbox workers are spawned lazily, so the
    /// first `enqueue` must happen inside a tokio runtime.
    pub fn new(sender: Arc<dyn PatchSender>, config: &DeliveryConfig) -> Self {
        Self {
            sender,
            mailboxes: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            timeout: config.timeout,
        }
    }

    /// Queues `patch` for `update_url` and returns a handle to its outcome.
    ///
    /// Never blocks, so it is safe to call while holding the store lock.
    pub fn enqueue(&self, update_url: &str, patch: Patch) -> PendingDelivery {
        let (done, outcome) = oneshot::channel();
        let delivery = Delivery { patch, done };

        if let Err(mpsc::error::SendError(delivery)) = self.mailbox(update_url).tx.send(delivery) {
            // Worker is gone; start over with a fresh mailbox.
            self.mailboxes.remove(update_url);
            if let Err(mpsc::error::SendError(delivery)) =
                self.mailbox(update_url).tx.send(delivery)
            {
                let _ = delivery
                    .done
                    .send(Err(Error::Internal(format!("mailbox for {} closed", update_url))));
            }
        }

        PendingDelivery {
            update_url: update_url.to_string(),
            outcome,
        }
    }

    /// Queues every planned delivery and returns the round handle.
    pub fn dispatch(&self, planned: Vec<PlannedDelivery>) -> FanoutRound {
        let deliveries = planned
            .into_iter()
            .map(|delivery| self.enqueue(&delivery.update_url, delivery.patch))
            .collect();
        FanoutRound { deliveries }
    }

    /// Drops the mailbox for `update_url` once nothing is queued for it.
    ///
    /// Returns true if the mailbox was dropped right away. A busy mailbox is
    /// marked orphaned instead and its worker drops it after the last queued
    /// delivery. Enqueueing for the URL again before that cancels the mark,
    /// so a later registration on the same URL keeps the delivery order.
    pub fn retire(&self, update_url: &str) -> bool {
        match self.mailboxes.entry(update_url.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().pending.load(Ordering::SeqCst) == 0 {
                    entry.remove();
                    debug!(update_url, "Retired delivery mailbox");
                    true
                } else {
                    entry.get().orphaned.store(true, Ordering::SeqCst);
                    debug!(update_url, "Delivery mailbox busy, retiring once drained");
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Number of open mailboxes.
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    // The pending counter is bumped under the map entry guard, so neither
    // `retire` nor the worker can drop a mailbox between lookup and send.
    fn mailbox(&self, update_url: &str) -> Mailbox {
        let entry = self
            .mailboxes
            .entry(update_url.to_string())
            .or_insert_with(|| self.open_mailbox(update_url));
        entry.pending.fetch_add(1, Ordering::SeqCst);
        entry.orphaned.store(false, Ordering::SeqCst);
        entry.value().clone()
    }

    fn open_mailbox(&self, update_url: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_mailbox(
            update_url.to_string(),
            rx,
            Arc::downgrade(&self.mailboxes),
            Arc::clone(&self.sender),
            Arc::clone(&self.permits),
            Arc::clone(&pending),
            self.timeout,
        ));
        debug!(update_url, "Opened delivery mailbox");

        Mailbox {
            tx,
            pending,
            orphaned: Arc::new(AtomicBool::new(false)),
        }
    }
}

async fn run_mailbox(
    update_url: String,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mailboxes: Weak<Mailboxes>,
    sender: Arc<dyn PatchSender>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    limit: Duration,
) {
    while let Some(delivery) = rx.recv().await {
        let result = match permits.acquire().await {
            Ok(_permit) => match timeout(limit, sender.send_patch(&update_url, &delivery.patch)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(&update_url, limit)),
            },
            Err(e) => Err(Error::Internal(format!("delivery semaphore closed: {}", e))),
        };

        match &result {
            Ok(()) => debug!(
                update_url = %update_url,
                added = delivery.patch.added.len(),
                removed = delivery.patch.removed.len(),
                "Patch delivered"
            ),
            Err(e) => warn!(update_url = %update_url, error = %e, "Patch delivery failed"),
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            drop_if_orphaned(&mailboxes, &update_url, &pending);
        }
        let _ = delivery.done.send(result);
    }
    debug!(update_url = %update_url, "Delivery mailbox drained");
}

// Removing the map entry drops the last sender, which ends the worker loop.
fn drop_if_orphaned(mailboxes: &Weak<Mailboxes>, update_url: &str, pending: &Arc<AtomicUsize>) {
    let Some(mailboxes) = mailboxes.upgrade() else {
        return;
    };
    let dropped = mailboxes
        .remove_if(update_url, |_, mailbox| {
            Arc::ptr_eq(&mailbox.pending, pending)
                && mailbox.pending.load(Ordering::SeqCst) == 0
                && mailbox.orphaned.load(Ordering::SeqCst)
        })
        .is_some();
    if dropped {
        debug!(update_url, "Retired orphaned delivery mailbox");
    }
}

/// Outcome handle for one queued patch.
#[derive(Debug)]
pub struct PendingDelivery {
    update_url: String,
    outcome: oneshot::Receiver<Result<()>>,
}

impl PendingDelivery {
    pub fn update_url(&self) -> &str {
        &self.update_url
    }

    /// Waits until the patch was delivered or failed.
    pub async fn wait(self) -> Result<()> {
        self.outcome.await.unwrap_or_else(|_| {
            Err(Error::Internal(format!(
                "delivery to {} was dropped",
                self.update_url
            )))
        })
    }
}

/// All deliveries triggered by one store mutation or `notify` call.
///
/// Deliveries run whether or not the round is awaited; holding the round
/// only makes their completion observable.
#[derive(Debug)]
#[must_use = "drop the round explicitly if completion is not needed"]
pub struct FanoutRound {
    deliveries: Vec<PendingDelivery>,
}

impl FanoutRound {
    pub fn empty() -> Self {
        Self {
            deliveries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Update URLs this round addresses, in planning order.
    pub fn targets(&self) -> Vec<&str> {
        self.deliveries.iter().map(PendingDelivery::update_url).collect()
    }

    /// Waits for every delivery of the round.
    pub async fn join(self) -> FanoutReport {
        let mut report = FanoutReport::default();
        for delivery in self.deliveries {
            match delivery.wait().await {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}

/// Counts from a joined [`FanoutRound`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}
