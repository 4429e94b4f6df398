//! Post-signature sealing
//!
//! Activation schedules a seal after a short delay; the seal renders the
//! locked document and attaches it to the contract. A pending seal is
//! cancelled when the contract leaves the sealable statuses first.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};

use leasehold_types::ContractId;

use crate::lifecycle::ContractLifecycle;

pub trait SealScheduler: Send + Sync {
    fn schedule(&self, contract_id: ContractId, delay: Duration);

    fn cancel(&self, contract_id: &ContractId);
}

/// Sleeps on the tokio runtime, then hands the id to the seal worker
pub struct TokioSealScheduler {
    tx: mpsc::UnboundedSender<ContractId>,
    pending: Arc<DashMap<ContractId, AbortHandle>>,
}

impl TokioSealScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ContractId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: Arc::new(DashMap::new()),
            },
            rx,
        )
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl SealScheduler for TokioSealScheduler {
    fn schedule(&self, contract_id: ContractId, delay: Duration) {
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);
        let id = contract_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove(&id);
            if tx.send(id).is_err() {
                debug!("Seal worker gone, dropping seal");
            }
        });

        if let Some(previous) = self.pending.insert(contract_id, task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel(&self, contract_id: &ContractId) {
        if let Some((_, handle)) = self.pending.remove(contract_id) {
            handle.abort();
            info!(contract_id = %contract_id, "Pending seal cancelled");
        }
    }
}

/// Records calls without running anything; tests call `seal` directly
#[derive(Debug, Default)]
pub struct ManualSealScheduler {
    scheduled: Mutex<Vec<(ContractId, Duration)>>,
    cancelled: Mutex<Vec<ContractId>>,
}

impl ManualSealScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(ContractId, Duration)> {
        self.scheduled.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<ContractId> {
        self.cancelled.lock().clone()
    }
}

impl SealScheduler for ManualSealScheduler {
    fn schedule(&self, contract_id: ContractId, delay: Duration) {
        self.scheduled.lock().push((contract_id, delay));
    }

    fn cancel(&self, contract_id: &ContractId) {
        self.cancelled.lock().push(contract_id.clone());
    }
}

/// Seal every contract id received on `rx`
pub fn spawn_seal_worker(
    mut rx: mpsc::UnboundedReceiver<ContractId>,
    lifecycle: Arc<ContractLifecycle>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Seal worker started");
        while let Some(contract_id) = rx.recv().await {
            match lifecycle.seal(&contract_id).await {
                Ok(Some(document)) => {
                    info!(contract_id = %contract_id, storage_ref = %document.storage_ref, "Contract sealed")
                }
                Ok(None) => debug!(contract_id = %contract_id, "Nothing to seal"),
                Err(e) => error!(contract_id = %contract_id, error = %e, "Sealing failed"),
            }
        }
        info!("Seal worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_seal_fires_after_delay() {
        let (scheduler, mut rx) = TokioSealScheduler::new();
        let id = ContractId::new();
        scheduler.schedule(id.clone(), Duration::from_secs(300));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(id));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_seal_never_fires() {
        let (scheduler, mut rx) = TokioSealScheduler::new();
        let id = ContractId::new();
        scheduler.schedule(id.clone(), Duration::from_secs(300));
        scheduler.cancel(&id);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending(), 0);
    }
}
