//! Background detection poller.
//!
//! Calls the detector on its own interval, decoupled from the render tick, and
//! republishes the latest batch through a watch channel. The loop awaits each
//! call before the next interval tick is taken, so calls never overlap.

use greeter_core::DetectionBatch;
use greeter_io::Detector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Read side of the poller: the most recent batch and detector readiness.
#[derive(Clone)]
pub struct DetectionFeed {
    pub(crate) latest: watch::Receiver<Arc<DetectionBatch>>,
    pub(crate) ready: Arc<AtomicBool>,
}

impl DetectionFeed {
    /// Most recent completed batch (empty until the first one arrives).
    pub fn latest(&self) -> Arc<DetectionBatch> {
        self.latest.borrow().clone()
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Start polling `detector` every `interval`. The task stops once every
/// [`DetectionFeed`] clone has been dropped.
pub fn spawn_poller<D>(mut detector: D, interval: Duration) -> DetectionFeed
where
    D: Detector + 'static,
{
    let (tx, latest) = watch::channel(Arc::new(DetectionBatch::default()));
    let ready = Arc::new(AtomicBool::new(false));
    let ready_flag = ready.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failing = false;
        let mut was_ready = false;

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }

            let is_ready = detector.ready();
            ready_flag.store(is_ready, Ordering::SeqCst);
            if !is_ready {
                // A detector that drops out must not leave its last faces current.
                if was_ready {
                    tracing::warn!("detector no longer ready; treating as nobody present");
                    tx.send_replace(Arc::new(DetectionBatch::default()));
                    was_ready = false;
                }
                continue;
            }
            was_ready = true;

            let batch = match detector.detect().await {
                Ok(batch) => {
                    if failing {
                        tracing::info!("detector recovered");
                        failing = false;
                    }
                    tracing::trace!(count = batch.detections.len(), "detection batch");
                    batch
                }
                Err(e) => {
                    if failing {
                        tracing::debug!(error = %e, "detection failed");
                    } else {
                        tracing::warn!(error = %e, "detection failed; treating as nobody present");
                        failing = true;
                    }
                    DetectionBatch::default()
                }
            };
            tx.send_replace(Arc::new(batch));
        }
        tracing::debug!("detection poller stopped");
    });

    DetectionFeed { latest, ready }
}
