//! Background polling of the latest reading
//!
//! A tokio task queries the inverter on a fixed interval and publishes each
//! decoded [`DataPoint`] through a watch channel. Readers always see a
//! complete snapshot; the newest one wins.

use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::protocol::{CloseHandle, DataPoint, Dispatcher, ProtocolError, Transport};

/// One published reading
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Decoded telemetry
    pub reading: DataPoint,
    /// The response carried a bad checksum
    pub suspect: bool,
    /// When the response arrived
    pub polled_at: DateTime<Local>,
}

/// Read side of the latest-value slot
#[derive(Debug, Clone)]
pub struct LatestReading {
    rx: watch::Receiver<Option<Snapshot>>,
}

impl LatestReading {
    /// Most recent snapshot, if any poll has succeeded yet
    pub fn get(&self) -> Option<Snapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns false once the poller is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Handle to a running poller
pub struct PollerHandle {
    task: JoinHandle<()>,
    close: CloseHandle,
    latest: LatestReading,
}

impl PollerHandle {
    /// Another reader of the latest-value slot
    pub fn latest(&self) -> LatestReading {
        self.latest.clone()
    }

    /// Whether the polling task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and close the link
    ///
    /// A query already on the wire ends with `Closed` at its next read.
    pub fn shutdown(self) {
        self.close.close();
        self.task.abort();
    }
}

/// Start polling `dispatcher` every `interval`
///
/// Must be called from within a tokio runtime.
pub fn spawn_poller<T>(dispatcher: Dispatcher<T>, interval: Duration) -> PollerHandle
where
    T: Transport + 'static,
{
    let (tx, rx) = watch::channel(None);
    let close = dispatcher.close_handle();
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let shared = Arc::clone(&dispatcher);
            let result = tokio::task::spawn_blocking(move || match shared.lock() {
                Ok(mut dispatcher) => dispatcher.read_data_point(),
                Err(_) => Err(ProtocolError::Closed),
            })
            .await;

            match result {
                Ok(Ok(reading)) => {
                    debug!("polled {:?}", reading.value);
                    let snapshot = Snapshot {
                        reading: reading.value,
                        suspect: reading.suspect,
                        polled_at: Local::now(),
                    };
                    if tx.send(Some(snapshot)).is_err() {
                        debug!("no readers left, stopping poller");
                        break;
                    }
                }
                Ok(Err(ProtocolError::Closed)) => break,
                Ok(Err(e @ ProtocolError::MalformedFrameLength { .. })) => {
                    warn!("{}, publishing a zero reading", e);
                    let now = Local::now();
                    let snapshot = Snapshot {
                        reading: DataPoint::zero(now),
                        suspect: true,
                        polled_at: now,
                    };
                    if tx.send(Some(snapshot)).is_err() {
                        break;
                    }
                }
                Ok(Err(e)) if e.is_recoverable() => {
                    warn!("poll failed, keeping previous reading: {}", e);
                }
                Ok(Err(e)) => {
                    error!("poll failed: {}", e);
                    break;
                }
                Err(e) => {
                    error!("poll task failed: {}", e);
                    break;
                }
            }
        }
    });

    PollerHandle {
        task,
        close,
        latest: LatestReading { rx },
    }
}
