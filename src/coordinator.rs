//! Periodic full-fleet refresh producing [`ZoneSnapshot`]s.
//!
//! One cycle: list zones, fetch every listed zone, publish the assembled snapshot.
//! Cycles never overlap. The published snapshot is swapped as a whole `Arc`, so a
//! reader holds either the previous or the new state, never a mix.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::client::{ConnectivityError, TouchlineClient};
use crate::models::touchline::{Zone, ZoneDescriptor, ZoneId, ZoneSnapshot};

/// What the coordinator needs from a device.
pub trait ZoneSource: Send + Sync + 'static {
    fn list_zones(&self) -> Result<Vec<ZoneDescriptor>, ConnectivityError>;
    fn get_zone_data(&self, zone: ZoneId) -> Option<Zone>;
    /// Release any held connection resources.
    fn shutdown(&self) {}
}

impl ZoneSource for TouchlineClient {
    fn list_zones(&self) -> Result<Vec<ZoneDescriptor>, ConnectivityError> {
        TouchlineClient::list_zones(self)
    }

    fn get_zone_data(&self, zone: ZoneId) -> Option<Zone> {
        TouchlineClient::get_zone_data(self, zone)
    }

    fn shutdown(&self) {
        TouchlineClient::shutdown(self);
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("error communicating with Roth Touchline: {0}")]
    Connectivity(#[from] ConnectivityError),
}

type SnapshotListener = Box<dyn Fn(&Arc<ZoneSnapshot>) + Send + Sync>;
type FailureListener = Box<dyn Fn(&RefreshError) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<S> {
    source: S,
    interval: Duration,
    snapshot: RwLock<Arc<ZoneSnapshot>>,
    snapshot_listeners: Mutex<Vec<SnapshotListener>>,
    failure_listeners: Mutex<Vec<FailureListener>>,
    last_update_success: AtomicBool,
    consecutive_failures: AtomicU32,
    // held for the duration of a cycle
    cycle: Mutex<()>,
}

impl<S: ZoneSource> Shared<S> {
    fn refresh(&self) -> Result<Arc<ZoneSnapshot>, RefreshError> {
        let _cycle = lock(&self.cycle);
        match self.fetch() {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
                self.last_update_success.store(true, Ordering::SeqCst);
                self.consecutive_failures.store(0, Ordering::SeqCst);
                debug!("Updated temperature data for {} zone(s)", snapshot.len());
                for listener in lock(&self.snapshot_listeners).iter() {
                    listener(&snapshot);
                }
                Ok(snapshot)
            }
            Err(e) => {
                self.last_update_success.store(false, Ordering::SeqCst);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!("Refresh failed ({} consecutive): {}", failures, e);
                for listener in lock(&self.failure_listeners).iter() {
                    listener(&e);
                }
                Err(e)
            }
        }
    }

    fn fetch(&self) -> Result<ZoneSnapshot, RefreshError> {
        let descriptors = self.source.list_zones()?;

        // per-zone fetches run concurrently; the scope joins all of them before assembly
        let zones: Vec<Zone> = thread::scope(|scope| {
            let handles: Vec<_> = descriptors
                .iter()
                .map(|d| (d.id, scope.spawn(move || self.source.get_zone_data(d.id))))
                .collect();
            handles
                .into_iter()
                .filter_map(|(id, handle)| match handle.join() {
                    Ok(zone) => zone,
                    Err(_) => {
                        error!("Fetch for zone {} panicked", id);
                        None
                    }
                })
                .collect()
        });

        if zones.len() < descriptors.len() {
            warn!(
                "{} of {} zone(s) could not be fetched and are omitted from this refresh",
                descriptors.len() - zones.len(),
                descriptors.len()
            );
        }
        Ok(ZoneSnapshot::new(Utc::now(), zones))
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Coordinator<S: ZoneSource> {
    shared: Arc<Shared<S>>,
    worker: Mutex<Option<Worker>>,
    shut_down: AtomicBool,
}

impl<S: ZoneSource> Coordinator<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Coordinator {
            shared: Arc::new(Shared {
                source,
                interval,
                snapshot: RwLock::new(Arc::new(ZoneSnapshot::default())),
                snapshot_listeners: Mutex::new(Vec::new()),
                failure_listeners: Mutex::new(Vec::new()),
                last_update_success: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                cycle: Mutex::new(()),
            }),
            worker: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// Most recently published snapshot; empty until the first successful refresh.
    pub fn current_snapshot(&self) -> Arc<ZoneSnapshot> {
        Arc::clone(&self.shared.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Called with every newly published snapshot. Listeners must not register further listeners.
    pub fn on_snapshot_updated(&self, listener: impl Fn(&Arc<ZoneSnapshot>) + Send + Sync + 'static) {
        lock(&self.shared.snapshot_listeners).push(Box::new(listener));
    }

    /// Called whenever a cycle fails; the previous snapshot stays published.
    pub fn on_update_failed(&self, listener: impl Fn(&RefreshError) + Send + Sync + 'static) {
        lock(&self.shared.failure_listeners).push(Box::new(listener));
    }

    pub fn last_update_success(&self) -> bool {
        self.shared.last_update_success.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Run one cycle now. Waits for a cycle already in progress.
    pub fn refresh(&self) -> Result<Arc<ZoneSnapshot>, RefreshError> {
        self.shared.refresh()
    }

    /// Initial cycle before the periodic worker starts.
    pub fn first_refresh(&self) -> Result<Arc<ZoneSnapshot>, RefreshError> {
        let snapshot = self.refresh()?;
        info!("Initial refresh found {} zone(s)", snapshot.len());
        Ok(snapshot)
    }

    /// Spawn the periodic worker. The first scheduled cycle runs one interval from now.
    ///
    /// Returns `false` if the worker is already running or the coordinator was shut down.
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        if worker.is_some() || self.shut_down.load(Ordering::SeqCst) {
            return false;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("touchline-refresh".to_string())
            .spawn(move || run_worker(shared, stop_rx));
        match spawned {
            Ok(handle) => {
                info!("Refresh worker started (interval={}s)", self.shared.interval.as_secs());
                *worker = Some(Worker { stop: stop_tx, handle });
                true
            }
            Err(e) => {
                error!("Failed to spawn refresh worker: {}", e);
                false
            }
        }
    }

    /// Stop the worker, wait for it, then release the source's session. Idempotent.
    pub fn shutdown(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            // the receiver may already be gone if the worker exited
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                error!("Refresh worker panicked");
            }
            info!("Refresh worker stopped");
        }
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            self.shared.source.shutdown();
        }
    }
}

impl<S: ZoneSource> Drop for Coordinator<S> {
    fn drop(&mut self) {
        // never leave a detached worker polling a device nobody observes
        if let Some(worker) = lock(&self.worker).take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
        }
    }
}

fn run_worker<S: ZoneSource>(shared: Arc<Shared<S>>, stop: mpsc::Receiver<()>) {
    let mut tick_start = Instant::now();
    loop {
        // Maintain steady cadence
        let wait = shared.interval.saturating_sub(tick_start.elapsed());
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        tick_start = Instant::now();
        // failures are reported to listeners inside refresh
        let _ = shared.refresh();
    }
}
