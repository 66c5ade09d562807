//! Backend readiness with single-flight probing.
//!
//! The backend may be asleep (cold start) when the app launches. Before the
//! first real call we probe it, and if the quick probe fails we send a
//! wake-up probe with a long timeout. Callers that arrive while a probe is
//! running attach to the same shared future instead of starting another.
//!
//! State machine: `NOT_READY -> CHECKING -> READY` (sticky), or
//! `CHECKING -> NOT_READY` when both probes fail, so a later call retries.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::NetworkHelper;

/// Probes used to decide whether the backend can serve requests.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn check_connection(&self) -> bool;

    async fn wake_up(&self) -> bool;
}

#[async_trait]
impl BackendProbe for NetworkHelper {
    async fn check_connection(&self) -> bool {
        NetworkHelper::check_connection(self).await
    }

    async fn wake_up(&self) -> bool {
        self.wake_up_backend().await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessState {
    pub ready: bool,
    pub checking: bool,
}

type ProbeFuture = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
struct Inner {
    ready: bool,
    in_flight: Option<ProbeFuture>,
}

pub struct BackendReadiness {
    probe: Arc<dyn BackendProbe>,
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl BackendReadiness {
    pub fn new(probe: Arc<dyn BackendProbe>) -> Self {
        Self {
            probe,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn state(&self) -> ReadinessState {
        let inner = lock(&self.inner);
        ReadinessState {
            ready: inner.ready,
            checking: inner.in_flight.is_some(),
        }
    }

    /// Whether the backend can be used. Returns immediately once a probe has
    /// succeeded; otherwise runs (or joins) the probe sequence.
    pub async fn ensure_ready(&self) -> bool {
        let probe = {
            let mut inner = lock(&self.inner);
            if inner.ready {
                return true;
            }
            match inner.in_flight.clone() {
                Some(in_flight) => {
                    debug!("Joining in-flight readiness probe");
                    in_flight
                }
                None => {
                    let started =
                        Self::probe_sequence(Arc::clone(&self.probe), Arc::clone(&self.inner))
                            .boxed()
                            .shared();
                    inner.in_flight = Some(started.clone());
                    started
                }
            }
        };
        probe.await
    }

    async fn probe_sequence(probe: Arc<dyn BackendProbe>, inner: Arc<Mutex<Inner>>) -> bool {
        debug!("Checking backend connection");
        let ready = if probe.check_connection().await {
            true
        } else {
            info!("Backend unreachable, attempting wake-up");
            probe.wake_up().await
        };

        if !ready {
            warn!("Backend not ready; will probe again on next request");
        }

        let mut inner = lock(&inner);
        inner.ready = ready;
        inner.in_flight = None;
        ready
    }
}
