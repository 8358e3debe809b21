//! Connectivity monitor
//!
//! Combines two signals: whether the device has a network at all (a
//! [`TransportSignal`]) and whether the backend answers a health check (a
//! [`HealthProbe`]). The client is online only when both hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::observer::{Listeners, Subscription};

/// Backend reachability check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the backend answered.
    async fn probe(&self) -> bool;
}

/// Platform network signal. `true` means the device has a network.
pub trait TransportSignal: Send + Sync {
    fn watch(&self) -> watch::Receiver<bool>;
}

/// A transport signal driven by explicit online/offline events.
#[derive(Debug, Clone)]
pub struct ManualTransport {
    sender: Arc<watch::Sender<bool>>,
}

impl ManualTransport {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.sender.send_replace(online);
    }
}

impl Default for ManualTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TransportSignal for ManualTransport {
    fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub device_online: bool,
    pub backend_reachable: bool,
}

impl ConnectivityState {
    pub const fn online(self) -> bool {
        self.device_online && self.backend_reachable
    }
}

/// Health poll cadence.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    pub online_poll_interval: Duration,
    pub offline_poll_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            online_poll_interval: Duration::from_secs(15),
            offline_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Shared connectivity monitor handle.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    probe: Arc<dyn HealthProbe>,
    transport: Arc<dyn TransportSignal>,
    config: ConnectivityConfig,
    state: Mutex<ConnectivityState>,
    /// Held across a state change and its notification so listeners see
    /// flips in the order they were applied.
    emitting: Mutex<()>,
    listeners: Listeners<bool>,
    reprobe: Notify,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        transport: Arc<dyn TransportSignal>,
        config: ConnectivityConfig,
    ) -> Self {
        let device_online = *transport.watch().borrow();
        Self {
            inner: Arc::new(Inner {
                probe,
                transport,
                config,
                state: Mutex::new(ConnectivityState {
                    device_online,
                    backend_reachable: false,
                }),
                emitting: Mutex::new(()),
                listeners: Listeners::new(),
                reprobe: Notify::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Monitor with an always-online transport and default cadence.
    pub fn with_probe(probe: Arc<dyn HealthProbe>) -> Self {
        Self::new(
            probe,
            Arc::new(ManualTransport::default()),
            ConnectivityConfig::default(),
        )
    }

    /// Start the transport listener and health polling. The first probe
    /// runs immediately. Calling this again while running does nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut transport = self.inner.transport.watch();
        let device_online = *transport.borrow_and_update();
        if device_online != self.state().device_online {
            self.inner.set_device_online(device_online);
        }

        let inner = Arc::clone(&self.inner);
        let transport_task = tokio::spawn(async move {
            while transport.changed().await.is_ok() {
                let online = *transport.borrow_and_update();
                inner.set_device_online(online);
            }
        });

        let inner = Arc::clone(&self.inner);
        let poll_task = tokio::spawn(async move {
            loop {
                inner.probe_once().await;
                let interval = inner.poll_interval();
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = inner.reprobe.notified() => {}
                }
            }
        });

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([transport_task, poll_task]);
        tracing::debug!("Connectivity monitor started");
    }

    /// Stop listening and polling. Safe to call repeatedly.
    pub fn stop(&self) {
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        if self.inner.started.swap(false, Ordering::SeqCst) {
            tracing::debug!("Connectivity monitor stopped");
        }
    }

    /// Probe the backend now and return whether the client is online.
    pub async fn refresh(&self) -> bool {
        self.inner.probe_once().await;
        self.is_online()
    }

    pub fn state(&self) -> ConnectivityState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.state().online()
    }

    /// Push a device network change directly, bypassing the transport.
    pub fn set_device_online(&self, online: bool) {
        self.inner.set_device_online(online);
    }

    /// `callback(online)` runs only when `online` flips.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.inner
            .listeners
            .subscribe(move |online: &bool| callback(*online))
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn probe_once(&self) {
        let reachable = self.probe.probe().await;
        tracing::trace!(reachable, "Health probe finished");
        self.update(|state| state.backend_reachable = reachable);
    }

    fn set_device_online(&self, online: bool) {
        self.update(|state| {
            state.device_online = online;
            if !online {
                state.backend_reachable = false;
            }
        });
        if online {
            self.reprobe.notify_one();
        }
    }

    fn poll_interval(&self) -> Duration {
        let device_online = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .device_online;
        if device_online {
            self.config.online_poll_interval
        } else {
            self.config.offline_poll_interval
        }
    }

    /// Listeners must not change connectivity from inside their callback.
    fn update(&self, apply: impl FnOnce(&mut ConnectivityState)) {
        let _emitting = self.emitting.lock().unwrap_or_else(PoisonError::into_inner);
        let (before, after) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = state.online();
            apply(&mut state);
            (before, state.online())
        };
        if before != after {
            tracing::info!(online = after, "Connectivity changed");
            self.listeners.emit(&after);
        }
    }
}
