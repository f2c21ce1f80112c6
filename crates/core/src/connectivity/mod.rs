//! Connectivity monitor: the single source of truth for reachability
//!
//! Effective online = network reachable AND service reachable. The service
//! input defaults to reachable, so the platform network signal alone is
//! enough; a liveness probe can additionally veto.

pub mod ports;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use offsync_domain::ConnectivityState;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};

/// Callback invoked once per connectivity transition.
///
/// Listeners run synchronously on the task that reported the change and
/// must not call back into the monitor's setters.
pub type ConnectivityListener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Inputs {
    network: bool,
    service: bool,
    state: ConnectivityState,
}

pub struct ConnectivityMonitor {
    clock: Arc<dyn Clock>,
    inputs: Mutex<Inputs>,
    listeners: Mutex<Vec<(ListenerId, ConnectivityListener)>>,
    subscribers: Mutex<Vec<UnboundedSender<ConnectivityState>>>,
    /// Held across each transition and its delivery so edges arrive in order.
    delivery: Mutex<()>,
    next_listener_id: AtomicU64,
}

impl ConnectivityMonitor {
    pub fn new(network_reachable: bool) -> Self {
        Self::with_clock(network_reachable, Arc::new(SystemClock))
    }

    pub fn with_clock(network_reachable: bool, clock: Arc<dyn Clock>) -> Self {
        let state = ConnectivityState { online: network_reachable, changed_at: clock.now() };
        Self {
            clock,
            inputs: Mutex::new(Inputs { network: network_reachable, service: true, state }),
            listeners: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inputs.lock().state.online
    }

    pub fn state(&self) -> ConnectivityState {
        self.inputs.lock().state
    }

    /// Raw platform signal, ignoring the liveness probe.
    pub fn is_network_reachable(&self) -> bool {
        self.inputs.lock().network
    }

    /// Platform reachability signal. Returns whether the effective state changed.
    pub fn set_network_reachable(&self, reachable: bool) -> bool {
        self.update(|inputs| inputs.network = reachable)
    }

    /// Liveness probe result. Returns whether the effective state changed.
    pub fn set_service_reachable(&self, reachable: bool) -> bool {
        self.update(|inputs| inputs.service = reachable)
    }

    /// Register a listener for every subsequent transition.
    pub fn on_change(&self, listener: impl Fn(ConnectivityState) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Every subsequent transition as a channel. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<ConnectivityState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn update(&self, apply: impl FnOnce(&mut Inputs)) -> bool {
        let _delivery = self.delivery.lock();

        let state = {
            let mut inputs = self.inputs.lock();
            apply(&mut inputs);
            let online = inputs.network && inputs.service;
            if online == inputs.state.online {
                return false;
            }
            inputs.state = ConnectivityState { online, changed_at: self.clock.now() };
            inputs.state
        };

        info!(state = state.label(), "Connectivity changed");
        self.deliver(state);
        true
    }

    fn deliver(&self, state: ConnectivityState) {
        let listeners: Vec<ConnectivityListener> =
            self.listeners.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();
        for listener in listeners {
            listener(state);
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(state).is_ok());
        debug!(subscribers = subscribers.len(), "Delivered connectivity change");
    }
}
