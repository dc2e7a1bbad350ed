use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use surveyor_types::ConsoleEvent;

/// Broadcast of every event, plus an unbounded lane that carries only
/// control events (see [`ConsoleEvent::is_control`]). Broadcast receivers can
/// lag and skip; control receivers never drop an event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
    control: Arc<Mutex<Vec<mpsc::UnboundedSender<ConsoleEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self {
            tx,
            control: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }

    /// Sees control events published after this call, in publish order.
    pub fn subscribe_control(&self) -> mpsc::UnboundedReceiver<ConsoleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.control.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ConsoleEvent) {
        tracing::trace!(kind = event.kind(), "bus publish");
        if event.is_control() {
            self.control
                .lock()
                .retain(|tx| tx.send(event.clone()).is_ok());
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains whatever is currently buffered on a receiver without waiting.
pub fn drain_ready(rx: &mut broadcast::Receiver<ConsoleEvent>) -> Vec<ConsoleEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
