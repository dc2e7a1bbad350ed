//! Scriptable in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::traits::{ConnectError, Connection, Frame, Transport};

#[derive(Default)]
struct Inner {
    senders: Vec<Option<mpsc::UnboundedSender<Frame>>>,
    fail_next: usize,
    tokens: Vec<Option<String>>,
    closed: Vec<u16>,
}

#[derive(Default)]
struct MockState {
    inner: Mutex<Inner>,
    opened: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

#[derive(Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn fail_next(&self, count: usize) {
        self.state.inner.lock().fail_next = count;
    }

    /// Feed for the `index`th successful connection.
    pub fn sender(&self, index: usize) -> mpsc::UnboundedSender<Frame> {
        self.state.inner.lock().senders[index]
            .clone()
            .expect("connection already dropped")
    }

    /// Simulates a network drop on the `index`th successful connection.
    pub fn drop_connection(&self, index: usize) {
        self.state.inner.lock().senders[index] = None;
    }

    pub fn connections(&self) -> usize {
        self.state.inner.lock().senders.len()
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.inner.lock().tokens.last().cloned().flatten()
    }

    pub fn closed_with(&self) -> Vec<u16> {
        self.state.inner.lock().closed.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        _endpoint: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.state.inner.lock();
        inner.tokens.push(token.map(str::to_string));
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(ConnectError::new("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.senders.push(Some(tx));
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            rx,
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<Frame>,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn next_frame(&mut self) -> Option<anyhow::Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.state.inner.lock().closed.push(code);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lets spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
