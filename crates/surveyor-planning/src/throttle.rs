//! Leading/trailing-edge throttle.
//!
//! The first call in a quiet period fires immediately. Calls that arrive
//! while the period is running are collapsed into one trailing call that
//! fires with the latest value when the period ends. `cancel` drops the
//! trailing call so nothing fires afterwards.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Inner<T> {
    last_fired: Option<Instant>,
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
}

pub struct Throttle<T> {
    period: Duration,
    inner: Arc<Mutex<Inner<T>>>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            inner: self.inner.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<T: Send + 'static> Throttle<T> {
    pub fn new(period: Duration, handler: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            period,
            inner: Arc::new(Mutex::new(Inner {
                last_fired: None,
                pending: None,
                timer: None,
            })),
            handler: Arc::new(handler),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn call(&self, value: T) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let quiet = inner
            .last_fired
            .map_or(true, |at| now.duration_since(at) >= self.period);
        if quiet && inner.timer.is_none() {
            inner.last_fired = Some(now);
            drop(inner);
            (self.handler)(value);
            return;
        }

        inner.pending = Some(value);
        if inner.timer.is_some() {
            return;
        }
        let deadline = inner.last_fired.map_or(now, |at| at + self.period);
        let state = self.inner.clone();
        let handler = self.handler.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let value = {
                let mut inner = state.lock();
                inner.timer = None;
                let value = inner.pending.take();
                if value.is_some() {
                    inner.last_fired = Some(Instant::now());
                }
                value
            };
            if let Some(value) = value {
                handler(value);
            }
        }));
    }

    /// Drops any trailing call and resets the period.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.pending = None;
        inner.last_fired = None;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }
}
