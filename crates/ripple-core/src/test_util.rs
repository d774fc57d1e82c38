//! In-memory transport double for registry and broadcast tests.

use crate::connection::{ConnectionSink, SinkError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A [`ConnectionSink`] that records sent messages and can be told to fail.
pub struct MockSink {
    sent: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    open: AtomicBool,
}

impl MockSink {
    /// A healthy sink that records every message.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            open: AtomicBool::new(true),
        })
    }

    /// A sink whose writes always fail, simulating a broken transport.
    pub fn failing() -> Arc<Self> {
        let sink = Self::shared();
        sink.fail_writes.store(true, Ordering::SeqCst);
        sink
    }

    /// Messages sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl ConnectionSink for MockSink {
    async fn send_text(&self, text: &str) -> Result<(), SinkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::SendFailed("simulated write failure".into()));
        }
        self.sent
            .lock()
            .expect("mock lock poisoned")
            .push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
