//! In-memory socket used by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::socket::{SendFlags, SocketError, SocketHandle};

#[derive(Default)]
pub struct MockSocket {
    pub window: AtomicUsize,
    pub acks: Mutex<Vec<usize>>,
    pub sent: Mutex<Vec<(Vec<u8>, SendFlags)>>,
    pub flushes: AtomicUsize,
    pub detached: AtomicBool,
    pub closes: AtomicUsize,
}

impl MockSocket {
    pub fn with_window(window: usize) -> Arc<Self> {
        let socket = Self::default();
        socket.window.store(window, Ordering::SeqCst);
        Arc::new(socket)
    }

    pub fn acks(&self) -> Vec<usize> {
        self.acks.lock().unwrap().clone()
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(b, _)| b.iter().copied())
            .collect()
    }
}

impl SocketHandle for MockSocket {
    fn send(&self, data: &[u8], flags: SendFlags) -> Result<(), SocketError> {
        let window = self.window.load(Ordering::SeqCst);
        if data.len() > window {
            return Err(SocketError::WindowExceeded {
                len: data.len(),
                window,
            });
        }
        self.window.fetch_sub(data.len(), Ordering::SeqCst);
        self.sent.lock().unwrap().push((data.to_vec(), flags));
        Ok(())
    }

    fn flush(&self) -> Result<(), SocketError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn available_send_window(&self) -> usize {
        self.window.load(Ordering::SeqCst)
    }

    fn acknowledge_received(&self, len: usize) {
        self.acks.lock().unwrap().push(len);
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}
