//! Captures tracing output so tests can assert on emitted diagnostics.

use std::io::{Result as IoResult, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Level;
use tracing::subscriber::with_default;
use tracing_subscriber::fmt;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

fn capture_at<F, R>(level: Level, action: F) -> (Vec<String>, R)
where
    F: FnOnce() -> R,
{
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_max_level(level)
        .without_time()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = with_default(subscriber, action);
    (buffer.lines(), result)
}

/// Runs `action` and returns the `WARN`-and-above lines it logged.
pub fn capture_warn_logs<F, R>(action: F) -> (Vec<String>, R)
where
    F: FnOnce() -> R,
{
    capture_at(Level::WARN, action)
}

/// Runs `action` and returns the `INFO`-and-above lines it logged, span
/// fields included.
pub fn capture_info_logs<F, R>(action: F) -> (Vec<String>, R)
where
    F: FnOnce() -> R,
{
    capture_at(Level::INFO, action)
}
