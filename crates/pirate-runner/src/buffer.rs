//! Mutex-guarded byte buffer shared between a subprocess reader and the
//! log flusher.

use std::sync::{Arc, Mutex};

/// An unbounded append/drain byte buffer. Cloning yields another handle
/// to the same storage; every operation serializes through one mutex, so
/// a reader observes either the full prefix written before a reset or
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct SafeBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SafeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data`, returning the number of bytes written (always all
    /// of them; the buffer grows as needed).
    pub fn write(&self, data: &[u8]) -> usize {
        let mut buf = self.inner.lock().expect("buffer lock poisoned");
        buf.extend_from_slice(data);
        data.len()
    }

    /// Drains up to `out.len()` bytes from the front of the buffer into
    /// `out`, returning how many were copied.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut buf = self.inner.lock().expect("buffer lock poisoned");
        let n = out.len().min(buf.len());
        out[..n].copy_from_slice(&buf[..n]);
        buf.drain(..n);
        n
    }

    /// The buffered bytes as a string, without consuming them. Invalid
    /// UTF-8 is replaced.
    pub fn snapshot(&self) -> String {
        let buf = self.inner.lock().expect("buffer lock poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Atomically snapshots and clears the buffer under a single lock
    /// acquisition, so no concurrent write can land between the two.
    pub fn take(&self) -> String {
        let mut buf = self.inner.lock().expect("buffer lock poisoned");
        let s = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        s
    }

    pub fn reset(&self) {
        self.inner.lock().expect("buffer lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn writes_append_in_order() {
        let buf = SafeBuffer::new();
        assert_eq!(buf.write(b"hello "), 6);
        assert_eq!(buf.write(b"world"), 5);
        assert_eq!(buf.snapshot(), "hello world");
    }

    #[test]
    fn reset_empties_the_buffer() {
        let buf = SafeBuffer::new();
        buf.write(b"some output");
        buf.reset();
        assert_eq!(buf.snapshot(), "");
        assert!(buf.is_empty());
    }

    #[test]
    fn read_drains_from_the_front() {
        let buf = SafeBuffer::new();
        buf.write(b"abcdef");

        let mut out = [0u8; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(buf.snapshot(), "ef");

        let mut rest = [0u8; 8];
        assert_eq!(buf.read(&mut rest), 2);
        assert_eq!(&rest[..2], b"ef");
        assert!(buf.is_empty());
    }

    #[test]
    fn take_snapshots_and_clears_atomically() {
        let buf = SafeBuffer::new();
        buf.write(b"line one\n");
        assert_eq!(buf.take(), "line one\n");
        assert_eq!(buf.take(), "");
    }

    #[test]
    fn concurrent_writers_never_lose_bytes() {
        const WRITERS: usize = 8;
        const WRITES_PER_WRITER: usize = 1000;

        let buf = SafeBuffer::new();
        let handles: Vec<_> = (0..WRITERS)
            .map(|k| {
                let buf = buf.clone();
                thread::spawn(move || {
                    let chunk = [b'a' + k as u8; 16];
                    for _ in 0..WRITES_PER_WRITER {
                        buf.write(&chunk);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer panicked");
        }

        assert_eq!(buf.len(), WRITERS * WRITES_PER_WRITER * 16);
    }
}
