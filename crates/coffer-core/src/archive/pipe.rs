//! In-memory byte pipe between two threads.
//!
//! Bounded in chunks: `write` blocks while `capacity` chunks are queued, and
//! `read` blocks until a chunk arrives. Dropping the writer is EOF for the
//! reader; dropping the reader makes further writes fail with `BrokenPipe`.

use std::io::{self, Read, Write};

use crossbeam_channel::{Receiver, Sender, bounded};

/// Create a connected writer/reader pair holding at most `capacity` chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                // writer dropped
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn preserves_byte_order_across_threads() {
        let (mut w, mut r) = pipe(2);
        let producer = thread::spawn(move || {
            for i in 0..1000u32 {
                w.write_all(&i.to_be_bytes()).unwrap();
            }
        });

        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        producer.join().unwrap();

        let expected: Vec<u8> = (0..1000u32).flat_map(u32::to_be_bytes).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn small_reads_drain_large_chunks() {
        let (mut w, mut r) = pipe(1);
        w.write_all(b"abcdef").unwrap();
        drop(w);

        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(r.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_after_reader_dropped_is_broken_pipe() {
        let (mut w, r) = pipe(1);
        drop(r);
        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn writer_blocks_when_full() {
        let (mut w, mut r) = pipe(1);
        w.write_all(b"first").unwrap();

        let producer = thread::spawn(move || {
            // blocks until the reader takes "first"
            w.write_all(b"second").unwrap();
        });
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!producer.is_finished());

        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, b"firstsecond");
    }
}
