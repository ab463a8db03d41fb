use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::{log_data, Worker};
use crate::Error;

type Reader = Box<dyn Read + Send>;

/// Pulls from a blocking reader, one read at a time, on a worker thread.
///
/// Each [`read()`][Self::read] reads at most `min(max, chunk_size)` bytes and
/// reports the result through a callback. An empty chunk means end of body.
pub struct ReadPump {
    reader: Arc<Mutex<Option<Reader>>>,
    worker: Worker,
    chunk_size: usize,
    in_flight: Arc<AtomicBool>,
}

impl ReadPump {
    pub(crate) fn new(reader: Reader, worker: Worker, chunk_size: usize) -> Self {
        ReadPump {
            reader: Arc::new(Mutex::new(Some(reader))),
            worker,
            chunk_size: chunk_size.max(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Issue one read. `done` runs on the worker thread.
    pub fn read<F>(&self, max: usize, done: F) -> Result<(), Error>
    where
        F: FnOnce(io::Result<Vec<u8>>) + Send + 'static,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::ReadInFlight);
        }

        let reader = self.reader.clone();
        let in_flight = self.in_flight.clone();
        let size = max.min(self.chunk_size).max(1);

        let accepted = self.worker.submit(move || {
            let result = {
                let mut lock = reader.lock();
                match lock.as_mut() {
                    Some(r) => read_chunk(r, size),
                    None => Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "body reader closed",
                    )),
                }
            };
            in_flight.store(false, Ordering::Release);
            done(result)
        });

        if !accepted {
            self.in_flight.store(false, Ordering::Release);
            return Err(Error::WorkerGone);
        }

        Ok(())
    }

    /// Drop the underlying reader. Later reads fail.
    pub fn close(&self) {
        // A read in progress holds the lock; we then close after it.
        self.reader.lock().take();
    }
}

fn read_chunk(r: &mut Reader, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; size];
    loop {
        match r.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                log_data(&buf);
                return Ok(buf);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl fmt::Debug for ReadPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadPump")
            .field("chunk_size", &self.chunk_size)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pump(data: &[u8], chunk: usize) -> ReadPump {
        let worker = Worker::spawn("test-pump").unwrap();
        ReadPump::new(Box::new(Cursor::new(data.to_vec())), worker, chunk)
    }

    fn read_sync(p: &ReadPump, max: usize) -> io::Result<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        p.read(max, move |r| {
            tx.send(r).ok();
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn reads_in_chunks_until_eof() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let p = pump(&data, 4096);

        let mut got = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let chunk = read_sync(&p, 65536).unwrap();
            if chunk.is_empty() {
                break;
            }
            sizes.push(chunk.len());
            got.extend(chunk);
        }

        assert_eq!(got, data);
        assert!(sizes.iter().all(|s| *s <= 4096));
    }

    #[test]
    fn max_caps_chunk() {
        let p = pump(b"hello world", 4096);
        assert_eq!(read_sync(&p, 5).unwrap(), b"hello");
    }

    #[test]
    fn read_after_close_fails() {
        let p = pump(b"hello", 4096);
        p.close();
        let err = read_sync(&p, 5).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
