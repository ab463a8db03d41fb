use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::Error;

/// Bounded byte FIFO between one producer and one consumer.
///
/// Never holds more than `capacity` bytes. Writers block while the buffer is
/// full, readers block while it is empty and not yet closed.
pub struct BackpressureBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    not_full: Condvar,
    not_empty: Condvar,
}

struct BufferState {
    data: VecDeque<u8>,
    closed: bool,
    aborted: bool,
    high_water: usize,
}

impl BackpressureBuffer {
    /// Create a buffer. A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        BackpressureBuffer {
            capacity,
            state: Mutex::new(BufferState {
                data: VecDeque::with_capacity(capacity),
                closed: false,
                aborted: false,
                high_water: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Max number of buffered bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write all of `data`, blocking while the buffer is full.
    ///
    /// Chunks larger than the capacity go in as several partial writes.
    pub fn write_all(&self, mut data: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock();

        while !data.is_empty() {
            if state.aborted {
                return Err(Error::BodyAborted);
            }
            if state.closed {
                return Err(Error::BodyContentAfterFinish);
            }

            let space = self.capacity - state.data.len();
            if space == 0 {
                self.not_full.wait(&mut state);
                continue;
            }

            let n = space.min(data.len());
            state.data.extend(&data[..n]);
            state.high_water = state.high_water.max(state.data.len());
            data = &data[n..];

            self.not_empty.notify_one();
        }

        Ok(())
    }

    /// Read into `buf`, blocking until at least one byte is available.
    ///
    /// `Ok(0)` means the producer closed and everything was read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();

        loop {
            if state.aborted {
                return Err(Error::BodyAborted);
            }

            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                for (to, from) in buf.iter_mut().zip(state.data.drain(..n)) {
                    *to = from;
                }
                self.not_full.notify_one();
                return Ok(n);
            }

            if state.closed {
                return Ok(0);
            }

            self.not_empty.wait(&mut state);
        }
    }

    /// No more writes. Buffered bytes can still be read.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Abort both sides. Buffered bytes are discarded and blocked calls fail.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.aborted {
            return;
        }
        state.aborted = true;
        state.data.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Tell if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of bytes ever buffered at once.
    pub fn high_water(&self) -> usize {
        self.state.lock().high_water
    }

    /// Tell if [`cancel()`][Self::cancel] was called.
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
