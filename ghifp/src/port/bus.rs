//! Block-oriented bus capabilities and the bus-request flow-control line.

use {
    parking_lot::{Condvar, Mutex},
    std::{io, sync::Arc, time::Duration},
};

/// Driver for a bus-addressed synchronous link (I2C style).
///
/// Each call is one complete bus transfer to the target at `address`.
pub trait AddressedBus: Send {
    /// Read exactly `buf.len()` bytes from the target.
    fn read(&mut self, address: u16, frequency: u32, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` to the target.
    fn write(&mut self, address: u16, frequency: u32, data: &[u8]) -> io::Result<()>;
}

/// Driver for a clocked shift-register link (SPI style).
///
/// Buffer lengths are always a whole number of words at the configured word
/// size.
pub trait ClockedBus: Send {
    /// Set the bits per transfer word.
    fn set_word_size(&mut self, bits: u8) -> io::Result<()>;

    /// Set the clock frequency in Hz.
    fn set_frequency(&mut self, frequency: u32) -> io::Result<()>;

    /// Clock `data` out, discarding what comes in.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Clock idle bytes out and capture `buf.len()` bytes in.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: AddressedBus + ?Sized> AddressedBus for Box<T> {
    fn read(&mut self, address: u16, frequency: u32, buf: &mut [u8]) -> io::Result<()> {
        (**self).read(address, frequency, buf)
    }

    fn write(&mut self, address: u16, frequency: u32, data: &[u8]) -> io::Result<()> {
        (**self).write(address, frequency, data)
    }
}

impl<T: ClockedBus + ?Sized> ClockedBus for Box<T> {
    fn set_word_size(&mut self, bits: u8) -> io::Result<()> {
        (**self).set_word_size(bits)
    }

    fn set_frequency(&mut self, frequency: u32) -> io::Result<()> {
        (**self).set_frequency(frequency)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read(buf)
    }
}

/// Counting signal raised by the peripheral's bus-request line.
///
/// The platform's interrupt handler calls [`signal`](Self::signal) on every
/// edge; the receive thread consumes one edge per block it reads. Clones share
/// the same counter.
#[derive(Debug, Clone, Default)]
pub struct BusRequestLine {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl BusRequestLine {
    /// Create a line with no pending edges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one edge and wake a waiter.
    pub fn signal(&self) {
        let (pending, ready) = &*self.inner;
        *pending.lock() += 1;
        ready.notify_one();
    }

    /// Consume one edge, waiting up to `timeout` for it.
    ///
    /// Returns `false` if no edge arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (pending, ready) = &*self.inner;
        let mut count = pending.lock();
        if *count == 0 {
            // Spurious wakeups just end the wait early; callers loop.
            let _ = ready.wait_for(&mut count, timeout);
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Drop all pending edges.
    pub fn clear(&self) {
        *self
            .inner
            .0
            .lock() = 0;
    }

    /// Edges recorded but not yet consumed.
    pub fn pending(&self) -> usize {
        *self
            .inner
            .0
            .lock()
    }
}
