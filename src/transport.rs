//! Byte-oriented transport abstraction.
//!
//! The transport is the only component that touches the OS serial API. Both
//! protocol engines are generic over [`Transport`] so they can be driven from
//! an in-memory fake in tests without a real port.

use std::io::Read as _;
use std::time::Duration;

use crate::error::{Error, Result};

/// A full-duplex byte channel with a mandatory read timeout.
///
/// Implementations must treat any OS-reported I/O error as fatal to the
/// current operation; callers are responsible for closing and reopening
/// after such an error (see the engine poisoning rules in SPEC_FULL §5/§7).
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`. A timeout with
    /// zero bytes read is not an error — it returns `Ok(0)`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write the entire buffer. Must fully write or fail.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Discard any buffered input.
    fn flush(&mut self) -> Result<()>;

    /// Release the underlying port. Idempotent: closing an already-closed
    /// transport is not an error. Required after any poisoning error before
    /// the transport can be reopened (SPEC_FULL §5/§7).
    fn close(&mut self) -> Result<()>;

    /// Read exactly `buf.len()` bytes, retrying internally until the timeout
    /// elapses. Short reads accumulate; a read that returns fewer bytes than
    /// requested is not itself an error as long as more arrive before the
    /// deadline.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(buf.len() - filled));
            }
            let n = self.read(&mut buf[filled..], remaining)?;
            if n == 0 && std::time::Instant::now() >= deadline {
                return Err(Error::Timeout(buf.len() - filled));
            }
            filled += n;
        }
        Ok(())
    }
}

/// Real serial port transport, backed by the `serialport` crate.
///
/// `port` becomes `None` once [`Transport::close`] runs; every other method
/// then fails with `Error::Io(NotConnected)` instead of panicking, since a
/// poisoned engine's transport is expected to be closed and discarded, not
/// reused.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate` with the 8N1 settings Sahara and
    /// Streaming DLOAD both expect.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        Ok(Self { port: Some(port) })
    }

    fn port_mut(&mut self) -> Result<&mut dyn serialport::SerialPort> {
        self.port
            .as_deref_mut()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "transport closed")))
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        use std::io::Write;
        self.port_mut()?.write_all(buf).map_err(Error::Io)
    }

    fn flush(&mut self) -> Result<()> {
        self.port_mut()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(Error::Serial)
    }

    fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }
}

/// In-memory duplex transport double for tests.
///
/// Bytes pushed onto `inbound` are returned by [`Transport::read`] in the
/// order they were queued; bytes passed to [`Transport::write`] are appended
/// to `outbound` so a test can assert on exactly what the engine sent.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    inbound: std::collections::VecDeque<u8>,
    pub outbound: Vec<u8>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be returned by future reads, simulating a device
    /// response arriving on the wire.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Number of bytes still queued to be read.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }
}

impl Transport for ChannelTransport {
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if self.inbound.is_empty() {
            return Ok(0);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.outbound.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inbound.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_transport_read_after_write() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[1, 2, 3, 4]);
        t.write(&[0xAA]).unwrap();
        assert_eq!(t.outbound, vec![0xAA]);

        let mut buf = [0u8; 2];
        let n = t.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(t.pending(), 2);
    }

    #[test]
    fn channel_transport_read_exact_times_out_when_starved() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[1]);
        let mut buf = [0u8; 4];
        let err = t.read_exact(&mut buf, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn channel_transport_read_exact_succeeds_when_available() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        t.read_exact(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn channel_transport_flush_discards_pending_input() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[1, 2, 3]);
        t.flush().unwrap();
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn channel_transport_close_is_idempotent() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[1, 2, 3]);
        t.close().unwrap();
        t.close().unwrap();
        assert_eq!(t.pending(), 0);
    }
}
