use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use crate::backend::RegisterTransport;
use crate::error::TransportError;
use crate::registers::BAUD_RATE;
use crate::rtu::{
    FC_READ_HOLDING, Function, build_request, parse_response, read_exact_with_deadline,
    remaining_len,
};

/// Byte link under the RTU master.
pub trait SerialLink: Read + Write {
    /// Drops whatever the device has sent that nobody read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Modbus RTU master framing over a byte link.
///
/// Fallback for adapters the `modbus-rtu` master does not drive well.
pub struct RtuTransport<L> {
    link: L,
    timeout: Duration,
}

impl RtuTransport<Box<dyn SerialPort>> {
    /// Opens `path` with the drive's fixed 19200 8N1 settings.
    pub fn open(path: &str, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|err| TransportError::Io(err.into()))?;
        Ok(Self::new(port, timeout))
    }
}

impl<L: SerialLink> RtuTransport<L> {
    pub fn new(link: L, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    fn write_request(&mut self, request: &[u8]) -> Result<(), TransportError> {
        self.link.write_all(request)?;
        self.link.flush()?;
        Ok(())
    }

    fn read_response(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let mut frame = read_exact_with_deadline(&mut self.link, 2, deadline, self.timeout)?;
        let byte_count = if frame[1] == FC_READ_HOLDING {
            let count = read_exact_with_deadline(&mut self.link, 1, deadline, self.timeout)?;
            frame.extend_from_slice(&count);
            Some(count[0])
        } else {
            None
        };
        let tail = read_exact_with_deadline(
            &mut self.link,
            remaining_len(frame[1], byte_count),
            deadline,
            self.timeout,
        )?;
        frame.extend_from_slice(&tail);
        Ok(frame)
    }
}

impl<L: SerialLink + Send> RegisterTransport for RtuTransport<L> {
    fn exchange(
        &mut self,
        slave: u8,
        function: Function,
        address: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let request = build_request(slave, function, address)?;
        // a reply that missed an earlier deadline must not answer this request
        self.link.clear_input()?;
        let deadline = Instant::now() + self.timeout;
        trace!(?request, "rtu request");
        self.write_request(&request)?;
        let result = self
            .read_response(deadline)
            .and_then(|response| {
                trace!(?response, "rtu response");
                parse_response(&response, slave, function, address)
            });
        if let Err(TransportError::Timeout(_) | TransportError::Framing(_)) = &result
            && let Err(err) = self.link.clear_input()
        {
            debug!(error = %err, "clearing serial input failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{RtuTransport, SerialLink};
    use crate::backend::RegisterTransport;
    use crate::error::TransportError;
    use crate::rtu::{FC_READ_HOLDING, FC_WRITE_SINGLE, Function, append_crc};

    /// Link that answers each request with the next scripted reply, after
    /// that reply's delay, and records what was written.
    struct ScriptedLink {
        replies: VecDeque<(Duration, Vec<u8>)>,
        in_flight: VecDeque<(Instant, Vec<u8>)>,
        received: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedLink {
        fn new(replies: Vec<(Duration, Vec<u8>)>) -> Self {
            Self {
                replies: replies.into(),
                in_flight: VecDeque::new(),
                received: VecDeque::new(),
                written: Vec::new(),
            }
        }

        fn answering(response: Vec<u8>) -> Self {
            Self::new(vec![(Duration::ZERO, response)])
        }

        fn deliver_arrived(&mut self) {
            let now = Instant::now();
            while self.in_flight.front().is_some_and(|(at, _)| *at <= now) {
                if let Some((_, bytes)) = self.in_flight.pop_front() {
                    self.received.extend(bytes);
                }
            }
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.deliver_arrived();
            if self.received.is_empty() {
                thread::sleep(Duration::from_millis(1));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.received.len());
            for (slot, byte) in buf.iter_mut().zip(self.received.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if let Some((delay, reply)) = self.replies.pop_front() {
                self.in_flight.push_back((Instant::now() + delay, reply));
            }
            Ok(())
        }
    }

    impl SerialLink for ScriptedLink {
        fn clear_input(&mut self) -> io::Result<()> {
            self.deliver_arrived();
            self.received.clear();
            Ok(())
        }
    }

    #[test]
    fn reads_identity_block() {
        let response = append_crc(&[0x01, FC_READ_HOLDING, 0x04, 0x01, 0xFE, 0x00, 0x66]);
        let mut transport =
            RtuTransport::new(ScriptedLink::answering(response), Duration::from_millis(50));
        let values = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 2 }, 0x0D00)
            .expect("exchange should succeed");
        assert_eq!(values, vec![510, 102]);
        assert_eq!(&transport.link.written[..6], &[0x01, 0x03, 0x0D, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn write_returns_echoed_value() {
        let response = append_crc(&[0x01, FC_WRITE_SINGLE, 0x25, 0x01, 0x00, 0x01]);
        let mut transport =
            RtuTransport::new(ScriptedLink::answering(response), Duration::from_millis(50));
        let values = transport
            .exchange(1, Function::WriteSingleRegister { value: 1 }, 0x2501)
            .expect("exchange should succeed");
        assert_eq!(values, vec![1]);
    }

    #[test]
    fn silent_device_times_out() {
        let mut transport =
            RtuTransport::new(ScriptedLink::new(Vec::new()), Duration::from_millis(20));
        let err = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect_err("exchange should time out");
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn truncated_response_times_out() {
        let response = vec![0x01, FC_READ_HOLDING, 0x02, 0x00];
        let mut transport =
            RtuTransport::new(ScriptedLink::answering(response), Duration::from_millis(20));
        let err = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect_err("exchange should time out");
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn corrupted_response_is_framing_error() {
        let mut response = append_crc(&[0x01, FC_READ_HOLDING, 0x02, 0x00, 0x05]);
        response[4] = 0x06;
        let mut transport =
            RtuTransport::new(ScriptedLink::answering(response), Duration::from_millis(50));
        let err = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect_err("crc should fail");
        assert!(matches!(err, TransportError::Framing(_)));
    }

    #[test]
    fn late_reply_does_not_answer_the_next_request() {
        let late_flags = append_crc(&[0x01, FC_READ_HOLDING, 0x02, 0x00, 0x05]);
        let stop_echo = append_crc(&[0x01, FC_WRITE_SINGLE, 0x25, 0x01, 0x00, 0x00]);
        let flags = append_crc(&[0x01, FC_READ_HOLDING, 0x02, 0x00, 0x01]);
        let link = ScriptedLink::new(vec![
            (Duration::from_millis(40), late_flags),
            (Duration::ZERO, stop_echo),
            (Duration::ZERO, flags),
        ]);
        let mut transport = RtuTransport::new(link, Duration::from_millis(20));

        let err = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect_err("first reply misses the deadline");
        assert!(matches!(err, TransportError::Timeout(_)));

        // the late frame lands in the buffer before the next request
        thread::sleep(Duration::from_millis(60));

        let echoed = transport
            .exchange(1, Function::WriteSingleRegister { value: 0 }, 0x2501)
            .expect("stop should be answered by its own echo");
        assert_eq!(echoed, vec![0]);
        let values = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect("polling recovers");
        assert_eq!(values, vec![1]);
    }

    #[test]
    fn leftover_bytes_after_a_bad_frame_are_dropped() {
        let mut garbled = append_crc(&[0x01, FC_READ_HOLDING, 0x02, 0x00, 0x05]);
        garbled[4] = 0x06;
        garbled.extend_from_slice(&[0xAA, 0xBB]);
        let flags = append_crc(&[0x01, FC_READ_HOLDING, 0x02, 0x00, 0x01]);
        let link = ScriptedLink::new(vec![(Duration::ZERO, garbled), (Duration::ZERO, flags)]);
        let mut transport = RtuTransport::new(link, Duration::from_millis(50));

        let err = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect_err("crc should fail");
        assert!(matches!(err, TransportError::Framing(_)));
        assert!(transport.link.received.is_empty());
        let values = transport
            .exchange(1, Function::ReadHoldingRegisters { quantity: 1 }, 0x2520)
            .expect("next exchange reads a clean frame");
        assert_eq!(values, vec![1]);
    }
}
