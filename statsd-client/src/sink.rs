use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{Mutex, PoisonError},
};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

/// Best-effort delivery of ready-to-send frames.
///
/// Implementations deliver each frame on a fire-and-forget basis: `send` never blocks
/// indefinitely, never panics, and never reports failure to the caller. A frame that cannot be
/// delivered is simply gone, which is the deal the wire protocol offers. This contract is what
/// keeps metric reporting from ever breaking or stalling the host application, so custom sinks
/// must absorb their own failures the same way.
pub trait MetricSink {
    /// Attempts to deliver one frame.
    fn send(&self, frame: &[u8]);
}

#[derive(Debug)]
enum SocketState {
    // Intermediate state during send attempts.
    Inconsistent,

    // No socket yet, or the previous send failed and tore it down.
    Disconnected,

    // Socket is created, connected, and ready to send.
    Ready(UdpSocket),
}

/// A [`MetricSink`] that sends each frame as one UDP datagram.
///
/// The socket is created lazily on the first send and reused afterwards. It is bound to an
/// ephemeral local port, connected to the remote address, and switched to non-blocking mode, so
/// a send never waits on the network. When socket creation or a send fails, the error is logged
/// at debug level and the socket is torn down, letting the next send start from a fresh connect.
/// An unreachable collector therefore costs one failed system call per frame and nothing more.
#[derive(Debug)]
pub struct UdpSink {
    addrs: Vec<SocketAddr>,
    state: Mutex<SocketState>,
}

impl UdpSink {
    /// Creates a `UdpSink` sending to the given remote address(es).
    ///
    /// When multiple addresses are given, the first one the socket can connect to is used.
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs, state: Mutex::new(SocketState::Disconnected) }
    }

    fn connect(&self) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(&self.addrs[..])?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

impl MetricSink for UdpSink {
    fn send(&self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let old_state = std::mem::replace(&mut *state, SocketState::Inconsistent);
            match old_state {
                SocketState::Inconsistent => {
                    unreachable!("transitioned _from_ inconsistent state")
                }
                SocketState::Disconnected => match self.connect() {
                    Ok(socket) => *state = SocketState::Ready(socket),
                    Err(e) => {
                        *state = SocketState::Disconnected;
                        debug!(error = %e, "Failed to create UDP socket; dropping frame.");
                        return;
                    }
                },
                SocketState::Ready(socket) => {
                    match socket.send(frame) {
                        Ok(_) => *state = SocketState::Ready(socket),
                        Err(e) => {
                            *state = SocketState::Disconnected;
                            debug!(error = %e, "Failed to send frame.");
                        }
                    }
                    return;
                }
            }
        }
    }
}

/// A [`MetricSink`] that discards every frame.
///
/// Useful for disabling emission entirely without touching call sites.
#[derive(Clone, Debug)]
pub struct NopSink;

impl MetricSink for NopSink {
    fn send(&self, _frame: &[u8]) {}
}

/// A [`MetricSink`] that captures every frame into a channel.
///
/// Intended for tests and debugging: build a client around the sink half and assert on the
/// frames arriving at the receiver half.
#[derive(Clone, Debug)]
pub struct SpySink {
    frames: Sender<Vec<u8>>,
}

impl SpySink {
    /// Creates a `SpySink` along with the receiving side of its capture channel.
    ///
    /// Every frame accepted by the sink is pushed into the channel as its own `Vec<u8>`, in
    /// delivery order.
    pub fn new() -> (Receiver<Vec<u8>>, SpySink) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (rx, SpySink { frames: tx })
    }
}

impl MetricSink for SpySink {
    fn send(&self, frame: &[u8]) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.frames.send(frame.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, UdpSocket},
        time::Duration,
    };

    use super::{MetricSink, NopSink, SpySink, UdpSink};

    #[test]
    fn spy_sink_captures_frames_in_order() {
        let (rx, sink) = SpySink::new();
        sink.send(b"test-inc:1|c");
        sink.send(b"test-tim:3|ms");

        assert_eq!(rx.try_recv().unwrap(), b"test-inc:1|c".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"test-tim:3|ms".to_vec());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn nop_sink_accepts_anything() {
        let sink = NopSink;
        sink.send(b"test-inc:1|c");
        sink.send(b"");
    }

    #[test]
    fn udp_sink_delivers_datagrams() {
        let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = receiver.local_addr().unwrap();

        let sink = UdpSink::new(vec![addr]);
        sink.send(b"test-inc:1|c");

        let mut buf = [0u8; 1024];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"test-inc:1|c");
    }

    #[test]
    fn udp_sink_swallows_connect_failures() {
        // No address to connect to: the frame is silently dropped.
        let sink = UdpSink::new(Vec::new());
        sink.send(b"test-inc:1|c");
        sink.send(b"test-inc:2|c");
    }
}
