//! Packet transport between the two nodes.
//!
//! The link only needs to send a frame to the peer, to have a callback run
//! for each inbound frame together with a signal-quality sample, and to
//! read the current signal quality. The callback runs on the transport's
//! own thread.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::PeerAddress;
use crate::error::RadioError;

pub const MAX_FRAME_LEN: usize = 250;
pub const DEFAULT_SIGNAL_QUALITY: i8 = -50;

pub type ReceiveCallback = Arc<dyn Fn(&[u8], i8) + Send + Sync>;

pub trait Radio: Send + Sync {
    fn send(&self, peer: &PeerAddress, frame: &[u8]) -> Result<(), RadioError>;
    fn set_receive_callback(&self, callback: ReceiveCallback);
    fn clear_receive_callback(&self);
    fn signal_quality(&self) -> i8;
}

#[derive(Default)]
struct CallbackSlot {
    callback: Mutex<Option<ReceiveCallback>>,
}

impl CallbackSlot {
    fn set(&self, callback: Option<ReceiveCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn dispatch(&self, frame: &[u8], signal_quality: i8) {
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(callback) = callback {
            callback(frame, signal_quality);
        }
    }
}

/// `level` column of `/proc/net/wireless` for `interface`, in dBm.
pub fn parse_wireless_level(contents: &str, interface: &str) -> Option<i8> {
    contents.lines().find_map(|line| {
        let (name, rest) = line.trim_start().split_once(':')?;
        if name != interface {
            return None;
        }
        // status, link, level, noise, ...
        let level: f32 = rest.split_whitespace().nth(2)?.trim_end_matches('.').parse().ok()?;
        Some(level.clamp(i8::MIN as f32, i8::MAX as f32) as i8)
    })
}

fn read_wireless_level(interface: &str) -> Option<i8> {
    let contents = fs::read_to_string("/proc/net/wireless").ok()?;
    parse_wireless_level(&contents, interface)
}

/// Broadcast datagrams on a UDP port derived from the radio channel.
///
/// Every node on the segment listening on the same channel receives every
/// frame; the peer address is recorded for logging only.
pub struct UdpRadio {
    socket: UdpSocket,
    target: SocketAddr,
    callbacks: Arc<CallbackSlot>,
    signal: Arc<AtomicI8>,
    running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpRadio {
    pub fn open(base_port: u16, channel: u8, interface: &str) -> Result<Self, RadioError> {
        let port = base_port.saturating_add(channel as u16);
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;

        let callbacks = Arc::new(CallbackSlot::default());
        let signal = Arc::new(AtomicI8::new(
            read_wireless_level(interface).unwrap_or(DEFAULT_SIGNAL_QUALITY),
        ));
        let running = Arc::new(AtomicBool::new(true));

        let rx_socket = socket.try_clone()?;
        let rx_thread = {
            let callbacks = Arc::clone(&callbacks);
            let signal = Arc::clone(&signal);
            let running = Arc::clone(&running);
            let interface = interface.to_string();
            thread::Builder::new()
                .name("radio-rx".into())
                .spawn(move || receive_loop(rx_socket, callbacks, signal, running, interface))?
        };

        info!("UDP radio on channel {} (port {})", channel, port);
        Ok(UdpRadio {
            socket,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            callbacks,
            signal,
            running,
            rx_thread: Mutex::new(Some(rx_thread)),
        })
    }
}

fn receive_loop(
    socket: UdpSocket,
    callbacks: Arc<CallbackSlot>,
    signal: Arc<AtomicI8>,
    running: Arc<AtomicBool>,
    interface: String,
) {
    let mut buffer = [0u8; MAX_FRAME_LEN];
    let mut last_probe = Instant::now();

    while running.load(Ordering::Relaxed) {
        if last_probe.elapsed() >= Duration::from_secs(1) {
            if let Some(level) = read_wireless_level(&interface) {
                signal.store(level, Ordering::Relaxed);
            }
            last_probe = Instant::now();
        }

        match socket.recv_from(&mut buffer) {
            Ok((len, from)) => {
                debug!("{} bytes from {}", len, from);
                callbacks.dispatch(&buffer[..len], signal.load(Ordering::Relaxed));
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                error!("Radio receive error: {}", e);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

impl Radio for UdpRadio {
    fn send(&self, peer: &PeerAddress, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameRejected(frame.len()));
        }
        let sent = self.socket.send_to(frame, self.target)?;
        if sent != frame.len() {
            warn!("Short send to {}: {} of {} bytes", peer, sent, frame.len());
        }
        Ok(())
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        self.callbacks.set(Some(callback));
    }

    fn clear_receive_callback(&self) {
        self.callbacks.set(None);
    }

    fn signal_quality(&self) -> i8 {
        self.signal.load(Ordering::Relaxed)
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.rx_thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// In-process radio pair. Frames are delivered synchronously on the
/// sender's thread, which is a different thread from the receiver's tasks.
pub struct LoopbackRadio {
    own: Arc<CallbackSlot>,
    peer: Arc<CallbackSlot>,
    link_up: Arc<AtomicBool>,
    signal: i8,
}

impl LoopbackRadio {
    pub fn pair(signal_quality: i8) -> (LoopbackRadio, LoopbackRadio) {
        let a = Arc::new(CallbackSlot::default());
        let b = Arc::new(CallbackSlot::default());
        let link_up = Arc::new(AtomicBool::new(true));
        (
            LoopbackRadio {
                own: Arc::clone(&a),
                peer: Arc::clone(&b),
                link_up: Arc::clone(&link_up),
                signal: signal_quality,
            },
            LoopbackRadio {
                own: b,
                peer: a,
                link_up,
                signal: signal_quality,
            },
        )
    }

    /// Simulate the peer going out of range: frames are lost and reported
    /// as not delivered.
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Relaxed);
    }

    /// Deliver a raw frame to this radio's callback as if it came from the air.
    pub fn inject(&self, frame: &[u8]) {
        self.own.dispatch(frame, self.signal);
    }
}

impl Radio for LoopbackRadio {
    fn send(&self, _peer: &PeerAddress, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameRejected(frame.len()));
        }
        if !self.link_up.load(Ordering::Relaxed) {
            return Err(RadioError::NotDelivered);
        }
        self.peer.dispatch(frame, self.signal);
        Ok(())
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        self.own.set(Some(callback));
    }

    fn clear_receive_callback(&self) {
        self.own.set(None);
    }

    fn signal_quality(&self) -> i8 {
        self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const PROC_NET_WIRELESS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   70.  -43.  -256        0      0      0      0      0        0
";

    #[test]
    fn test_parse_wireless_level() {
        assert_eq!(parse_wireless_level(PROC_NET_WIRELESS, "wlan0"), Some(-43));
        assert_eq!(parse_wireless_level(PROC_NET_WIRELESS, "wlan1"), None);
        assert_eq!(parse_wireless_level("", "wlan0"), None);
    }

    #[test]
    fn test_loopback_delivers_to_peer_only() {
        let (a, b) = LoopbackRadio::pair(-40);
        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&seen_a);
        a.set_receive_callback(Arc::new(move |_: &[u8], _: i8| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        let frames = Arc::clone(&seen_b);
        b.set_receive_callback(Arc::new(move |frame: &[u8], signal: i8| {
            frames.lock().unwrap().push((frame.to_vec(), signal));
        }));

        a.send(&PeerAddress::BROADCAST, &[1, 2, 3]).unwrap();
        assert_eq!(seen_a.load(Ordering::Relaxed), 0);
        assert_eq!(*seen_b.lock().unwrap(), vec![(vec![1, 2, 3], -40)]);
    }

    #[test]
    fn test_loopback_link_down_and_cleared_callback() {
        let (a, b) = LoopbackRadio::pair(-40);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        b.set_receive_callback(Arc::new(move |_: &[u8], _: i8| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        a.set_link_up(false);
        assert!(matches!(
            a.send(&PeerAddress::BROADCAST, &[0]),
            Err(RadioError::NotDelivered)
        ));
        assert_eq!(seen.load(Ordering::Relaxed), 0);

        a.set_link_up(true);
        a.send(&PeerAddress::BROADCAST, &[0]).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 1);

        b.clear_receive_callback();
        a.send(&PeerAddress::BROADCAST, &[0]).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let (a, _b) = LoopbackRadio::pair(-40);
        let frame = [0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            a.send(&PeerAddress::BROADCAST, &frame),
            Err(RadioError::FrameRejected(251))
        ));
    }
}
