//! DAW bridge: OSC-shaped datagrams over UDP.
//!
//! Outbound messages are encoded with `rosc` and sent to the configured
//! host/port. A background thread receives datagrams, decodes them, and
//! dispatches to per-address handlers; malformed packets are discarded.
//! `NullBridge` satisfies the same interface for tests and rehearsal runs
//! without a DAW.

use std::collections::HashMap;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use rosc::{OscMessage, OscPacket, OscType};

pub type Handler = Box<dyn FnMut(&[OscType]) + Send>;
pub type OnceHandler = Box<dyn FnOnce(&[OscType]) + Send>;

/// The audio router's view of the DAW. Implementations must be shareable
/// across threads; the router sends from the main loop while handlers fire
/// on the receive thread.
pub trait DawBridge: Send + Sync {
    fn send(&self, addr: &str, args: Vec<OscType>) -> io::Result<()>;

    /// Register a handler for every packet at `addr`. The default drops
    /// the registration (the null bridge never receives).
    fn subscribe(&self, addr: &str, handler: Handler) {
        let _ = (addr, handler);
    }

    /// Register a handler that fires once and removes itself.
    fn subscribe_once(&self, addr: &str, handler: OnceHandler) {
        let _ = (addr, handler);
    }

    /// Stop background work. Dropping the bridge also does this.
    fn stop(&self) {}
}

#[derive(Default)]
struct HandlerTable {
    on: HashMap<String, Vec<Handler>>,
    once: HashMap<String, Vec<OnceHandler>>,
}

/// Live UDP bridge.
pub struct OscBridge {
    socket: UdpSocket,
    target: String,
    handlers: Arc<Mutex<HandlerTable>>,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,
}

fn dispatch_packet(packet: OscPacket, handlers: &Arc<Mutex<HandlerTable>>) {
    match packet {
        OscPacket::Message(msg) => dispatch_message(msg, handlers),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                dispatch_packet(inner, handlers);
            }
        }
    }
}

fn dispatch_message(msg: OscMessage, handlers: &Arc<Mutex<HandlerTable>>) {
    // Persistent handlers run under the lock; once-handlers are taken out
    // first so they may re-register without deadlocking.
    let once = {
        let Ok(mut table) = handlers.lock() else {
            return;
        };
        if let Some(list) = table.on.get_mut(&msg.addr) {
            for handler in list.iter_mut() {
                handler(&msg.args);
            }
        }
        table.once.remove(&msg.addr)
    };
    if let Some(list) = once {
        for handler in list {
            handler(&msg.args);
        }
    }
}

impl OscBridge {
    /// Bind the receive port and start the receive thread. `target` is the
    /// DAW's `host:port`.
    pub fn new(target: &str, recv_port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", recv_port))?;
        let recv_socket = socket.try_clone()?;
        recv_socket.set_read_timeout(Some(Duration::from_millis(50)))?;

        let handlers: Arc<Mutex<HandlerTable>> = Arc::new(Mutex::new(HandlerTable::default()));
        let running = Arc::new(AtomicBool::new(true));

        let thread_handlers = Arc::clone(&handlers);
        let thread_running = Arc::clone(&running);
        let recv_thread = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            while thread_running.load(Ordering::Relaxed) {
                match recv_socket.recv(&mut buf) {
                    Ok(n) => match rosc::decoder::decode_udp(&buf[..n]) {
                        Ok((_, packet)) => dispatch_packet(packet, &thread_handlers),
                        Err(e) => debug!("discarding malformed datagram: {}", e),
                    },
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        warn!("osc receive socket failed: {}", e);
                        break;
                    }
                }
            }
        });

        info!("osc bridge up: sending to {}, listening on {}", target, recv_port);

        Ok(Self {
            socket,
            target: target.to_string(),
            handlers,
            running,
            recv_thread: Some(recv_thread),
        })
    }
}

impl Drop for OscBridge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
    }
}

impl DawBridge for OscBridge {
    fn send(&self, addr: &str, args: Vec<OscType>) -> io::Result<()> {
        let msg = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let buf = rosc::encoder::encode(&msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&buf, &self.target)?;
        Ok(())
    }

    fn subscribe(&self, addr: &str, handler: Handler) {
        if let Ok(mut table) = self.handlers.lock() {
            table.on.entry(addr.to_string()).or_default().push(handler);
        }
    }

    fn subscribe_once(&self, addr: &str, handler: OnceHandler) {
        if let Ok(mut table) = self.handlers.lock() {
            table.once.entry(addr.to_string()).or_default().push(handler);
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Subscribe to the external musical clock and hand beat ticks back on a
/// channel. Beats arrive on the DAW's beat counter or on the generic
/// `/clock/beat` contract; tempo and readiness messages are advisory and
/// only logged. Nothing from the clock is ever persisted.
pub fn beat_events(bridge: &dyn DawBridge) -> crossbeam_channel::Receiver<i64> {
    let (tx, rx) = crossbeam_channel::unbounded();
    for addr in ["/live/song/get/beat", "/clock/beat"] {
        let tx = tx.clone();
        bridge.subscribe(
            addr,
            Box::new(move |args| {
                if let Some(OscType::Int(beat)) = args.first() {
                    let _ = tx.send(*beat as i64);
                }
            }),
        );
    }
    bridge.subscribe(
        "/clock/tempo",
        Box::new(|args| {
            if let Some(OscType::Float(bpm)) = args.first() {
                info!("external clock tempo: {} bpm", bpm);
            }
        }),
    );
    bridge.subscribe(
        "/clock/ready",
        Box::new(|_| info!("external clock ready")),
    );
    rx
}

/// Logs every send and never transmits.
pub struct NullBridge;

impl DawBridge for NullBridge {
    fn send(&self, addr: &str, args: Vec<OscType>) -> io::Result<()> {
        debug!("daw (null): {} {:?}", addr, args);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn null_bridge_accepts_sends() {
        let bridge = NullBridge;
        bridge
            .send("/live/clip/fire", vec![OscType::Int(3), OscType::Int(0)])
            .unwrap();
    }

    #[test]
    fn once_handler_fires_exactly_once() {
        let handlers: Arc<Mutex<HandlerTable>> = Arc::new(Mutex::new(HandlerTable::default()));
        let (tx, rx) = mpsc::channel();
        {
            let mut table = handlers.lock().unwrap();
            table
                .once
                .entry("/live/test".to_string())
                .or_default()
                .push(Box::new(move |_args| {
                    let _ = tx.send(());
                }));
        }
        let msg = OscMessage {
            addr: "/live/test".to_string(),
            args: vec![],
        };
        dispatch_message(msg.clone(), &handlers);
        dispatch_message(msg, &handlers);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn persistent_handler_fires_every_time() {
        let handlers: Arc<Mutex<HandlerTable>> = Arc::new(Mutex::new(HandlerTable::default()));
        let (tx, rx) = mpsc::channel();
        {
            let mut table = handlers.lock().unwrap();
            table
                .on
                .entry("/live/song/get/beat".to_string())
                .or_default()
                .push(Box::new(move |args| {
                    if let Some(OscType::Int(beat)) = args.first() {
                        let _ = tx.send(*beat);
                    }
                }));
        }
        for beat in [1, 2, 3] {
            dispatch_message(
                OscMessage {
                    addr: "/live/song/get/beat".to_string(),
                    args: vec![OscType::Int(beat)],
                },
                &handlers,
            );
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn bundles_dispatch_recursively() {
        let handlers: Arc<Mutex<HandlerTable>> = Arc::new(Mutex::new(HandlerTable::default()));
        let (tx, rx) = mpsc::channel();
        {
            let mut table = handlers.lock().unwrap();
            table
                .on
                .entry("/live/song/get/beat".to_string())
                .or_default()
                .push(Box::new(move |_| {
                    let _ = tx.send(());
                }));
        }
        let bundle = OscPacket::Bundle(rosc::OscBundle {
            timetag: rosc::OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: "/live/song/get/beat".to_string(),
                    args: vec![OscType::Int(8)],
                }),
                OscPacket::Message(OscMessage {
                    addr: "/live/song/get/beat".to_string(),
                    args: vec![OscType::Int(9)],
                }),
            ],
        });
        dispatch_packet(bundle, &handlers);
        assert_eq!(rx.try_iter().count(), 2);
    }
}
