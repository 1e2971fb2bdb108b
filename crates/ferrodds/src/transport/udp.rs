// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! UDPv4 transport: reuse-address sockets, multicast group membership, and
//! a mio-driven receive loop per input channel.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::core::locator::{Locator, LocatorKind};
use crate::{Error, Result};

use super::{DatagramCallback, TransportPlugin};

const DATA_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Default multicast TTL (stay within the site).
const DEFAULT_TTL: u32 = 1;

struct InputChannel {
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// UDPv4 transport plugin.
pub struct UdpTransport {
    /// Shared send socket, bound to an ephemeral port.
    output: Mutex<Option<Arc<UdpSocket>>>,
    inputs: Mutex<Vec<InputChannel>>,
    ttl: u32,
}

impl UdpTransport {
    pub fn new() -> Result<Self> {
        Ok(UdpTransport {
            output: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            ttl: DEFAULT_TTL,
        })
    }

    fn output_socket(&self) -> Result<Arc<UdpSocket>> {
        let mut guard = self.output.lock();
        if let Some(socket) = guard.as_ref() {
            return Ok(Arc::clone(socket));
        }
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(self.ttl)?;
        socket.set_multicast_loop_v4(true)?;
        let socket = Arc::new(socket);
        *guard = Some(Arc::clone(&socket));
        Ok(socket)
    }

    /// Bind a reusable receive socket, joining the group for multicast
    /// locators so several participants share the well-known port.
    fn bind_input(locator: &Locator) -> Result<UdpSocket> {
        let addr = locator
            .to_udp_socket_addr()
            .ok_or(Error::InvalidConfig("input locator is not UDPv4"))?;
        let SocketAddr::V4(addr) = addr else {
            return Err(Error::InvalidConfig("UDPv6 input on the v4 transport"));
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        if locator.is_multicast() {
            let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port());
            socket.bind(&SocketAddr::V4(bind).into())?;
            socket.join_multicast_v4(addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
            log::debug!("[UDP] joined multicast {} on port {}", addr.ip(), addr.port());
        } else {
            let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port());
            socket.bind(&SocketAddr::V4(bind).into())?;
        }
        Ok(socket.into())
    }
}

impl TransportPlugin for UdpTransport {
    fn supported_kinds(&self) -> Vec<i32> {
        vec![LocatorKind::Udpv4 as i32]
    }

    fn create_input_channel(
        &self,
        locator: Locator,
        max_message_size: usize,
        on_datagram: DatagramCallback,
    ) -> Result<()> {
        let std_socket = Self::bind_input(&locator)?;
        let mut socket = mio::net::UdpSocket::from_std(std_socket);

        let mut poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        poll.registry()
            .register(&mut socket, DATA_TOKEN, Interest::READABLE)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let port = locator.port;

        let handle = std::thread::Builder::new()
            .name(format!("ferrodds-udp-rx-{port}"))
            .spawn(move || {
                let mut events = Events::with_capacity(16);
                let mut buf = vec![0u8; max_message_size];
                'outer: loop {
                    if poll.poll(&mut events, None).is_err() {
                        break;
                    }
                    for event in events.iter() {
                        match event.token() {
                            WAKER_TOKEN => break 'outer,
                            DATA_TOKEN => loop {
                                match socket.recv_from(&mut buf) {
                                    Ok((len, src)) => {
                                        let source = Locator::from_udp_socket_addr(src);
                                        on_datagram(&buf[..len], source);
                                    }
                                    Err(ref e)
                                        if e.kind() == std::io::ErrorKind::WouldBlock =>
                                    {
                                        break;
                                    }
                                    Err(e) => {
                                        log::warn!("[UDP] recv error on port {port}: {e}");
                                        break;
                                    }
                                }
                            },
                            _ => {}
                        }
                    }
                    if stop_thread.load(Ordering::Relaxed) {
                        break;
                    }
                }
            })?;

        self.inputs.lock().push(InputChannel {
            waker,
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    fn create_output_channel(&self, _locator: Locator) -> Result<()> {
        self.output_socket().map(|_| ())
    }

    fn send(&self, buffer: &[u8], destinations: &[Locator], deadline: Instant) -> bool {
        let Ok(socket) = self.output_socket() else {
            return false;
        };
        let mut any = false;
        for destination in destinations {
            if Instant::now() > deadline {
                log::debug!("[UDP] send deadline elapsed, {destination:?} skipped");
                break;
            }
            let Some(addr) = destination.to_udp_socket_addr() else {
                continue;
            };
            match socket.send_to(buffer, addr) {
                Ok(_) => any = true,
                Err(e) => log::debug!("[UDP] send_to {addr} failed: {e}"),
            }
        }
        any
    }

    fn is_locator_supported(&self, locator: &Locator) -> bool {
        locator.kind() == LocatorKind::Udpv4
    }

    fn normalize_locator(&self, locator: &Locator) -> Vec<Locator> {
        if locator.kind() != LocatorKind::Udpv4 {
            return Vec::new();
        }
        // Wildcard address: announce one locator per usable interface.
        if locator.address[12..] != [0, 0, 0, 0] {
            return vec![*locator];
        }
        let port = locator.port as u16;
        match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => {
                let mut out: Vec<Locator> = interfaces
                    .into_iter()
                    .filter_map(|(_, ip)| match ip {
                        std::net::IpAddr::V4(v4) if !v4.is_loopback() => {
                            Some(Locator::udpv4(v4, port))
                        }
                        _ => None,
                    })
                    .collect();
                if out.is_empty() {
                    out.push(Locator::udpv4(Ipv4Addr::LOCALHOST, port));
                }
                out
            }
            Err(_) => vec![Locator::udpv4(Ipv4Addr::LOCALHOST, port)],
        }
    }

    fn shutdown(&self) {
        let mut inputs = self.inputs.lock();
        for channel in inputs.iter_mut() {
            channel.stop.store(true, Ordering::Relaxed);
            let _ = channel.waker.wake();
        }
        for channel in inputs.iter_mut() {
            if let Some(handle) = channel.handle.take() {
                let _ = handle.join();
            }
        }
        inputs.clear();
        *self.output.lock() = None;
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_unicast_roundtrip() {
        let transport = UdpTransport::new().unwrap();
        // Bind an ephemeral unicast input by probing a free port.
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let received = Arc::new(AtomicUsize::new(0));
        let received_cb = Arc::clone(&received);
        let input = Locator::udpv4(Ipv4Addr::LOCALHOST, port);
        transport
            .create_input_channel(
                input,
                65_500,
                Arc::new(move |data, _| {
                    if data == b"ping" {
                        received_cb.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        let sent = transport.send(
            b"ping",
            &[input],
            Instant::now() + Duration::from_secs(1),
        );
        assert!(sent);

        // Give the receive thread a moment.
        for _ in 0..50 {
            if received.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(received.load(Ordering::SeqCst), 1);
        transport.shutdown();
    }

    #[test]
    fn test_normalize_wildcard_expands() {
        let transport = UdpTransport::new().unwrap();
        let wildcard = Locator::udpv4(Ipv4Addr::UNSPECIFIED, 7411);
        let expanded = transport.normalize_locator(&wildcard);
        assert!(!expanded.is_empty());
        for loc in &expanded {
            assert_ne!(&loc.address[12..], &[0, 0, 0, 0]);
            assert_eq!(loc.port, 7411);
        }
    }

    #[test]
    fn test_concrete_locator_passes_through() {
        let transport = UdpTransport::new().unwrap();
        let concrete = Locator::udpv4(Ipv4Addr::new(192, 168, 1, 5), 7411);
        assert_eq!(transport.normalize_locator(&concrete), vec![concrete]);
    }

    #[test]
    fn test_unsupported_kind_rejected() {
        let transport = UdpTransport::new().unwrap();
        let tcp = Locator {
            kind: LocatorKind::Tcpv4 as i32,
            port: 7411,
            address: [0; 16],
        };
        assert!(!transport.is_locator_supported(&tcp));
        assert!(transport.normalize_locator(&tcp).is_empty());
    }
}
