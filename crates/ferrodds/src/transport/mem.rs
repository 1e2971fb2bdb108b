// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Intra-process transport: participants sharing a [`MemHub`] exchange
//! datagrams through a delivery thread instead of sockets.
//!
//! Fills the role the shared-memory transport plays in production: fast
//! local delivery, and a deterministic fabric for the integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::locator::{Locator, LocatorKind};
use crate::Result;

use super::{DatagramCallback, TransportPlugin};

type Registration = (Locator, DatagramCallback);

enum HubCommand {
    Deliver {
        destination: Locator,
        source: Locator,
        payload: Vec<u8>,
    },
    Stop,
}

/// Shared fabric: routes datagrams to registered input channels on its own
/// delivery thread, so sends never re-enter the sender's call stack.
pub struct MemHub {
    channels: RwLock<HashMap<Locator, Vec<DatagramCallback>>>,
    tx: Sender<HubCommand>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Drop probability in permille, for loss-injection tests.
    drop_permille: RwLock<HashMap<Locator, u32>>,
    drop_state: Mutex<u64>,
}

impl MemHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded::<HubCommand>();
        let hub = Arc::new(MemHub {
            channels: RwLock::new(HashMap::new()),
            tx,
            worker: Mutex::new(None),
            drop_permille: RwLock::new(HashMap::new()),
            drop_state: Mutex::new(0x853c_49e6_748f_ea9b),
        });

        let hub_worker = Arc::clone(&hub);
        let handle = std::thread::Builder::new()
            .name("ferrodds-mem-hub".to_string())
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        HubCommand::Deliver {
                            destination,
                            source,
                            payload,
                        } => {
                            let callbacks: Vec<DatagramCallback> = hub_worker
                                .channels
                                .read()
                                .get(&destination)
                                .cloned()
                                .unwrap_or_default();
                            for cb in callbacks {
                                cb(&payload, source);
                            }
                        }
                        HubCommand::Stop => break,
                    }
                }
            })
            .expect("spawn mem hub worker");
        *hub.worker.lock() = Some(handle);
        hub
    }

    fn register(&self, registration: Registration) {
        let (locator, callback) = registration;
        self.channels.write().entry(locator).or_default().push(callback);
    }

    fn post(&self, destination: Locator, source: Locator, payload: Vec<u8>) {
        if self.should_drop(&destination) {
            log::debug!("[MEM] injected drop towards {destination:?}");
            return;
        }
        let _ = self.tx.send(HubCommand::Deliver {
            destination,
            source,
            payload,
        });
    }

    /// Configure random loss towards one destination (testing).
    pub fn set_loss(&self, destination: Locator, permille: u32) {
        self.drop_permille.write().insert(destination, permille);
    }

    /// Drop exactly the next datagram towards `destination`.
    pub fn drop_next(&self, destination: Locator) {
        self.drop_permille.write().insert(destination, u32::MAX);
    }

    fn should_drop(&self, destination: &Locator) -> bool {
        let mut table = self.drop_permille.write();
        match table.get(destination).copied() {
            None | Some(0) => false,
            Some(u32::MAX) => {
                // One-shot drop.
                table.remove(destination);
                true
            }
            Some(permille) => {
                drop(table);
                let mut state = self.drop_state.lock();
                *state ^= *state << 13;
                *state ^= *state >> 7;
                *state ^= *state << 17;
                (*state % 1000) < u64::from(permille)
            }
        }
    }

    /// Stop the delivery thread; subsequent sends are discarded.
    pub fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Stop);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Wait until the delivery queue has drained (tests). The barrier
    /// datagram targets an unregistered locator, so its dequeueing proves
    /// everything queued before it was delivered.
    pub fn settle(&self) {
        use std::sync::atomic::{AtomicBool, Ordering};
        let flag = Arc::new(AtomicBool::new(false));
        let flag_cb = Arc::clone(&flag);
        let barrier = Locator {
            kind: LocatorKind::Shm as i32,
            port: u32::MAX,
            address: [0xba; 16],
        };
        self.register((
            barrier,
            Arc::new(move |_, _| flag_cb.store(true, Ordering::SeqCst)),
        ));
        let _ = self.tx.send(HubCommand::Deliver {
            destination: barrier,
            source: Locator::INVALID,
            payload: Vec::new(),
        });
        for _ in 0..1000 {
            if flag.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
        self.channels.write().remove(&barrier);
    }
}

/// One participant's handle onto a [`MemHub`].
pub struct MemTransport {
    hub: Arc<MemHub>,
    /// Source locator stamped onto outgoing datagrams.
    source: Locator,
}

impl MemTransport {
    #[must_use]
    pub fn new(hub: Arc<MemHub>, source: Locator) -> Self {
        MemTransport { hub, source }
    }
}

impl TransportPlugin for MemTransport {
    fn supported_kinds(&self) -> Vec<i32> {
        vec![LocatorKind::Shm as i32, LocatorKind::Udpv4 as i32]
    }

    fn create_input_channel(
        &self,
        locator: Locator,
        _max_message_size: usize,
        on_datagram: DatagramCallback,
    ) -> Result<()> {
        self.hub.register((locator, on_datagram));
        Ok(())
    }

    fn create_output_channel(&self, _locator: Locator) -> Result<()> {
        Ok(())
    }

    fn send(&self, buffer: &[u8], destinations: &[Locator], _deadline: Instant) -> bool {
        for destination in destinations {
            self.hub.post(*destination, self.source, buffer.to_vec());
        }
        !destinations.is_empty()
    }

    fn is_locator_supported(&self, locator: &Locator) -> bool {
        self.supported_kinds().contains(&locator.kind)
    }

    fn normalize_locator(&self, locator: &Locator) -> Vec<Locator> {
        vec![*locator]
    }

    fn shutdown(&self) {}
}
