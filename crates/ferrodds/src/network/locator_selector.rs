// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Locator selection: given the matched remote endpoints and their
//! announced locators, produce the minimal set of send operations for one
//! submessage group.
//!
//! A multicast locator that covers two or more enabled entries beats
//! per-entry unicast; remaining ties resolve by lowest (externality, cost).

use std::collections::HashMap;

use crate::core::guid::Guid;
use crate::core::locator::{Locator, LocatorKind};

/// Per-remote-endpoint selection state.
#[derive(Debug, Clone)]
pub struct SelectorEntry {
    pub remote_guid: Guid,
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
    pub enabled: bool,
    /// Locator chosen for this entry in the current cycle.
    selected: Option<Locator>,
}

/// One destination of the computed send plan and the entries it covers.
#[derive(Debug, PartialEq, Eq)]
pub struct SelectedDestination {
    pub locator: Locator,
    pub covered: Vec<Guid>,
}

/// Transmission cost rank: lower sends first choice.
/// Externality is 0 for locators inside our subnets; external locators rank
/// above every local one. SHM beats loopback beats the wire.
fn rank(locator: &Locator, externality_of: &dyn Fn(&Locator) -> u8) -> (u8, u8) {
    let externality = externality_of(locator);
    let cost = match locator.kind() {
        LocatorKind::Shm => 0,
        _ if locator.is_loopback() => 1,
        _ => 2,
    };
    (externality, cost)
}

/// Selector for one local endpoint's matched peers.
#[derive(Default)]
pub struct LocatorSelector {
    entries: HashMap<Guid, SelectorEntry>,
    /// Set when enable/disable changed the enabled set since the last
    /// selection; the caller must flush its current message group first.
    enabled_changed: bool,
}

impl LocatorSelector {
    #[must_use]
    pub fn new() -> Self {
        LocatorSelector::default()
    }

    /// Register or refresh a matched remote endpoint.
    pub fn add_entry(&mut self, remote_guid: Guid, unicast: Vec<Locator>, multicast: Vec<Locator>) {
        self.entries.insert(
            remote_guid,
            SelectorEntry {
                remote_guid,
                unicast,
                multicast,
                enabled: false,
                selected: None,
            },
        );
    }

    pub fn remove_entry(&mut self, remote_guid: &Guid) {
        self.entries.remove(remote_guid);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a cycle: choose whether entries begin enabled.
    pub fn reset(&mut self, enable_all: bool) {
        for entry in self.entries.values_mut() {
            entry.enabled = enable_all;
            entry.selected = None;
        }
        self.enabled_changed = false;
    }

    /// Opt one destination in.
    pub fn enable(&mut self, guid: &Guid) {
        if let Some(entry) = self.entries.get_mut(guid) {
            if !entry.enabled {
                entry.enabled = true;
                self.enabled_changed = true;
            }
        }
    }

    /// True when the enabled set changed since the last `selection_start`;
    /// the caller flushes its in-progress RTPS message before regrouping.
    #[must_use]
    pub fn enabled_changed(&self) -> bool {
        self.enabled_changed
    }

    /// Clear per-cycle selection state.
    pub fn selection_start(&mut self) {
        for entry in self.entries.values_mut() {
            entry.selected = None;
        }
        self.enabled_changed = false;
    }

    /// Compute the send plan over the enabled entries for the transports
    /// that can reach `supported_kinds` locators.
    ///
    /// `externality_of` ranks candidate locators (0 = local subnet).
    #[must_use]
    pub fn select_plan(
        &mut self,
        supported_kinds: &[i32],
        externality_of: &dyn Fn(&Locator) -> u8,
    ) -> Vec<SelectedDestination> {
        let supported = |l: &Locator| supported_kinds.contains(&l.kind);
        let mut plan: Vec<SelectedDestination> = Vec::new();

        // Pass 1: multicast locators shared by two or more unselected
        // entries cover them all with one send.
        let mut multicast_cover: HashMap<Locator, Vec<Guid>> = HashMap::new();
        for entry in self.entries.values() {
            if !entry.enabled || entry.selected.is_some() {
                continue;
            }
            for mc in entry.multicast.iter().filter(|l| supported(l)) {
                multicast_cover.entry(*mc).or_default().push(entry.remote_guid);
            }
        }
        let mut shared: Vec<(Locator, Vec<Guid>)> = multicast_cover
            .into_iter()
            .filter(|(_, covered)| covered.len() >= 2)
            .collect();
        // Widest coverage first; rank breaks ties.
        shared.sort_by(|(la, ca), (lb, cb)| {
            cb.len()
                .cmp(&ca.len())
                .then_with(|| rank(la, externality_of).cmp(&rank(lb, externality_of)))
        });
        for (locator, covered) in shared {
            let fresh: Vec<Guid> = covered
                .into_iter()
                .filter(|g| {
                    self.entries
                        .get(g)
                        .is_some_and(|e| e.selected.is_none())
                })
                .collect();
            if fresh.len() < 2 {
                continue;
            }
            for guid in &fresh {
                if let Some(entry) = self.entries.get_mut(guid) {
                    entry.selected = Some(locator);
                }
            }
            plan.push(SelectedDestination {
                locator,
                covered: fresh,
            });
        }

        // Pass 2: best-ranked unicast per remaining entry.
        let mut remaining: Vec<Guid> = self
            .entries
            .values()
            .filter(|e| e.enabled && e.selected.is_none())
            .map(|e| e.remote_guid)
            .collect();
        remaining.sort(); // deterministic plan order
        for guid in remaining {
            let Some(entry) = self.entries.get_mut(&guid) else {
                continue;
            };
            let best = entry
                .unicast
                .iter()
                .filter(|l| supported(l))
                .min_by_key(|l| rank(l, externality_of))
                .copied()
                // No reachable unicast: fall back to a solo multicast.
                .or_else(|| {
                    entry
                        .multicast
                        .iter()
                        .filter(|l| supported(l))
                        .min_by_key(|l| rank(l, externality_of))
                        .copied()
                });
            if let Some(locator) = best {
                entry.selected = Some(locator);
                match plan.iter_mut().find(|d| d.locator == locator) {
                    Some(dest) => dest.covered.push(guid),
                    None => plan.push(SelectedDestination {
                        locator,
                        covered: vec![guid],
                    }),
                }
            } else {
                log::warn!(
                    "[SELECTOR] no reachable locator for {:?} (kinds {supported_kinds:?})",
                    guid
                );
            }
        }

        plan
    }
}
