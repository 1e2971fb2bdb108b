// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Locator selection, well-known port mapping, and external locator
//! filtering.

pub mod external_locators;
pub mod locator_selector;
pub mod ports;

pub use external_locators::{ExternalLocatorEntry, ExternalLocatorsProcessor};
pub use locator_selector::{LocatorSelector, SelectorEntry};
pub use ports::PortMapping;
