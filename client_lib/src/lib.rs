//! Fleetdash client library.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod poller;
pub mod session;

#[cfg(feature = "http_client")]
pub mod http_client;
