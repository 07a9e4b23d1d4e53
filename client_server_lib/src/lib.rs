//! Fleetdash types shared between the proxy server and its clients.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod auth;
pub mod series;
pub mod telemetry;
