// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

pub mod price_feed;
pub mod provider;
pub mod simulation;
pub mod substrate;
