// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

pub mod allocator;
pub mod builder;
pub mod context;
pub mod discovery;
pub mod financing;
pub mod intent;
pub mod prices;
pub mod risk;
