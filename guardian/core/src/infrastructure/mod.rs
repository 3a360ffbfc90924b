// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod ads;
pub mod event_bus;
pub mod notifier;
pub mod repositories;
