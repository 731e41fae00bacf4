// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod authorization;
pub mod credential;
pub mod dump;
pub mod resource;

pub use authorization::{AuthorizationRequest, DEFAULT_SCOPES};
pub use credential::{Credential, TokenPair};
pub use dump::DayDump;
pub use resource::{step_total, ResourceDescriptor, ResourceKind};
