//! Error types for the lifecycle core
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use roomlink_types::RoomlinkError;
use thiserror::Error;

use crate::handle::ResourceKind;
use crate::native::NativeError;

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors that can occur while managing native resources.
///
/// Reference-count underflow is not an error variant: it is clamped and
/// reported through [`crate::singleton::ReleaseOutcome::Underflow`].
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Native factory call returned the zero handle
    #[error("Failed to create native {kind}: {reason}")]
    CreationFailure { kind: ResourceKind, reason: String },

    /// Operation attempted on a released entity
    #[error("{entity} has already been released")]
    AlreadyReleased { entity: String },

    /// A released handle reached a native call
    #[error("Native {kind} handle used after release")]
    UseAfterRelease { kind: ResourceKind },

    /// Registry already holds an entity with this identity
    #[error("Duplicate identity: {identity}")]
    DuplicateIdentity { identity: String },

    /// Operation is not supported by this entity
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Native engine reported a failure
    #[error("Native engine error: {0}")]
    Native(#[from] NativeError),

    /// Callback thread could not be started or reached
    #[error("Callback dispatcher error: {0}")]
    Dispatcher(String),

    /// One or more teardown steps failed; every step was still attempted
    #[error("Release of {entity} failed: {reason}")]
    ReleaseFailed { entity: String, reason: String },

    /// Invalid identifier or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] RoomlinkError),
}

impl LifecycleError {
    pub fn already_released(entity: impl Into<String>) -> Self {
        LifecycleError::AlreadyReleased {
            entity: entity.into(),
        }
    }
}
