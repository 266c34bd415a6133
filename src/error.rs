//! Error types for dependency resolution

use crate::key::{ServiceKey, ServiceType};
use std::any::TypeId;
use thiserror::Error;

/// Errors that can occur while registering or resolving services
#[derive(Error, Debug)]
pub enum DiError {
    /// No registration or wrapper strategy satisfies a required request
    #[error("Service not found: {type_name}{}", qualifier_suffix(.name))]
    NotFound {
        type_name: &'static str,
        type_id: TypeId,
        name: Option<String>,
    },

    /// Circular dependency detected during resolution
    #[error("Circular dependency detected while resolving: {type_name} (path: {})", .path.join(" -> "))]
    CircularDependency {
        type_name: &'static str,
        path: Vec<&'static str>,
    },

    /// A constructor-selection override names a signature the implementation does not have
    #[error("No constructor of {type_name} matches the requested signature: {signature}")]
    ConstructorNotFound {
        type_name: &'static str,
        signature: String,
    },

    /// Attempted to register a duplicate service while the duplicate policy forbids it
    #[error("Service already registered: {type_name}{}", qualifier_suffix(.name))]
    AlreadyRegistered {
        type_name: &'static str,
        name: Option<String>,
    },

    /// The scope or container was already torn down
    #[error("Scope has been disposed")]
    Disposed,

    /// Factory failed to create service
    #[error("Failed to create service {type_name}: {reason}")]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// A resolved instance was not of the expected type
    #[error("Resolved instance is not a {type_name}")]
    TypeMismatch { type_name: &'static str },

    /// One or more owned disposables failed while a scope was torn down
    #[error("{} disposable(s) failed during scope teardown: {}", .errors.len(), .errors.join("; "))]
    DisposalFailed { errors: Vec<String> },

    /// Parent scope was dropped
    #[error("Parent scope has been dropped")]
    ParentDropped,

    /// A decorator chain for a service was re-entered while it was being assembled
    #[error("Decorator chain for {type_name} references itself")]
    DecoratorCycle { type_name: &'static str },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

fn qualifier_suffix(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" (named \"{name}\")"),
        None => String::new(),
    }
}

impl DiError {
    /// Create a NotFound error for a type
    #[inline]
    pub fn not_found<T: ?Sized + 'static>() -> Self {
        Self::NotFound {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            name: None,
        }
    }

    /// Create a NotFound error for a service key
    #[inline]
    pub fn not_found_key(key: &ServiceKey) -> Self {
        Self::NotFound {
            type_name: key.service().name(),
            type_id: key.service().id(),
            name: key.name().map(str::to_owned),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(service: &ServiceType, name: Option<&str>) -> Self {
        Self::AlreadyRegistered {
            type_name: service.name(),
            name: name.map(str::to_owned),
        }
    }

    /// Create a CircularDependency error from the in-progress resolution path
    #[inline]
    pub fn circular(service: &ServiceType, path: Vec<&'static str>) -> Self {
        Self::CircularDependency {
            type_name: service.name(),
            path,
        }
    }

    /// Create a TypeMismatch error
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>() -> Self {
        Self::TypeMismatch {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Whether this error only says that something could not be found.
    ///
    /// Constructor selection falls back to the next candidate on these and
    /// surfaces everything else immediately.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Clone for DiError {
    fn clone(&self) -> Self {
        match self {
            Self::NotFound {
                type_name,
                type_id,
                name,
            } => Self::NotFound {
                type_name,
                type_id: *type_id,
                name: name.clone(),
            },
            Self::CircularDependency { type_name, path } => Self::CircularDependency {
                type_name,
                path: path.clone(),
            },
            Self::ConstructorNotFound {
                type_name,
                signature,
            } => Self::ConstructorNotFound {
                type_name,
                signature: signature.clone(),
            },
            Self::AlreadyRegistered { type_name, name } => Self::AlreadyRegistered {
                type_name,
                name: name.clone(),
            },
            Self::Disposed => Self::Disposed,
            Self::CreationFailed { type_name, reason } => Self::CreationFailed {
                type_name,
                reason: reason.clone(),
            },
            Self::TypeMismatch { type_name } => Self::TypeMismatch { type_name },
            Self::DisposalFailed { errors } => Self::DisposalFailed {
                errors: errors.clone(),
            },
            Self::ParentDropped => Self::ParentDropped,
            Self::DecoratorCycle { type_name } => Self::DecoratorCycle { type_name },
            Self::Internal(s) => Self::Internal(s.clone()),
        }
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
