//! Service identities
//!
//! A [`ServiceType`] names a requested abstraction; a [`ServiceKey`] adds the
//! optional qualifier. Both compare structurally, so two keys built from the
//! same type and an equal qualifier string are the same identity.

use crate::Injectable;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A closed instance of a generic service family.
///
/// Registrations made against the family's `Definition` marker act as open
/// generic registrations: when no registration exists for the closed type
/// itself, they are specialized for it on demand.
///
/// # Examples
///
/// ```rust
/// use dependency_resolver::GenericType;
/// use std::marker::PhantomData;
///
/// /// Marker naming the `Repository<_>` family.
/// struct RepositoryDef;
///
/// struct Repository<T> {
///     _entity: PhantomData<fn() -> T>,
/// }
///
/// impl<T: 'static> GenericType for Repository<T> {
///     type Definition = RepositoryDef;
/// }
/// ```
pub trait GenericType: Injectable {
    /// Marker type standing for the open definition.
    type Definition: 'static;
}

/// Runtime identity of a service type.
///
/// Equality and hashing only look at the `TypeId`; the name and the optional
/// generic definition are carried for diagnostics and open-generic lookup.
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
    definition: Option<(TypeId, &'static str)>,
}

impl ServiceType {
    /// Identity of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            definition: None,
        }
    }

    /// Identity of a closed generic `T`, remembering its open definition.
    #[inline]
    pub fn closed<T: GenericType>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            definition: Some((
                TypeId::of::<T::Definition>(),
                std::any::type_name::<T::Definition>(),
            )),
        }
    }

    /// The raw `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human-readable type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The open generic definition this type closes, if any.
    #[inline]
    pub fn definition(&self) -> Option<ServiceType> {
        self.definition.map(|(id, name)| ServiceType {
            id,
            name,
            definition: None,
        })
    }
}

impl PartialEq for ServiceType {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Service identity: a type plus an optional qualifier name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    service: ServiceType,
    name: Option<Arc<str>>,
}

impl ServiceKey {
    /// Create a key from its parts.
    #[inline]
    pub fn new(service: ServiceType, name: Option<Arc<str>>) -> Self {
        Self { service, name }
    }

    /// Unqualified key for `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceType::of::<T>(), None)
    }

    /// Qualified key for `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::new(ServiceType::of::<T>(), Some(name.into()))
    }

    /// The service type.
    #[inline]
    pub fn service(&self) -> &ServiceType {
        &self.service
    }

    /// The qualifier, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}[{name}]", self.service.name),
            None => f.write_str(self.service.name),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::marker::PhantomData;

    struct RepoDef;
    struct Repo<T>(PhantomData<fn() -> T>);
    impl<T: 'static> GenericType for Repo<T> {
        type Definition = RepoDef;
    }

    #[test]
    fn test_structural_equality() {
        let a = ServiceKey::named::<u32>(String::from("port"));
        let b = ServiceKey::named::<u32>("port");
        assert_eq!(a, b);
        assert_ne!(a, ServiceKey::of::<u32>());
        assert_ne!(a, ServiceKey::named::<u64>("port"));

        let set: HashSet<ServiceKey> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_closed_type_keeps_definition() {
        let closed = ServiceType::closed::<Repo<u8>>();
        assert_eq!(closed, ServiceType::of::<Repo<u8>>());
        assert_eq!(closed.definition(), Some(ServiceType::of::<RepoDef>()));
        assert!(ServiceType::of::<Repo<u8>>().definition().is_none());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ServiceKey::named::<u32>("port").to_string(), "u32[port]");
        assert_eq!(ServiceKey::of::<u32>().to_string(), "u32");
    }
}
