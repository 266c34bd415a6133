//! Registration storage
//!
//! Ordered tree from service identity hash to a node holding every
//! registration of that service. Identities whose hashes collide share a node
//! and are told apart by structural equality in the node's collision chain.
//!
//! Writers are serialized by a single lock and publish a new tree; readers
//! clone the latest published `Arc` and never wait on a writer's work.

use crate::config::DuplicatePolicy;
use crate::key::ServiceType;
use crate::registration::{Registration, RegistrationId, ReplaceDirective};
use crate::{DiError, Result};
use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Registrations of one service, ordered by registration id.
pub(crate) type Candidates = Arc<[Arc<Registration>]>;

#[derive(Clone)]
struct Entry {
    service: ServiceType,
    registrations: Candidates,
}

/// Tree node: all identities sharing one hash.
#[derive(Clone, Default)]
struct Node {
    chain: Vec<Entry>,
}

impl Node {
    fn get(&self, service: &ServiceType) -> Option<&Candidates> {
        self.chain
            .iter()
            .find(|entry| entry.service == *service)
            .map(|entry| &entry.registrations)
    }

    fn set(&mut self, service: ServiceType, registrations: Vec<Arc<Registration>>) {
        let position = self.chain.iter().position(|entry| entry.service == service);
        match (position, registrations.is_empty()) {
            (Some(index), true) => {
                self.chain.remove(index);
            }
            (Some(index), false) => self.chain[index].registrations = registrations.into(),
            (None, true) => {}
            (None, false) => self.chain.push(Entry {
                service,
                registrations: registrations.into(),
            }),
        }
    }
}

type Tree = BTreeMap<u64, Arc<Node>>;

/// What [`RegistrationStore::add`] did with a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    Added(RegistrationId),
    Replaced(RegistrationId),
    /// Dropped; carries the id that keeps answering, if any.
    Skipped(Option<RegistrationId>),
}

/// The associative registration store.
pub(crate) struct RegistrationStore {
    hasher: RandomState,
    published: RwLock<Arc<Tree>>,
    writer: Mutex<()>,
}

impl RegistrationStore {
    pub(crate) fn new() -> Self {
        Self {
            hasher: RandomState::new(),
            published: RwLock::new(Arc::new(Tree::new())),
            writer: Mutex::new(()),
        }
    }

    #[inline]
    fn hash(&self, service: &ServiceType) -> u64 {
        self.hasher.hash_one(service.id())
    }

    #[inline]
    fn snapshot(&self) -> Arc<Tree> {
        Arc::clone(&self.published.read())
    }

    fn lookup(&self, tree: &Tree, service: &ServiceType) -> Option<Candidates> {
        tree.get(&self.hash(service))
            .and_then(|node| node.get(service))
            .cloned()
    }

    /// Every registration of `service` (decorators included), in registration order.
    pub(crate) fn candidates(&self, service: &ServiceType) -> Option<Candidates> {
        self.lookup(&self.snapshot(), service)
    }

    /// Whether a non-decorator registration exists for `service`.
    pub(crate) fn contains(&self, service: &ServiceType) -> bool {
        self.candidates(service)
            .is_some_and(|all| all.iter().any(|r| !r.is_decorator()))
    }

    /// All registrations, grouped by service.
    pub(crate) fn all(&self) -> Vec<Arc<Registration>> {
        self.snapshot()
            .values()
            .flat_map(|node| node.chain.iter())
            .flat_map(|entry| entry.registrations.iter().cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot()
            .values()
            .flat_map(|node| node.chain.iter())
            .map(|entry| entry.registrations.len())
            .sum()
    }

    /// Publish `registrations` as the new candidate list of `service`.
    fn publish(&self, tree: &Tree, service: ServiceType, registrations: Vec<Arc<Registration>>) {
        let hash = self.hash(&service);
        let mut node = tree.get(&hash).map(|n| (**n).clone()).unwrap_or_default();
        node.set(service, registrations);

        let mut next = tree.clone();
        if node.chain.is_empty() {
            next.remove(&hash);
        } else {
            next.insert(hash, Arc::new(node));
        }
        *self.published.write() = Arc::new(next);
    }

    /// Add a registration, applying its replace directive or the duplicate policy.
    pub(crate) fn add(&self, registration: Registration, policy: DuplicatePolicy) -> Result<AddOutcome> {
        let _writer = self.writer.lock();
        let tree = self.snapshot();
        let service = *registration.service();
        let mut current: Vec<Arc<Registration>> = self
            .lookup(&tree, &service)
            .map(|all| all.to_vec())
            .unwrap_or_default();

        let discriminator = registration.discriminator();
        let matching = current.iter().position(|existing| {
            existing.is_decorator() == registration.is_decorator()
                && existing.discriminator() == discriminator
        });

        enum Action {
            Append,
            Replace(usize),
            Skip(Option<RegistrationId>),
        }

        let action = match (registration.replace_directive(), matching) {
            (Some(_), Some(index)) => Action::Replace(index),
            (Some(ReplaceDirective::Always), None) => Action::Append,
            (Some(ReplaceDirective::OnlyIfExists), None) => Action::Skip(None),
            (None, None) => Action::Append,
            (None, Some(_)) if registration.is_decorator() => Action::Append,
            (None, Some(index)) => match policy {
                DuplicatePolicy::PreserveDuplications => Action::Append,
                DuplicatePolicy::ReplaceExisting => Action::Replace(index),
                DuplicatePolicy::SkipDuplications => Action::Skip(Some(current[index].id())),
                DuplicatePolicy::ThrowOnDuplicate => {
                    return Err(DiError::already_registered(&service, registration.name()));
                }
            },
        };

        let outcome = match action {
            Action::Append => {
                let id = registration.id();
                current.push(Arc::new(registration));
                AddOutcome::Added(id)
            }
            Action::Replace(index) => {
                let id = current[index].id();
                current[index] = Arc::new(registration.taking_over(id));
                AddOutcome::Replaced(id)
            }
            Action::Skip(kept) => return Ok(AddOutcome::Skipped(kept)),
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            service = service.name(),
            outcome = ?outcome,
            candidates = current.len(),
            "Registration stored"
        );

        self.publish(&tree, service, current);
        Ok(outcome)
    }

    /// Drop every registration of `service` of the given kind. Returns how many went.
    pub(crate) fn remove_all(&self, service: &ServiceType, decorators: bool) -> usize {
        let _writer = self.writer.lock();
        let tree = self.snapshot();
        let Some(current) = self.lookup(&tree, service) else {
            return 0;
        };
        let kept: Vec<Arc<Registration>> = current
            .iter()
            .filter(|r| r.is_decorator() != decorators)
            .cloned()
            .collect();
        let removed = current.len() - kept.len();
        if removed > 0 {
            self.publish(&tree, *service, kept);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::Implementation;

    struct Alpha;
    struct Beta;

    fn named(value: u32, name: &str) -> Registration {
        Registration::instance(value).named(name)
    }

    #[test]
    fn test_preserve_duplications_appends_in_order() {
        let store = RegistrationStore::new();
        let first = store.add(Registration::instance(1u32), DuplicatePolicy::PreserveDuplications).unwrap();
        let second = store.add(Registration::instance(2u32), DuplicatePolicy::PreserveDuplications).unwrap();

        let all = store.candidates(&ServiceType::of::<u32>()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(AddOutcome::Added(all[0].id()), first);
        assert_eq!(AddOutcome::Added(all[1].id()), second);
        assert!(all[0].id() < all[1].id());
    }

    #[test]
    fn test_replace_existing_keeps_position() {
        let store = RegistrationStore::new();
        store.add(named(1, "a"), DuplicatePolicy::ReplaceExisting).unwrap();
        store.add(named(2, "b"), DuplicatePolicy::ReplaceExisting).unwrap();
        let before = store.candidates(&ServiceType::of::<u32>()).unwrap()[0].id();

        let outcome = store.add(named(3, "a"), DuplicatePolicy::ReplaceExisting).unwrap();
        assert_eq!(outcome, AddOutcome::Replaced(before));

        let all = store.candidates(&ServiceType::of::<u32>()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), before);
        assert_eq!(all[0].name(), Some("a"));
    }

    #[test]
    fn test_skip_and_throw_policies() {
        let store = RegistrationStore::new();
        store.add(named(1, "a"), DuplicatePolicy::SkipDuplications).unwrap();
        let skipped = store.add(named(2, "a"), DuplicatePolicy::SkipDuplications).unwrap();
        assert!(matches!(skipped, AddOutcome::Skipped(Some(_))));
        assert_eq!(store.len(), 1);

        let err = store.add(named(3, "a"), DuplicatePolicy::ThrowOnDuplicate).unwrap_err();
        assert!(matches!(err, DiError::AlreadyRegistered { .. }));

        // different qualifier is not a duplicate
        store.add(named(4, "b"), DuplicatePolicy::ThrowOnDuplicate).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_replace_directives() {
        let store = RegistrationStore::new();
        let dropped = store
            .add(named(1, "a").replace_only_if_exists(), DuplicatePolicy::PreserveDuplications)
            .unwrap();
        assert_eq!(dropped, AddOutcome::Skipped(None));
        assert_eq!(store.len(), 0);

        store.add(named(1, "a").replace_existing(), DuplicatePolicy::PreserveDuplications).unwrap();
        let outcome = store
            .add(named(2, "a").replace_existing(), DuplicatePolicy::PreserveDuplications)
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Replaced(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_decorators_always_append() {
        let store = RegistrationStore::new();
        let ctor = || Implementation::instance(Alpha);
        store.add(Registration::decorator::<Alpha>(ctor()), DuplicatePolicy::ReplaceExisting).unwrap();
        store.add(Registration::decorator::<Alpha>(ctor()), DuplicatePolicy::ReplaceExisting).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&ServiceType::of::<Alpha>()));
    }

    #[test]
    fn test_distinct_services_do_not_alias() {
        let store = RegistrationStore::new();
        store.add(Registration::instance(Alpha), DuplicatePolicy::PreserveDuplications).unwrap();
        store.add(Registration::instance(Beta), DuplicatePolicy::PreserveDuplications).unwrap();

        assert_eq!(store.candidates(&ServiceType::of::<Alpha>()).unwrap().len(), 1);
        assert_eq!(store.candidates(&ServiceType::of::<Beta>()).unwrap().len(), 1);
        assert!(store.candidates(&ServiceType::of::<u8>()).is_none());
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn test_collision_chain_compares_structurally() {
        let mut node = Node::default();
        node.set(ServiceType::of::<Alpha>(), vec![Arc::new(Registration::instance(Alpha))]);
        node.set(ServiceType::of::<Beta>(), vec![Arc::new(Registration::instance(Beta))]);
        assert_eq!(node.chain.len(), 2);
        assert!(node.get(&ServiceType::of::<Alpha>()).is_some());
        assert!(node.get(&ServiceType::of::<u8>()).is_none());

        node.set(ServiceType::of::<Alpha>(), Vec::new());
        assert_eq!(node.chain.len(), 1);
    }

    #[test]
    fn test_remove_all_by_kind() {
        let store = RegistrationStore::new();
        store.add(Registration::instance(1u32), DuplicatePolicy::PreserveDuplications).unwrap();
        store
            .add(
                Registration::decorator::<u32>(Implementation::instance(2u32)),
                DuplicatePolicy::PreserveDuplications,
            )
            .unwrap();

        assert_eq!(store.remove_all(&ServiceType::of::<u32>(), true), 1);
        assert!(store.contains(&ServiceType::of::<u32>()));
        assert_eq!(store.remove_all(&ServiceType::of::<u32>(), true), 0);
        assert_eq!(store.remove_all(&ServiceType::of::<u32>(), false), 1);
        assert!(store.candidates(&ServiceType::of::<u32>()).is_none());
    }

    #[test]
    fn test_concurrent_adds() {
        use std::sync::Barrier;

        let store = RegistrationStore::new();
        let barrier = Barrier::new(4);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    for i in 0..25u32 {
                        store
                            .add(Registration::instance(i), DuplicatePolicy::PreserveDuplications)
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(store.len(), 100);
    }
}
