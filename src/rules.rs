//! Selection rules
//!
//! A closed set of rules filters and ranks the candidate registrations of a
//! request. Each rule either excludes a candidate or adds to its weight; the
//! heaviest surviving candidate wins and ties go to the latest registration.

use crate::config::{ConstructorSelection, EnumerableOrder};
use crate::key::ServiceType;
use crate::registration::{Constructor, Registration, ResolutionInfo};
use crate::Lifetime;
use std::sync::Arc;

/// What a rule says about one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Exclude,
    Weight(u32),
}

/// The request side of selection.
pub(crate) struct Query<'a> {
    pub(crate) info: ResolutionInfo<'a>,
    pub(crate) unnamed_resolves_named: bool,
    /// Collecting every match rather than picking one.
    pub(crate) enumerating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectionRule {
    /// Qualifier compatibility; an exact qualifier match weighs more. With
    /// `unnamed_resolves_named` any qualifier is compatible.
    Name,
    /// Named-scope registrations need their scope in the active chain.
    ScopeName,
    /// Conditional registrations need one holding condition and then outrank
    /// unconditional ones.
    Conditions,
}

impl SelectionRule {
    /// Evaluation order.
    pub(crate) const ALL: [SelectionRule; 3] = [
        SelectionRule::Name,
        SelectionRule::ScopeName,
        SelectionRule::Conditions,
    ];

    pub(crate) fn apply(&self, registration: &Registration, query: &Query<'_>) -> Verdict {
        match self {
            SelectionRule::Name => match (query.info.name, registration.name()) {
                (Some(requested), Some(own)) if requested == own => Verdict::Weight(1),
                (Some(_), Some(_)) if query.unnamed_resolves_named => Verdict::Weight(0),
                (Some(_), Some(_)) => Verdict::Exclude,
                (Some(_), None) | (None, None) => Verdict::Weight(0),
                (None, Some(_)) if query.enumerating || query.unnamed_resolves_named => {
                    Verdict::Weight(0)
                }
                (None, Some(_)) => Verdict::Exclude,
            },
            SelectionRule::ScopeName => match registration.lifetime() {
                Some(Lifetime::NamedScope(name)) => {
                    if query.info.scope_names.contains(name) {
                        Verdict::Weight(1)
                    } else {
                        Verdict::Exclude
                    }
                }
                _ => Verdict::Weight(0),
            },
            SelectionRule::Conditions => {
                if !registration.has_conditions() {
                    Verdict::Weight(0)
                } else if registration.conditions.iter().any(|c| c.holds(&query.info)) {
                    Verdict::Weight(1)
                } else {
                    Verdict::Exclude
                }
            }
        }
    }
}

/// Total weight of a candidate, `None` when a rule excludes it.
pub(crate) fn weigh(registration: &Registration, query: &Query<'_>) -> Option<u32> {
    SelectionRule::ALL
        .iter()
        .try_fold(0u32, |total, rule| match rule.apply(registration, query) {
            Verdict::Exclude => None,
            Verdict::Weight(weight) => Some(total + weight),
        })
}

/// The winning candidate: heaviest, then latest registered.
pub(crate) fn select<'r>(
    candidates: impl IntoIterator<Item = &'r Arc<Registration>>,
    query: &Query<'_>,
) -> Option<&'r Arc<Registration>> {
    candidates
        .into_iter()
        .filter_map(|r| weigh(r, query).map(|weight| (weight, r)))
        .max_by_key(|(weight, r)| (*weight, r.id()))
        .map(|(_, r)| r)
}

/// Every selectable candidate in the configured enumeration order.
pub(crate) fn select_all<'r>(
    candidates: impl IntoIterator<Item = &'r Arc<Registration>>,
    query: &Query<'_>,
    order: EnumerableOrder,
) -> Vec<&'r Arc<Registration>> {
    let mut selected: Vec<&Arc<Registration>> = candidates
        .into_iter()
        .filter(|r| weigh(r, query).is_some())
        .collect();
    selected.sort_by_key(|r| r.id());
    if order == EnumerableOrder::Reverse {
        selected.reverse();
    }
    selected
}

/// Decorators that apply to a request, innermost first.
///
/// Qualifiers do not restrict decorators; scope names and conditions do.
pub(crate) fn decorators<'r>(
    candidates: impl IntoIterator<Item = &'r Arc<Registration>>,
    query: &Query<'_>,
) -> Vec<&'r Arc<Registration>> {
    let mut applicable: Vec<&Arc<Registration>> = candidates
        .into_iter()
        .filter(|r| {
            [SelectionRule::ScopeName, SelectionRule::Conditions]
                .iter()
                .all(|rule| rule.apply(r, query) != Verdict::Exclude)
        })
        .collect();
    applicable.sort_by_key(|r| r.id());
    applicable
}

/// Order in which constructors are attempted.
///
/// While factory parameters are pending, constructors consuming at least one
/// of them come first; then parameter count decides per `selection`.
pub(crate) fn constructor_order(
    constructors: &[Constructor],
    selection: ConstructorSelection,
    pending: &[ServiceType],
) -> Vec<usize> {
    let consumes = |c: &Constructor| {
        c.params()
            .iter()
            .any(|p| pending.contains(p.request().service()))
    };
    let mut order: Vec<usize> = (0..constructors.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (&constructors[a], &constructors[b]);
        let by_params = match selection {
            ConstructorSelection::MostParameters => cb.params().len().cmp(&ca.params().len()),
            ConstructorSelection::LeastParameters => ca.params().len().cmp(&cb.params().len()),
        };
        consumes(cb).cmp(&consumes(ca)).then(by_params)
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::Condition;

    struct Parent;
    struct Other;

    fn info<'a>(
        service: &'a ServiceType,
        name: Option<&'a str>,
        parent: Option<&'a ServiceType>,
        scope_names: &'a [Arc<str>],
    ) -> ResolutionInfo<'a> {
        ResolutionInfo {
            service,
            name,
            parent,
            path: &[],
            markers: &[],
            scope_names,
        }
    }

    fn query(info: ResolutionInfo<'_>) -> Query<'_> {
        Query {
            info,
            unnamed_resolves_named: false,
            enumerating: false,
        }
    }

    #[test]
    fn test_name_rule() {
        let service = ServiceType::of::<u32>();
        let unnamed = Arc::new(Registration::instance(1u32));
        let primary = Arc::new(Registration::instance(2u32).named("primary"));
        let backup = Arc::new(Registration::instance(3u32).named("backup"));
        let all = [unnamed.clone(), primary.clone(), backup.clone()];

        let q = query(info(&service, Some("primary"), None, &[]));
        assert_eq!(select(&all, &q).unwrap().id(), primary.id());

        let q = query(info(&service, None, None, &[]));
        assert_eq!(select(&all, &q).unwrap().id(), unnamed.id());

        let only_named = [primary.clone(), backup.clone()];
        assert!(select(&only_named, &q).is_none());

        let q = Query {
            unnamed_resolves_named: true,
            ..query(info(&service, None, None, &[]))
        };
        assert_eq!(select(&only_named, &q).unwrap().id(), backup.id());
    }

    #[test]
    fn test_mismatched_qualifier_with_unnamed_resolves_named() {
        let service = ServiceType::of::<u32>();
        let primary = Arc::new(Registration::instance(2u32).named("primary"));
        let backup = Arc::new(Registration::instance(3u32).named("backup"));
        let all = [primary.clone(), backup.clone()];

        let strict = query(info(&service, Some("other"), None, &[]));
        assert!(select(&all, &strict).is_none());

        let lenient = Query {
            unnamed_resolves_named: true,
            ..query(info(&service, Some("other"), None, &[]))
        };
        assert_eq!(select(&all, &lenient).unwrap().id(), backup.id());

        // an exact match still outranks the later registration
        let exact = Query {
            unnamed_resolves_named: true,
            ..query(info(&service, Some("primary"), None, &[]))
        };
        assert_eq!(select(&all, &exact).unwrap().id(), primary.id());
    }

    #[test]
    fn test_last_registration_wins_ties() {
        let service = ServiceType::of::<u32>();
        let first = Arc::new(Registration::instance(1u32));
        let second = Arc::new(Registration::instance(2u32));
        let q = query(info(&service, None, None, &[]));
        assert_eq!(
            select([&first, &second], &q).unwrap().id(),
            second.id()
        );
        let ordered = select_all([&second, &first], &q, EnumerableOrder::Registration);
        assert_eq!(ordered[0].id(), first.id());
        let reversed = select_all([&first, &second], &q, EnumerableOrder::Reverse);
        assert_eq!(reversed[0].id(), second.id());
    }

    #[test]
    fn test_conditions_outrank_and_exclude() {
        let service = ServiceType::of::<u32>();
        let parent = ServiceType::of::<Parent>();
        let conditional =
            Arc::new(Registration::instance(1u32).when(Condition::injected_into::<Parent>()));
        let plain = Arc::new(Registration::instance(2u32));
        let all = [conditional.clone(), plain.clone()];

        let q = query(info(&service, None, Some(&parent), &[]));
        assert_eq!(select(&all, &q).unwrap().id(), conditional.id());

        let other = ServiceType::of::<Other>();
        let q = query(info(&service, None, Some(&other), &[]));
        assert_eq!(select(&all, &q).unwrap().id(), plain.id());
    }

    #[test]
    fn test_named_scope_rule() {
        let service = ServiceType::of::<u32>();
        let scoped = Arc::new(
            Registration::instance(1u32).with_lifetime(Lifetime::named_scope("request")),
        );
        let names: Vec<Arc<str>> = vec![Arc::from("request")];

        let q = query(info(&service, None, None, &names));
        assert!(select([&scoped], &q).is_some());

        let q = query(info(&service, None, None, &[]));
        assert!(select([&scoped], &q).is_none());
    }

    #[test]
    fn test_decorators_ignore_names_but_honor_conditions() {
        use crate::registration::Implementation;

        let service = ServiceType::of::<u32>();
        let parent = ServiceType::of::<Parent>();
        let first = Arc::new(Registration::decorator::<u32>(Implementation::instance(1u32)));
        let second =
            Arc::new(Registration::decorator::<u32>(Implementation::instance(2u32)).named("x"));
        let conditional = Arc::new(
            Registration::decorator::<u32>(Implementation::instance(3u32))
                .when(Condition::injected_into::<Other>()),
        );

        let q = query(info(&service, None, Some(&parent), &[]));
        let applied: Vec<_> = decorators([&conditional, &second, &first], &q)
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(applied, vec![first.id(), second.id()]);
    }

    #[test]
    fn test_constructor_order() {
        let ctors = vec![
            Constructor::from_fn(|_: ()| 0u64),
            Constructor::from_fn(|(a, _b): (Arc<u8>, Arc<u16>)| *a as u64),
            Constructor::from_fn(|b: Arc<u16>| *b as u64),
        ];
        assert_eq!(
            constructor_order(&ctors, ConstructorSelection::MostParameters, &[]),
            vec![1, 2, 0]
        );
        assert_eq!(
            constructor_order(&ctors, ConstructorSelection::LeastParameters, &[]),
            vec![0, 2, 1]
        );
        let pending = [ServiceType::of::<u16>()];
        assert_eq!(
            constructor_order(&ctors, ConstructorSelection::LeastParameters, &pending),
            vec![2, 1, 0]
        );
    }
}
