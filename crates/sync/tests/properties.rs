//! Planner invariants over generated desired/live states.

#![forbid(unsafe_code)]

use proptest::prelude::*;
use tern_core::{NamespaceWhitelist, Policy, PolicySet, Resource, ResourceMap, SyncAction};
use tern_sync::{plan, plan_apply, plan_delete};

const NAMESPACES: &[&str] = &["", "ns1", "ns2", "ns3"];
const KINDS: &[&str] = &["Service", "Deployment"];
const NAMES: &[&str] = &["a", "b", "c"];

fn resource() -> impl Strategy<Value = Resource> {
    (
        prop::sample::select(NAMESPACES),
        prop::sample::select(KINDS),
        prop::sample::select(NAMES),
        any::<bool>(),
        0u8..2,
    )
        .prop_map(|(ns, kind, name, ignore, rev)| {
            let policy: PolicySet = if ignore { [Policy::IGNORE].into_iter().collect() } else { PolicySet::new() };
            let kind = if ns.is_empty() { "Namespace" } else { kind };
            Resource::new(kind, ns, name, policy, format!("{}/{}/{} rev{}", ns, kind, name, rev))
        })
}

fn resource_map() -> impl Strategy<Value = ResourceMap> {
    prop::collection::vec(resource(), 0..12).prop_map(|v| v.into_iter().map(|r| (r.id().clone(), r)).collect())
}

fn whitelist() -> impl Strategy<Value = NamespaceWhitelist> {
    prop::collection::vec(prop::sample::select(&NAMESPACES[1..]), 0..3).prop_map(|v| v.into_iter().collect())
}

fn ignored(r: &Resource) -> bool { r.policy().contains(&Policy::IGNORE) }

proptest! {
    /// An empty desired state never deletes anything.
    #[test]
    fn empty_desired_never_deletes(live in resource_map(), wl in whitelist()) {
        let desired = ResourceMap::new();
        for res in live.values() {
            prop_assert_eq!(plan_delete(true, res, &desired, &wl), None);
        }
        prop_assert_eq!(plan(&desired, &live, true, &wl).deletes().count(), 0);
    }

    #[test]
    fn ignored_is_never_deleted(res in resource(), desired in resource_map(), wl in whitelist()) {
        prop_assume!(ignored(&res));
        prop_assert_eq!(plan_delete(desired.is_empty(), &res, &desired, &wl), None);
    }

    #[test]
    fn ignored_is_never_applied(res in resource(), live in resource_map(), wl in whitelist()) {
        let live_ignored = live.get(res.id()).map(ignored).unwrap_or(false);
        if ignored(&res) || live_ignored {
            prop_assert_eq!(plan_apply(&live, &res, &wl), None);
        }
    }

    /// A non-empty whitelist only ever removes decisions about out-of-scope namespaces.
    #[test]
    fn namespace_scoping_is_symmetric(res in resource(), live in resource_map(), desired in resource_map(), wl in whitelist()) {
        prop_assume!(!wl.is_empty());
        let open = NamespaceWhitelist::unrestricted();
        let scoped_delete = plan_delete(desired.is_empty(), &res, &desired, &wl);
        let scoped_apply = plan_apply(&live, &res, &wl);
        if wl.in_scope(res.namespace()) {
            prop_assert_eq!(scoped_delete, plan_delete(desired.is_empty(), &res, &desired, &open));
            prop_assert_eq!(scoped_apply, plan_apply(&live, &res, &open));
        } else {
            prop_assert_eq!(scoped_delete, None);
            prop_assert_eq!(scoped_apply, None);
        }
    }

    #[test]
    fn plan_is_the_complement(live in resource_map(), desired in resource_map()) {
        prop_assume!(!desired.is_empty());
        let def = plan(&desired, &live, true, &NamespaceWhitelist::unrestricted());

        let want_deletes: Vec<_> = live.values()
            .filter(|r| !desired.contains_key(r.id()) && !ignored(r))
            .cloned()
            .collect();
        let want_applies: Vec<_> = desired.values()
            .filter(|r| !ignored(r))
            .filter(|r| match live.get(r.id()) {
                None => true,
                Some(l) => !ignored(l) && l.bytes() != r.bytes(),
            })
            .cloned()
            .collect();

        let want: Vec<_> = want_deletes.into_iter().map(SyncAction::Delete)
            .chain(want_applies.into_iter().map(SyncAction::Apply))
            .collect();
        prop_assert_eq!(def.actions, want);
    }

    #[test]
    fn identical_states_plan_nothing(state in resource_map()) {
        let state: ResourceMap = state.into_iter().filter(|(_, r)| !ignored(r)).collect();
        let def = plan(&state, &state.clone(), true, &NamespaceWhitelist::unrestricted());
        prop_assert!(def.is_empty());
    }

    #[test]
    fn deletes_disabled_plans_no_deletes(live in resource_map(), desired in resource_map(), wl in whitelist()) {
        let def = plan(&desired, &live, false, &wl);
        prop_assert_eq!(def.deletes().count(), 0);
    }
}
