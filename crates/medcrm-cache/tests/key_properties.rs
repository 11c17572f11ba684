//! Property tests for key construction, tenant isolation and policy lookup

use medcrm_cache::keys::{
    belongs_to_tenant, build_domain_pattern, build_key, build_tenant_pattern, classify,
    extract_tenant_id, ClinicId, Domain, KeyScope,
};
use medcrm_cache::pattern::glob_match;
use medcrm_cache::PolicyTable;
use proptest::prelude::*;

fn clinic_strategy() -> impl Strategy<Value = ClinicId> {
    (1i64..=i64::MAX).prop_map(|id| ClinicId::new(id).expect("positive id"))
}

fn domain_strategy() -> impl Strategy<Value = Domain> {
    prop::sample::select(Domain::ALL.to_vec())
}

/// Qualifiers including separators, glob characters and non-ASCII text
fn qualifiers_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![
            "[a-z0-9_]{1,12}",
            "[a-z:*?\\[\\]%\\\\ ]{0,8}",
            any::<String>(),
        ],
        0..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_build_key_is_deterministic(
        clinic in clinic_strategy(),
        domain in domain_strategy(),
        qualifiers in qualifiers_strategy(),
    ) {
        prop_assert_eq!(
            build_key(clinic, domain, &qualifiers),
            build_key(clinic, domain, &qualifiers)
        );
    }

    #[test]
    fn prop_keys_never_cross_tenants(
        a in clinic_strategy(),
        b in clinic_strategy(),
        domain in domain_strategy(),
        qualifiers in qualifiers_strategy(),
    ) {
        let key = build_key(a, domain, &qualifiers);

        prop_assert_eq!(extract_tenant_id(&key), Some(a.get()));
        prop_assert_eq!(classify(&key), KeyScope::Tenant(a.get()));
        prop_assert!(belongs_to_tenant(&key, a));
        if a != b {
            prop_assert!(!belongs_to_tenant(&key, b));
            prop_assert!(!glob_match(&build_tenant_pattern(b), &key));
            prop_assert!(!glob_match(&build_domain_pattern(b, domain), &key));
        }
    }

    #[test]
    fn prop_patterns_contain_their_keys(
        clinic in clinic_strategy(),
        domain in domain_strategy(),
        other in domain_strategy(),
        qualifiers in qualifiers_strategy(),
    ) {
        let key = build_key(clinic, domain, &qualifiers);

        prop_assert!(glob_match(&build_domain_pattern(clinic, domain), &key));
        prop_assert!(glob_match(&build_tenant_pattern(clinic), &key));
        if other != domain {
            prop_assert!(!glob_match(&build_domain_pattern(clinic, other), &key));
        }
    }

    #[test]
    fn prop_qualifiers_cannot_add_segments(
        clinic in clinic_strategy(),
        domain in domain_strategy(),
        qualifiers in qualifiers_strategy(),
    ) {
        let key = build_key(clinic, domain, &qualifiers);
        prop_assert_eq!(key.split(':').count(), 2 + qualifiers.len());
    }

    #[test]
    fn prop_policy_lookup_never_fails(name in any::<String>()) {
        let table = PolicyTable::default();
        let policy = table.policy(&name);
        prop_assert!(policy.ttl_secs > 0);
    }
}

#[test]
fn scenario_contacts_list_key() {
    let clinic = ClinicId::new(42).unwrap();
    assert_eq!(
        build_key(clinic, Domain::Contacts, ["list", "page_2"]),
        "clinic_42:contacts:list:page_2"
    );
}

#[test]
fn scenario_appointments_policy() {
    let table = PolicyTable::default();
    assert_eq!(table.policy("appointments").ttl_secs, 120);
    assert!(table.should_invalidate(Domain::Appointments, "reschedule"));
    assert!(!table.should_invalidate(Domain::Appointments, "read"));
}

#[test]
fn scenario_kill_switch_disables_every_domain() {
    let table = PolicyTable::with_defaults(false);
    for domain in Domain::ALL {
        assert!(table.policy_for(domain).enabled);
        assert!(!table.is_enabled(domain));
    }
    assert!(table.enabled_domains().is_empty());
}
