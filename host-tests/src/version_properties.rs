use ota_core::{compare, VersionOrdering};
use proptest::prelude::*;

#[test]
fn test_documented_orderings() {
    assert_eq!(compare("1.2.3", "1.2.10"), VersionOrdering::Older);
    assert_eq!(compare("1.0", "1.0.0"), VersionOrdering::Same);
    assert_eq!(compare("abc", "1.0.0"), VersionOrdering::Invalid);
    assert_eq!(compare("", "1.0.0"), VersionOrdering::Invalid);
    assert_eq!(compare("2.0.0", "1.9.9"), VersionOrdering::Newer);
}

#[test]
fn test_extra_segments_do_not_fault() {
    assert_eq!(compare("1.2.3.4", "1.2.3"), VersionOrdering::Same);
    assert_eq!(compare("1..2", "1.0.0"), VersionOrdering::Same);
    assert_eq!(compare("99999999999999999999", "1.0.0"), VersionOrdering::Invalid);
}

fn version() -> impl Strategy<Value = String> {
    (0u32..50, 0u32..50, proptest::option::of(0u32..50)).prop_map(|(major, minor, patch)| {
        match patch {
            Some(patch) => format!("{major}.{minor}.{patch}"),
            None => format!("{major}.{minor}"),
        }
    })
}

proptest! {
    #[test]
    fn well_formed_versions_are_antisymmetric(a in version(), b in version()) {
        let forward = compare(&a, &b);
        let backward = compare(&b, &a);
        prop_assert_ne!(forward, VersionOrdering::Invalid);
        prop_assert_eq!(forward == VersionOrdering::Newer, backward == VersionOrdering::Older);
        prop_assert_eq!(forward == VersionOrdering::Same, backward == VersionOrdering::Same);
    }

    #[test]
    fn well_formed_versions_equal_themselves(a in version()) {
        prop_assert_eq!(compare(&a, &a), VersionOrdering::Same);
    }
}
