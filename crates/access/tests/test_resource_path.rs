use access::{AccessError, ResourcePath, Selector};
use proptest::prelude::*;
use rstest::rstest;

#[rstest]
#[case("doc/42", "doc", Selector::Uid("42".into()))]
#[case("doc/*", "doc", Selector::Wildcard)]
#[case("user/a-b_c.d", "user", Selector::Uid("a-b_c.d".into()))]
#[case("doc/[ownerUid=u1]", "doc", Selector::Filter { attribute: "ownerUid".into(), value: "u1".into() })]
#[case("doc/[ownerUid=\"u1\"]", "doc", Selector::Filter { attribute: "ownerUid".into(), value: "u1".into() })]
#[case("doc/[a=b=c]", "doc", Selector::Filter { attribute: "a".into(), value: "b=c".into() })]
#[case("doc/nested/uid", "doc", Selector::Uid("nested/uid".into()))]
fn test_valid_paths_parse(#[case] input: &str, #[case] resource_type: &str, #[case] selector: Selector) {
    let path = ResourcePath::parse(input).unwrap();
    assert_eq!(path.resource_type(), resource_type);
    assert_eq!(path.selector(), &selector);
    assert_eq!(path.path(), input);
}

#[rstest]
#[case("doc")]
#[case("")]
#[case("/42")]
#[case("doc/")]
#[case("doc/[ownerUid]")]
#[case("doc/[=u1]")]
#[case("doc/[ownerUid=]")]
#[case("doc/[owner Uid=u1]")]
#[case("doc/ownerUid=u1]")]
#[case("doc/[ownerUid=u1")]
#[case("doc/x[y]")]
fn test_malformed_paths_fail(#[case] input: &str) {
    let err = ResourcePath::parse(input).unwrap_err();
    assert!(matches!(err, AccessError::MalformedResourcePath { ref path } if path == input));
    assert_eq!(err.status_code(), 400);
}

fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,16}"
}

proptest! {
    #[test]
    fn test_uid_paths_reproduce_their_parts(t in segment(), u in segment()) {
        let path = ResourcePath::parse(&format!("{t}/{u}")).unwrap();
        prop_assert_eq!(path.resource_type(), t.as_str());
        prop_assert_eq!(path.uid(), Some(u.as_str()));
        prop_assert!(!path.is_wildcard());
        prop_assert!(path.filter().is_none());
    }

    #[test]
    fn test_wildcard_paths_reproduce_their_parts(t in segment()) {
        let path = ResourcePath::parse(&format!("{t}/*")).unwrap();
        prop_assert_eq!(path.resource_type(), t.as_str());
        prop_assert!(path.is_wildcard());
        prop_assert!(path.uid().is_none());
    }

    #[test]
    fn test_filter_paths_reproduce_their_parts(t in segment(), a in segment(), v in segment()) {
        let path = ResourcePath::parse(&format!("{t}/[{a}={v}]")).unwrap();
        prop_assert_eq!(path.resource_type(), t.as_str());
        prop_assert_eq!(path.filter(), Some((a.as_str(), v.as_str())));
        prop_assert!(path.uid().is_none());
    }

    #[test]
    fn test_strings_without_separator_always_fail(s in "[A-Za-z0-9_.*\\[\\]=-]{0,24}") {
        prop_assert!(ResourcePath::parse(&s).is_err());
    }

    #[test]
    fn test_unbalanced_brackets_always_fail(t in segment(), a in segment(), v in segment()) {
        let open_only = format!("{t}/[{a}={v}");
        let close_only = format!("{t}/{a}={v}]");
        prop_assert!(ResourcePath::parse(&open_only).is_err());
        prop_assert!(ResourcePath::parse(&close_only).is_err());
    }
}
