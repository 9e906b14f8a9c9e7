//! Property tests for virtual path helpers.

use proptest::prelude::*;
use quill_vfs::path::{ancestors, combine, normalize, parent, strip_extension};

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,8}(\\.[a-z]{1,4})?"
}

fn virtual_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..6).prop_map(|parts| parts.join("/"))
}

proptest! {
    #[test]
    fn normalize_is_idempotent(raw in "[a-z./\\\\]{0,24}") {
        let once = normalize(&raw);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.starts_with('/'));
        prop_assert!(!once.contains("//"));
    }

    #[test]
    fn clean_paths_are_unchanged(path in virtual_path()) {
        prop_assert_eq!(normalize(&path), path);
    }

    #[test]
    fn ancestors_end_at_root(path in virtual_path()) {
        let dirs: Vec<&str> = ancestors(&path).collect();
        prop_assert_eq!(dirs.first().copied(), Some(path.as_str()));
        prop_assert_eq!(dirs.last().copied(), Some(""));

        let depth = path.split('/').filter(|s| !s.is_empty()).count();
        prop_assert_eq!(dirs.len(), depth + 1);

        for pair in dirs.windows(2) {
            prop_assert_eq!(parent(pair[0]), pair[1]);
        }
    }

    #[test]
    fn combine_with_parent_restores_path(dir in virtual_path(), name in segment()) {
        let joined = combine(&dir, &name);
        prop_assert_eq!(parent(&joined), dir.as_str());
    }

    #[test]
    fn strip_extension_only_touches_last_segment(dir in virtual_path(), name in "[a-z]{1,8}") {
        let with_ext = combine(&dir, &format!("{}.html", name));
        let expected = combine(&dir, &name);
        prop_assert_eq!(strip_extension(&with_ext), expected.as_str());
    }
}
