//! Integration tests for the Tree Merger.

use std::collections::BTreeSet;
use std::path::PathBuf;

use addon_core::{Error, MergePolicy, Transfer, TreeMerger, merge};
use addon_test_utils::TestSite;
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Every path the merge created shows up in the record, and nothing else.
#[rstest]
#[case(Transfer::Move)]
#[case(Transfer::Copy)]
fn test_record_lists_every_created_path(#[case] transfer: Transfer) {
    let site = TestSite::new();
    site.write("src/a.txt", "a");
    site.write("src/nested/deep/b.txt", "b");
    site.write("src/nested/c.txt", "c");
    site.write("dest/existing/keep.txt", "keep");
    let before: BTreeSet<String> = site.snapshot("dest").into_keys().collect();

    let record = merge::merge(&site.path("src"), &site.path("dest"), MergePolicy::strict(transfer)).unwrap();

    let after: BTreeSet<String> = site.snapshot("dest").into_keys().collect();
    let added: BTreeSet<PathBuf> = after
        .difference(&before)
        .map(|rel| site.path(&format!("dest/{}", rel.trim_end_matches('/'))))
        .collect();
    let recorded: BTreeSet<PathBuf> = record
        .directories
        .iter()
        .cloned()
        .chain(record.files.iter().map(|f| f.path.clone()))
        .collect();
    assert_eq!(added, recorded);
    assert_eq!(record.overwritten_files().count(), 0);
    assert_eq!(transfer == Transfer::Move, !site.path("src").exists());
}

/// Rolling a record back restores the previous file set.
#[test]
fn test_rollback_restores_destination() {
    let site = TestSite::new();
    site.write("src/x/y.txt", "y");
    site.write("dest/keep.txt", "keep");
    let before = site.snapshot("dest");

    let record = merge::merge(
        &site.path("src"),
        &site.path("dest"),
        MergePolicy::strict(Transfer::Copy),
    )
    .unwrap();
    assert_eq!(record.rollback(), 2);
    assert_eq!(before, site.snapshot("dest"));
}

#[test]
fn test_empty_source_leaves_destination_untouched() {
    let site = TestSite::new();
    site.mkdir("src");
    site.write("dest/keep.txt", "keep");
    let before = site.snapshot("dest");

    let err = TreeMerger::new(MergePolicy::force(Transfer::Move))
        .merge(&site.path("src"), &site.path("dest"))
        .unwrap_err();
    assert!(matches!(err, Error::EmptySource(_)));
    assert_eq!(before, site.snapshot("dest"));
}

#[test]
fn test_strict_merge_refuses_before_writing() {
    let site = TestSite::new();
    site.write("src/a.txt", "new");
    site.write("src/b.txt", "new");
    site.write("dest/b.txt", "old");
    let before = site.snapshot("dest");

    let err = merge::merge(&site.path("src"), &site.path("dest"), MergePolicy::strict(Transfer::Move))
        .unwrap_err();
    assert!(matches!(err, Error::DestinationExists(ref paths) if paths == &vec![site.path("dest/b.txt")]));
    assert_eq!(before, site.snapshot("dest"));
    site.assert_file_exists("src/a.txt");
}
