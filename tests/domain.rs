use camino::Utf8PathBuf;

use bench_dataset_prep::domain::{
    ArchiveRole, CANONICAL_CSV, PatchKind, ProjectInventory,
};
use bench_dataset_prep::fs_util::{DirEntry, EntryKind};

fn entry(name: &str, kind: EntryKind) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        path: Utf8PathBuf::from("/p").join(name),
        kind,
    }
}

#[test]
fn mock_and_patch_archives_never_become_the_repository() {
    assert_eq!(ArchiveRole::classify("foo-mock.zip"), ArchiveRole::Excluded);
    assert_eq!(
        ArchiveRole::classify("patches_neg-x.zip"),
        ArchiveRole::PatchBundle(PatchKind::Neg)
    );
    assert_ne!(
        ArchiveRole::classify("patches_neg-x.zip"),
        ArchiveRole::MainRepository
    );
    assert_eq!(ArchiveRole::classify("patches_misc.zip"), ArchiveRole::Excluded);
}

#[test]
fn classification_is_case_sensitive() {
    assert_eq!(ArchiveRole::classify("repo.ZIP"), ArchiveRole::Excluded);
    assert_eq!(ArchiveRole::classify("Patches_neg-1.zip"), ArchiveRole::MainRepository);
}

#[test]
fn inventory_groups_and_sorts_by_role() {
    let entries = vec![
        entry("repo-b.zip", EntryKind::File),
        entry("patches_pos-2.zip", EntryKind::File),
        entry("repo-a.zip", EntryKind::File),
        entry("repo-a-mock.zip", EntryKind::File),
        entry("patches_neg-1.zip", EntryKind::File),
        entry("states.csv", EntryKind::File),
        entry(CANONICAL_CSV, EntryKind::File),
        entry("._states.csv", EntryKind::File),
        entry("project_repo", EntryKind::Dir),
        entry("linked.zip", EntryKind::Symlink),
    ];

    let inventory = ProjectInventory::from_entries(&entries);

    assert_eq!(inventory.csv_files, vec![CANONICAL_CSV, "states.csv"]);
    assert_eq!(inventory.pending_csv().collect::<Vec<_>>(), vec!["states.csv"]);
    assert_eq!(inventory.patches(PatchKind::Neg), ["patches_neg-1.zip"]);
    assert_eq!(inventory.patches(PatchKind::Pos), ["patches_pos-2.zip"]);
    assert_eq!(
        inventory.repositories,
        vec!["linked.zip", "repo-a.zip", "repo-b.zip"]
    );
    assert_eq!(inventory.excluded, vec!["._states.csv", "repo-a-mock.zip"]);
}

#[test]
fn patch_kind_names() {
    assert_eq!(PatchKind::Neg.dir_name(), "patches_neg");
    assert_eq!(PatchKind::Pos.dir_name(), "patches_pos");
    assert_eq!("pos".parse::<PatchKind>().unwrap(), PatchKind::Pos);
    assert!("other".parse::<PatchKind>().is_err());
}
