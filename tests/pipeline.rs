mod common;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use bench_dataset_prep::error::PrepError;
use bench_dataset_prep::fs_util::{Filesystem, MemoryFilesystem, OsFilesystem};
use bench_dataset_prep::output::JsonOutput;
use bench_dataset_prep::pipeline::{DatasetPipeline, InputKind, RunOptions, RunOutcome};

use common::{names, write_file, write_zip, zip_bytes};

fn alpha_beta_dataset() -> Vec<u8> {
    let patches = zip_bytes(&[("wrap/", b""), ("wrap/t1.diff", b"diff --git a b")]);
    let repo = zip_bytes(&[
        ("repo-Alpha/", b""),
        ("repo-Alpha/pom.xml", b"<project/>"),
        ("repo-Alpha/src/Main.java", b"class Main {}"),
    ]);
    let mock = zip_bytes(&[("mock-only.txt", b"mock")]);
    let beta_repo = zip_bytes(&[("README.md", b"beta"), ("src/lib.rs", b"")]);
    zip_bytes(&[
        ("Alpha/", b""),
        ("Alpha/data.csv", b"ticket\nA-1\n"),
        ("Alpha/patches_neg-1.zip", &patches),
        ("Alpha/repo-Alpha.zip", &repo),
        ("Alpha/repo-Alpha-mock.zip", &mock),
        ("Beta/", b""),
        ("Beta/states.csv", b"ticket\nB-1\n"),
        ("Beta/beta.zip", &beta_repo),
        ("__MACOSX/", b""),
        ("__MACOSX/Alpha/._data.csv", b""),
    ])
}

fn pipeline(fs: &MemoryFilesystem) -> DatasetPipeline<MemoryFilesystem> {
    DatasetPipeline::new(fs.clone(), RunOptions::default())
}

#[test]
fn end_to_end_from_container() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/work/dataset.zip", &alpha_beta_dataset());

    let report = pipeline(&fs)
        .run(
            Utf8Path::new("/work/dataset.zip"),
            Utf8Path::new("/work/dataset"),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Normalized);
    assert_eq!(report.input_kind, InputKind::Container);
    assert_eq!(names(&fs, "/work/dataset"), vec!["Alpha", "Beta"]);
    assert!(fs.exists(Utf8Path::new("/work/dataset/Alpha/pr_states.csv")));
    assert!(!fs.exists(Utf8Path::new("/work/dataset/Alpha/data.csv")));
    assert_eq!(
        fs.read(Utf8Path::new("/work/dataset/Alpha/patches_neg/t1.diff"))
            .unwrap(),
        b"diff --git a b"
    );
    assert_eq!(
        names(&fs, "/work/dataset/Alpha/project_repo"),
        vec!["pom.xml", "src"]
    );
    assert!(!fs.exists(Utf8Path::new(
        "/work/dataset/Alpha/project_repo/mock-only.txt"
    )));
    assert_eq!(
        names(&fs, "/work/dataset/Beta/project_repo"),
        vec!["README.md", "src"]
    );
    assert_eq!(report.failed_projects(), 0);
    let alpha = report.project("Alpha").unwrap();
    assert_eq!(alpha.inventory.excluded, vec!["repo-Alpha-mock.zip"]);
}

#[test]
fn second_run_changes_nothing() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/work/dataset.zip", &alpha_beta_dataset());
    let pipeline = pipeline(&fs);
    let input = Utf8Path::new("/work/dataset.zip");
    let root = Utf8Path::new("/work/dataset");

    pipeline.run(input, root, &JsonOutput).unwrap();
    let after_first = fs.snapshot().unwrap();
    let second = pipeline.run(input, root, &JsonOutput).unwrap();

    assert_eq!(second.outcome, RunOutcome::AlreadyNormalized);
    assert!(second.projects.is_empty());
    assert_eq!(fs.snapshot().unwrap(), after_first);
}

#[test]
fn corrupt_archive_in_one_project_does_not_stop_the_others() {
    let fs = MemoryFilesystem::new();
    for project in ["One", "Three"] {
        write_file(&fs, &format!("/ds/{project}/data.csv"), b"x");
        write_zip(
            &fs,
            &format!("/ds/{project}/patches_pos-1.zip"),
            &[("p.diff", b"p")],
        );
        write_zip(&fs, &format!("/ds/{project}/repo.zip"), &[("pom.xml", b"")]);
    }
    write_file(&fs, "/ds/Two/data.csv", b"x");
    write_file(&fs, "/ds/Two/patches_neg-1.zip", b"PK\x03\x04 broken");
    write_zip(&fs, "/ds/Two/repo.zip", &[("pom.xml", b"")]);

    let report = DatasetPipeline::new(
        fs.clone(),
        RunOptions {
            force: true,
            toolchain: None,
        },
    )
    .run(Utf8Path::new("/ds"), Utf8Path::new("/unused"), &JsonOutput)
    .unwrap();

    assert_eq!(report.projects.len(), 3);
    assert_eq!(report.failed_projects(), 1);
    assert!(report.project("Two").unwrap().has_failures());
    for project in ["One", "Three"] {
        assert_eq!(
            names(&fs, &format!("/ds/{project}")),
            vec!["patches_pos", "patches_pos-1.zip", "pr_states.csv", "project_repo", "repo.zip"]
        );
    }
    assert!(fs.exists(Utf8Path::new("/ds/Two/project_repo/pom.xml")));
    assert!(!fs.exists(Utf8Path::new("/ds/Two/patches_neg")));
}

#[test]
fn invalid_container_aborts_before_touching_the_root() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/work/dataset.zip", b"not a zip");

    let err = pipeline(&fs)
        .run(
            Utf8Path::new("/work/dataset.zip"),
            Utf8Path::new("/work/dataset"),
            &JsonOutput,
        )
        .unwrap_err();

    assert_matches!(err, PrepError::InvalidContainer { .. });
    assert!(!fs.exists(Utf8Path::new("/work/dataset")));
}

#[test]
fn input_that_is_neither_container_nor_directory_is_a_usage_error() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/work/notes.txt", b"hello");

    let missing = pipeline(&fs)
        .run(Utf8Path::new("/work/missing.zip"), Utf8Path::new("/work/ds"), &JsonOutput)
        .unwrap_err();
    let not_zip = pipeline(&fs)
        .run(Utf8Path::new("/work/notes.txt"), Utf8Path::new("/work/ds"), &JsonOutput)
        .unwrap_err();

    assert_matches!(missing, PrepError::Usage(_));
    assert_matches!(not_zip, PrepError::Usage(_));
}

#[test]
fn populated_directory_short_circuits_unless_forced() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/ds/P/dataset.csv", b"x");
    let before = fs.snapshot().unwrap();

    let report = pipeline(&fs)
        .run(Utf8Path::new("/ds"), Utf8Path::new("/ignored"), &JsonOutput)
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::AlreadyNormalized);
    assert_eq!(report.dataset_root, Utf8PathBuf::from("/ds"));
    assert_eq!(fs.snapshot().unwrap(), before);

    let forced = DatasetPipeline::new(
        fs.clone(),
        RunOptions {
            force: true,
            toolchain: None,
        },
    )
    .run(Utf8Path::new("/ds"), Utf8Path::new("/ignored"), &JsonOutput)
    .unwrap();
    assert_eq!(forced.outcome, RunOutcome::Normalized);
    assert_eq!(names(&fs, "/ds/P"), vec!["pr_states.csv"]);
}

#[test]
fn empty_directory_runs_with_no_projects() {
    let fs = MemoryFilesystem::new();
    fs.create_dir_all(Utf8Path::new("/ds")).unwrap();

    let report = pipeline(&fs)
        .run(Utf8Path::new("/ds"), Utf8Path::new("/ds"), &JsonOutput)
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Normalized);
    assert_eq!(report.input_kind, InputKind::Directory);
    assert!(report.projects.is_empty());
}

#[test]
fn forced_container_run_re_extracts() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/work/dataset.zip", &alpha_beta_dataset());
    write_file(&fs, "/work/dataset/Leftover/data.csv", b"old");

    let report = DatasetPipeline::new(
        fs.clone(),
        RunOptions {
            force: true,
            toolchain: None,
        },
    )
    .run(
        Utf8Path::new("/work/dataset.zip"),
        Utf8Path::new("/work/dataset"),
        &JsonOutput,
    )
    .unwrap();

    assert_eq!(report.projects.len(), 2);
    assert_eq!(names(&fs, "/work/dataset"), vec!["Alpha", "Beta"]);
}

#[test]
fn forced_run_refuses_a_container_inside_the_root() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/ds/dataset.zip", &alpha_beta_dataset());
    write_file(&fs, "/ds/Old/keep.txt", b"keep");
    let before = fs.snapshot().unwrap();
    let forced = DatasetPipeline::new(
        fs.clone(),
        RunOptions {
            force: true,
            toolchain: None,
        },
    );

    let err = forced
        .run(Utf8Path::new("/ds/dataset.zip"), Utf8Path::new("/ds"), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, PrepError::Usage(_));
    let err = forced
        .run(Utf8Path::new("/ds/dataset.zip"), Utf8Path::new("/ds/."), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, PrepError::Usage(_));

    assert_eq!(fs.snapshot().unwrap(), before);
}

#[test]
fn linked_projects_are_followed_and_dot_directories_skipped() {
    let fs = MemoryFilesystem::new();
    write_file(&fs, "/real/P/data.csv", b"ticket\n");
    write_file(&fs, "/ds/.git/config.csv", b"not a project");
    fs.symlink_dir(Utf8Path::new("/real/P"), Utf8Path::new("/ds/P"))
        .unwrap();

    let report = DatasetPipeline::new(
        fs.clone(),
        RunOptions {
            force: true,
            toolchain: None,
        },
    )
    .run(Utf8Path::new("/ds"), Utf8Path::new("/ds"), &JsonOutput)
    .unwrap();

    assert_eq!(report.projects.len(), 1);
    assert!(report.project("P").is_some());
    assert_eq!(names(&fs, "/real/P"), vec!["pr_states.csv"]);
    assert_eq!(names(&fs, "/ds/.git"), vec!["config.csv"]);
}

#[test]
fn end_to_end_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let input = root.join("dataset.zip");
    std::fs::write(input.as_std_path(), alpha_beta_dataset()).unwrap();
    let dataset = root.join("dataset");

    let pipeline = DatasetPipeline::new(OsFilesystem, RunOptions::default());
    let report = pipeline.run(&input, &dataset, &JsonOutput).unwrap();

    assert_eq!(report.outcome, RunOutcome::Normalized);
    assert!(dataset.join("Alpha/pr_states.csv").as_std_path().is_file());
    assert!(dataset.join("Alpha/patches_neg/t1.diff").as_std_path().is_file());
    assert!(dataset.join("Alpha/project_repo/pom.xml").as_std_path().is_file());
    assert!(dataset.join("Beta/project_repo/src/lib.rs").as_std_path().is_file());
    assert!(!dataset.join("__MACOSX").as_std_path().exists());

    let again = pipeline.run(&input, &dataset, &JsonOutput).unwrap();
    assert_eq!(again.outcome, RunOutcome::AlreadyNormalized);
}
