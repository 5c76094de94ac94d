//! Integration coverage for the parts of the build pipeline that don't
//! require external child processes: navigation-snippet injection
//! followed by atomic publication, and the publication store's
//! filesystem layout and cleanup operations.

use docsmith::domain::{RefKind, TrackedTarget};
use docsmith::executor::snippet;
use docsmith::executor::publish;
use docsmith::publish_store::PublicationPaths;

fn sample_target() -> TrackedTarget {
    TrackedTarget {
        id: 1,
        repo_id: 1,
        ref_kind: RefKind::Branch,
        ref_name: "main".into(),
        auto_build: true,
        env_manager_override: None,
        last_built_commit: None,
        latest_successful_build_id: None,
    }
}

#[tokio::test]
async fn snippet_injection_then_publish_round_trips_to_a_served_artifact() {
    let data_dir = tempfile::tempdir().unwrap();
    let paths = PublicationPaths::new(data_dir.path().to_path_buf());
    let target = sample_target();
    let build_id = docsmith::domain::BuildId::new_v4();

    let out_dir = paths.workspace_dir(1, &target, build_id).join("out");
    tokio::fs::create_dir_all(out_dir.join("api")).await.unwrap();
    tokio::fs::write(out_dir.join("index.html"), "<html><body>hi</body></html>").await.unwrap();
    tokio::fs::write(out_dir.join("api").join("module.html"), "<html><body>api</body></html>").await.unwrap();
    tokio::fs::write(out_dir.join("raw.txt"), "not html").await.unwrap();

    let injected = snippet::inject_into_tree(&out_dir, 1, &target, "1.0.0").await.unwrap();
    assert_eq!(injected, 2);

    let artifact_dir = paths.artifact_dir(1, &target);
    let staging_dir = paths.artifact_staging_dir(1, &target, build_id);
    publish::swap_in(&out_dir, &staging_dir, &artifact_dir).await.unwrap();

    let served = tokio::fs::read_to_string(artifact_dir.join("index.html")).await.unwrap();
    assert!(served.contains("__DOCSMITH_TARGET_SLUG"));
    assert!(served.contains("branch-main"));
    assert!(!out_dir.exists());
    assert!(!staging_dir.exists());
}

#[tokio::test]
async fn a_failed_publish_leaves_the_prior_artifact_untouched() {
    let data_dir = tempfile::tempdir().unwrap();
    let paths = PublicationPaths::new(data_dir.path().to_path_buf());
    let target = sample_target();

    let artifact_dir = paths.artifact_dir(1, &target);
    tokio::fs::create_dir_all(&artifact_dir).await.unwrap();
    tokio::fs::write(artifact_dir.join("index.html"), "previous good build").await.unwrap();

    // `out_dir` does not exist: the rename in `swap_in` must fail before
    // anything about the existing artifact is touched.
    let missing_out = data_dir.path().join("does-not-exist");
    let staging_dir = paths.artifact_staging_dir(1, &target, docsmith::domain::BuildId::new_v4());
    let result = publish::swap_in(&missing_out, &staging_dir, &artifact_dir).await;

    assert!(result.is_err());
    let contents = tokio::fs::read_to_string(artifact_dir.join("index.html")).await.unwrap();
    assert_eq!(contents, "previous good build");
}

#[tokio::test]
async fn deleting_a_target_artifact_and_purging_a_repository_both_remove_their_trees() {
    let data_dir = tempfile::tempdir().unwrap();
    let paths = PublicationPaths::new(data_dir.path().to_path_buf());
    let target = sample_target();

    let artifact_dir = paths.artifact_dir(1, &target);
    tokio::fs::create_dir_all(&artifact_dir).await.unwrap();
    tokio::fs::write(artifact_dir.join("index.html"), "x").await.unwrap();

    let workspace = paths.workspace_dir(1, &target, docsmith::domain::BuildId::new_v4());
    tokio::fs::create_dir_all(&workspace).await.unwrap();

    paths.delete_artifact(1, &target).await.unwrap();
    assert!(!artifact_dir.exists());
    assert!(workspace.exists());

    paths.purge_repository(1).await.unwrap();
    assert!(!workspace.exists());
    assert!(!paths.data_dir().join("repos").join("1").exists());
}
