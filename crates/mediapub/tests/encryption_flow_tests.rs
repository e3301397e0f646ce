//! Encrypt-at-rest stage driven through the controller.

mod common;

use std::sync::Arc;

use common::*;

use mediapub::model::{JobFilter, JobState, JobType, Project};
use mediapub::publisher::{PublisherOptions, PublisherRegistry, RetryPolicy, STORYMAKER};
use mediapub::{AesGcmTransform, DataStore, EncryptRunner, EncryptionService, Runners};

const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn encrypting_registry() -> PublisherRegistry {
    PublisherRegistry::with_defaults(PublisherOptions {
        encrypt_at_rest: true,
        retry: RetryPolicy::no_retry(),
        ..PublisherOptions::default()
    })
}

fn transform() -> Arc<AesGcmTransform> {
    Arc::new(AesGcmTransform::from_hex_key(TEST_KEY).unwrap())
}

#[test]
fn test_rendered_file_is_encrypted_before_finish() {
    let media = tempfile::TempDir::new().unwrap();
    let transform = transform();
    let harness = TestHarness::with(
        encrypting_registry(),
        Runners::new()
            .with_render(render_to(media.path().to_path_buf(), b"rendered frames"))
            .with_upload(fixed("https://storymaker.example/v/1"))
            .with_encrypt(Arc::new(EncryptRunner::new(EncryptionService::new(
                transform.clone(),
            )))),
    );

    let pj = harness
        .controller
        .start_publish(&Project::new(5, "Tidal Notes"), vec![STORYMAKER.to_string()])
        .unwrap();
    let outcome = harness.listener.wait_for(&pj.id);
    assert!(outcome.is_success(), "unexpected outcome {:?}", outcome);

    let stored = harness.store.find_publish_job(&pj.id).unwrap().unwrap();
    let rendered = stored.rendered_file_paths(&*harness.store).unwrap();
    assert_eq!(rendered.len(), 1);

    let path = rendered[0].strip_prefix("file://").unwrap();
    let on_disk = std::fs::read(path).unwrap();
    assert_eq!(transform.decrypt(&on_disk).unwrap(), b"rendered frames");
    assert_eq!(std::fs::read_dir(media.path()).unwrap().count(), 1);

    let encrypt = stored
        .jobs(&*harness.store, &JobFilter::of_type(JobType::Encrypt))
        .unwrap()
        .remove(0);
    assert_eq!(encrypt.state(), JobState::Succeeded);
    assert_eq!(encrypt.result.as_deref(), Some(path));
}

#[test]
fn test_encryption_failure_aborts_and_keeps_original() {
    let media = tempfile::TempDir::new().unwrap();
    let original = media.path().join("keep.mp4");
    std::fs::write(&original, b"untouched").unwrap();
    let missing = media.path().join("missing.mp4");

    let harness = TestHarness::with(
        encrypting_registry(),
        Runners::new()
            .with_render(fixed(&format!("file://{}", missing.display())))
            .with_upload(fixed("https://storymaker.example/v/1"))
            .with_encrypt(Arc::new(EncryptRunner::new(EncryptionService::new(transform())))),
    );

    let pj = harness
        .controller
        .start_publish(&Project::new(6, "Salt Marsh"), vec![STORYMAKER.to_string()])
        .unwrap();

    match harness.listener.wait_for(&pj.id) {
        Outcome::Failed(_, reason) => assert!(reason.contains("encrypt"), "reason was {}", reason),
        other => panic!("unexpected outcome {:?}", other),
    }

    let encrypt = pj
        .jobs(&*harness.store, &JobFilter::of_type(JobType::Encrypt))
        .unwrap()
        .remove(0);
    assert_eq!(encrypt.state(), JobState::Failed);
    assert_eq!(encrypt.last_error.as_ref().map(|e| e.code), Some(3));

    assert_eq!(std::fs::read(&original).unwrap(), b"untouched");
    assert_eq!(std::fs::read_dir(media.path()).unwrap().count(), 1);
}
