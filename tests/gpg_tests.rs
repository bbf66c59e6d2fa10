// GPG verification with a scripted gpg and file:// signatures

mod test_helpers;

use hopper::dependent::{Dependent, GpgSpec};
use hopper::gpg::{GpgState, GpgVerifier, SIGNATURE_FILE};
use hopper::metadata::MetadataStore;
use std::path::PathBuf;
use test_helpers::{ScriptedRunner, TestEnvironment};

struct Fixture {
    env: TestEnvironment,
    artifact: PathBuf,
    signature_source: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let env = TestEnvironment::new();
        let artifact = env.sources.join("widget-1.0.tar.gz");
        std::fs::write(&artifact, b"payload").unwrap();
        let signature_source = env.sources.join("widget-1.0.tar.gz.asc");
        std::fs::write(&signature_source, b"-----BEGIN PGP SIGNATURE-----").unwrap();
        Self {
            env,
            artifact,
            signature_source,
        }
    }

    fn signed(&self, version: &str) -> Dependent {
        let mut dep = Dependent::new("widget", version);
        dep.gpg = Some(GpgSpec {
            signature: TestEnvironment::file_url(&self.signature_source),
            key_id: Some("0xDEADBEEF".into()),
            key_url: None,
        });
        dep
    }

    fn metadata(&self) -> MetadataStore {
        MetadataStore::new(self.env.cellar.clone())
    }

    fn verifier(&self, dep: &Dependent, runner: &std::sync::Arc<ScriptedRunner>, force: bool) -> GpgVerifier {
        GpgVerifier::new(dep, &self.artifact, self.metadata(), runner.clone(), force)
    }
}

#[tokio::test]
async fn test_no_signing_metadata_runs_nothing() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new().with_program("gpg").into_arc();
    let dep = Dependent::new("widget", "1.0");

    let mut verifier = fx.verifier(&dep, &runner, false);
    assert_eq!(verifier.state(), GpgState::Pending);
    assert_eq!(verifier.verify().await.unwrap(), GpgState::NotApplicable);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_missing_gpg_binary_is_not_applicable() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new().into_arc();
    let dep = fx.signed("1.0");

    let mut verifier = fx.verifier(&dep, &runner, false);
    assert_eq!(verifier.verify().await.unwrap(), GpgState::NotApplicable);
    assert!(runner.calls().is_empty());
    assert!(!fx.env.cellar.join("widget/.metadata").exists());
}

#[tokio::test]
async fn test_verify_imports_key_then_checks_signature() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new().with_program("gpg").into_arc();
    let dep = fx.signed("1.0");

    let mut verifier = fx.verifier(&dep, &runner, false);
    assert_eq!(verifier.verify().await.unwrap(), GpgState::Verified);

    let calls = runner.calls_to("gpg");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args, ["--recv-keys", "0xDEADBEEF"]);
    assert_eq!(calls[1].args[0], "--verify");
    assert!(calls[1].args[1].ends_with(SIGNATURE_FILE));
    assert_eq!(calls[1].args[2], fx.artifact.to_string_lossy());

    let signature = verifier.signature().unwrap();
    assert!(signature.starts_with(fx.env.cellar.join("widget/.metadata/1.0")));
    assert!(signature.exists());
}

#[tokio::test]
async fn test_signature_refetched_only_when_missing_or_forced() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new().with_program("gpg").into_arc();
    let dep = fx.signed("1.0");

    let first = fx.verifier(&dep, &runner, false).retrieve_signature(false).await.unwrap();

    // the remote copy disappears; the cached one keeps working
    std::fs::remove_file(&fx.signature_source).unwrap();
    let second = fx.verifier(&dep, &runner, false).retrieve_signature(false).await.unwrap();
    assert_eq!(first, second);

    // forcing goes back to the source
    let err = fx
        .verifier(&dep, &runner, true)
        .retrieve_signature(true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "FetchFailed");

    // a cached directory without the file triggers a download
    std::fs::write(&fx.signature_source, b"sig v2").unwrap();
    std::fs::remove_file(&first).unwrap();
    let third = fx.verifier(&dep, &runner, false).retrieve_signature(false).await.unwrap();
    assert_eq!(std::fs::read(&third).unwrap(), b"sig v2");
}

#[tokio::test]
async fn test_latest_version_always_fetches_fresh() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new().with_program("gpg").into_arc();
    let dep = fx.signed("latest");

    fx.verifier(&dep, &runner, false).retrieve_signature(false).await.unwrap();
    std::fs::remove_file(&fx.signature_source).unwrap();

    let err = fx
        .verifier(&dep, &runner, false)
        .retrieve_signature(false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "FetchFailed");
}

#[tokio::test]
async fn test_bad_signature_fails_with_output() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new()
        .with_program("gpg")
        .respond("gpg", &["--verify"], 1, "BAD signature from someone")
        .into_arc();
    let dep = fx.signed("1.0");

    let mut verifier = fx.verifier(&dep, &runner, false);
    let err = verifier.verify().await.unwrap_err();

    assert_eq!(err.kind(), "SignatureVerificationFailed");
    assert!(err.process_output().unwrap().contains("BAD signature"));
    assert_eq!(verifier.state(), GpgState::Failed);
}

#[tokio::test]
async fn test_key_import_failure_stops_verification() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new()
        .with_program("gpg")
        .respond("gpg", &["--recv-keys"], 2, "keyserver unreachable")
        .into_arc();
    let dep = fx.signed("1.0");

    let err = fx.verifier(&dep, &runner, false).verify().await.unwrap_err();
    assert_eq!(err.kind(), "KeyImportFailed");
    assert!(runner.calls_to("gpg").iter().all(|c| c.args[0] != "--verify"));
}
