use cometguard::prelude::*;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// In-memory sink for formatted tracing output.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber that records WARN and above, return the text.
fn capture_warnings<F: FnOnce()>(f: F) -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn test_clash_warning_emitted_once() {
    let client = Arc::new(ConsoleClient::new());
    let manual = client.create_experiment(&SessionConfig::new()).unwrap();

    let mut guard = TrackingGuard::with_client(true, SessionConfig::new(), client.clone());
    let output = capture_warnings(|| {
        guard.add_tag("first");
        guard.log_metric("loss", 0.25, Some(1), None, true);
        guard.log_metric("loss", 0.20, Some(2), None, true);
    });

    assert!(guard.is_active());
    assert_eq!(output.matches("might cause clashes").count(), 1);
    assert!(output.contains(manual.key()));
    assert_ne!(guard.experiment_key(), Some(manual.key()));
}

#[test]
fn test_no_clash_warning_on_clean_start() {
    let client = Arc::new(ConsoleClient::new());
    let mut guard = TrackingGuard::with_client(true, SessionConfig::new(), client);
    let output = capture_warnings(|| guard.add_tag("clean"));

    assert!(guard.is_active());
    assert!(!output.contains("might cause clashes"));
}

#[test]
fn test_activation_failure_warns_and_disables() {
    let root = tempfile::TempDir::new().unwrap();
    let blocker = root.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let client = Arc::new(OfflineClient::new(&blocker));
    let mut guard = TrackingGuard::with_client(true, SessionConfig::new(), client);

    let output = capture_warnings(|| {
        guard.log_metric("x", f64::NAN, None, None, true);
        guard.add_tag("ignored");
        guard.log_asset(vec![0u8; 4], AssetOptions::default());
        guard.end();
    });

    assert_eq!(guard.state(), SessionState::Disabled);
    assert_eq!(output.matches("session could not start").count(), 1);
}

#[test]
fn test_failed_call_warns_without_disabling() {
    let root = tempfile::TempDir::new().unwrap();
    let client = Arc::new(OfflineClient::new(root.path()));
    let mut guard = TrackingGuard::with_client(true, SessionConfig::new(), client);

    let output = capture_warnings(|| {
        guard.log_model("policy", root.path().join("missing.bin"), None);
        guard.add_tag("after");
    });

    assert!(guard.is_active());
    assert!(output.contains("Experiment tracking call failed"));
    assert!(output.contains("log_model"));
}

#[test]
fn test_disabled_guard_is_silent() {
    let mut guard =
        TrackingGuard::new(false, SessionConfig::new(), BackendProbe(BackendKind::Comet)).unwrap();
    let output = capture_warnings(|| {
        guard.log_metric("x", f64::NAN, None, None, true);
        guard.log_code(CodeSnapshot::default());
        guard.end();
    });

    assert!(output.is_empty());
    assert_eq!(guard.state(), SessionState::Disabled);
}

#[cfg(not(feature = "python"))]
#[test]
fn test_comet_backend_missing_without_python() {
    let config = GuardConfig::new(BackendKind::Comet);
    let err = TrackingGuard::from_config(&config).unwrap_err();
    assert!(matches!(err, GuardError::DependencyMissing(_)));
}
