//! Teletype Linker Core Integration Tests
//!
//! Drive the full package (coordinator, registry, lock store, notifier)
//! against the in-memory host fakes and a real temp directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use teletype_linker_core::config::Config;
use teletype_linker_core::domain::events::{EventKind, LinkerEvent};
use teletype_linker_core::domain::locator::{LinkerEndpoint, SessionLocator};
use teletype_linker_core::domain::session::{DispatchOutcome, SharePhase};
use teletype_linker_core::host::{Editor, EditorId, UriHandlerRegistration};
use teletype_linker_core::notifier::{NotificationAction, NotificationLevel};
use teletype_linker_core::package::{HostServices, LinkerPackage};
use teletype_linker_core::testing::{
    FAKE_PORTAL_URI, FakeCollaboration, FakeHostConfig, FakeNotificationSink,
    FakePackageManager, FakeWorkspace, drain_events, next_event_of,
};
use tokio::sync::broadcast;

struct Harness {
    package: LinkerPackage,
    workspace: Arc<FakeWorkspace>,
    packages: Arc<FakePackageManager>,
    sink: Arc<FakeNotificationSink>,
    capability: Arc<FakeCollaboration>,
    dir: TempDir,
}

impl Harness {
    fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{}.lock", name))
    }

    fn new_uri(&self, file: &Path) -> String {
        LinkerEndpoint::default().new_uri(file)
    }
}

fn create_harness(config: &Config) -> Harness {
    let workspace = FakeWorkspace::new();
    let packages = Arc::new(FakePackageManager::ready());
    let sink = FakeNotificationSink::new();
    let host = HostServices {
        workspace: workspace.clone(),
        packages: packages.clone(),
        config: FakeHostConfig::new(UriHandlerRegistration::Always),
        notifications: sink.clone(),
    };
    Harness {
        package: LinkerPackage::new(host, config),
        workspace,
        packages,
        sink,
        capability: FakeCollaboration::signed_in(),
        dir: TempDir::new().expect("Failed to create temp dir"),
    }
}

async fn ready_harness() -> Harness {
    let harness = create_harness(&Config::default());
    harness.package.activate().await;
    harness
        .package
        .consume_teletype(harness.capability.clone())
        .await;
    harness
}

fn kinds(events: &[LinkerEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind()).collect()
}

async fn collect_until(
    rx: &mut broadcast::Receiver<LinkerEvent>,
    kind: EventKind,
    count: usize,
) -> Vec<LinkerEvent> {
    let mut seen = Vec::new();
    let mut matched = 0;
    let wait = async {
        while matched < count {
            match rx.recv().await {
                Ok(event) => {
                    if event.kind() == kind {
                        matched += 1;
                    }
                    seen.push(event);
                }
                Err(_) => break,
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), wait).await;
    seen
}

#[tokio::test]
async fn test_new_locator_shares_report_end_to_end() {
    let harness = ready_harness().await;
    let mut rx = harness.package.events().subscribe();
    let file = harness.file("report.rvt");
    std::fs::write(&file, "K1\tWalls").unwrap();

    let outcome = harness.package.handle_uri(&harness.new_uri(&file)).await;

    match outcome {
        Some(DispatchOutcome::Share(share)) => assert!(share.is_shared()),
        other => panic!("unexpected outcome {:?}", other),
    }

    let lock = std::fs::read_to_string(harness.lock_path("report.rvt")).unwrap();
    assert_eq!(lock, LinkerEndpoint::default().join_uri(FAKE_PORTAL_URI));
    assert_eq!(
        SessionLocator::parse(&lock).unwrap(),
        SessionLocator::Join {
            session_uri: FAKE_PORTAL_URI.to_string()
        }
    );

    let events = drain_events(&mut rx);
    let added = events
        .iter()
        .position(|e| e.kind() == EventKind::AddedEditor)
        .expect("AddedEditor emitted");
    let shared = events
        .iter()
        .position(|e| e.kind() == EventKind::SharedFile)
        .expect("SharedFile emitted");
    assert!(added < shared);
    assert_eq!(events[shared].file(), Some(&file));

    let editors = harness.workspace.fake_editors();
    assert_eq!(editors.len(), 1);
    assert_eq!(editors[0].soft_tabs(), Some(false));
    assert_eq!(editors[0].soft_wrapped(), Some(true));

    for _ in 0..100 {
        if !harness.sink.notifications().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let notifications = harness.sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Success);
}

#[tokio::test]
async fn test_share_outcome_is_lock_xor_failure() {
    for prelocked in [false, true] {
        let harness = ready_harness().await;
        let file = harness.file("a.txt");
        if prelocked {
            std::fs::write(harness.lock_path("a.txt"), "other").unwrap();
        }
        let mut rx = harness.package.events().subscribe();

        harness.package.handle_uri(&harness.new_uri(&file)).await;

        let events = kinds(&drain_events(&mut rx));
        let locked = events.iter().filter(|k| **k == EventKind::LockedFile).count();
        let failed = events
            .iter()
            .filter(|k| **k == EventKind::FailedToLockFile)
            .count();
        assert_eq!(locked + failed, 1);
        assert_eq!(locked == 1, !prelocked);

        let tracked = harness.package.coordinator().registry().len().await;
        assert_eq!(tracked, if prelocked { 0 } else { 1 });
    }
}

#[tokio::test]
async fn test_lost_hosting_reports_local_editors_only() {
    let harness = ready_harness().await;
    let first = harness.file("a.txt");
    let second = harness.file("b.txt");
    harness.package.handle_uri(&harness.new_uri(&first)).await;
    harness.package.handle_uri(&harness.new_uri(&second)).await;

    let mut rx = harness.package.events().subscribe();
    let remote = harness.workspace.add_remote_editor(harness.file("c.txt"));
    assert!(next_event_of(&mut rx, EventKind::AddedEditor).await.is_some());

    harness.capability.bindings().close_host_portal();

    let closed = match next_event_of(&mut rx, EventKind::ClosedPortal).await {
        Some(LinkerEvent::ClosedPortal(editors)) => editors,
        other => panic!("unexpected event {:?}", other),
    };
    let mut paths: Vec<PathBuf> = closed.iter().filter_map(|e| e.path()).collect();
    paths.sort();
    assert_eq!(paths, vec![first.clone(), second.clone()]);
    let ids: Vec<EditorId> = closed.iter().map(|e| e.id()).collect();
    assert!(!ids.contains(&remote.id()));

    // The user accepts "Close Files": the editors go and so do their locks
    let mut notification = None;
    for _ in 0..100 {
        notification = harness
            .sink
            .notifications()
            .into_iter()
            .find(|n| !n.buttons.is_empty());
        if notification.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let notification = notification.expect("closed portal notification");
    assert!(matches!(
        notification.buttons[0].action,
        NotificationAction::CloseEditors(_)
    ));
    harness.package.perform(&notification.buttons[0].action);

    let unlocked = collect_until(&mut rx, EventKind::UnlockedFile, 2).await;
    let mut files: Vec<PathBuf> = unlocked
        .iter()
        .filter(|e| e.kind() == EventKind::UnlockedFile)
        .filter_map(|e| e.file().cloned())
        .collect();
    files.sort();
    assert_eq!(files, vec![first, second]);
    assert!(!harness.lock_path("a.txt").exists());
    assert!(!harness.lock_path("b.txt").exists());
    assert!(!remote.is_destroyed());
}

#[tokio::test]
async fn test_deactivation_sweep_survives_one_failure() {
    let harness = ready_harness().await;
    for name in ["a.txt", "b.txt", "c.txt"] {
        let outcome = harness.package.handle_uri(&harness.new_uri(&harness.file(name))).await;
        assert!(matches!(outcome, Some(DispatchOutcome::Share(ref s)) if s.is_shared()));
    }

    // A lock path that cannot be removed as a file
    let stuck = harness.lock_path("b.txt");
    std::fs::remove_file(&stuck).unwrap();
    std::fs::create_dir(&stuck).unwrap();

    let mut rx = harness.package.events().subscribe();
    let report = harness.package.deactivate().await;

    assert_eq!(report.released.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, harness.file("b.txt"));
    assert!(report.has_warnings());
    assert!(!harness.lock_path("a.txt").exists());
    assert!(!harness.lock_path("c.txt").exists());

    let failures = drain_events(&mut rx)
        .iter()
        .filter(|e| e.kind() == EventKind::FailedToUnlockFile)
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_join_locator_delegates_without_locks() {
    let harness = ready_harness().await;
    let raw = LinkerEndpoint::default().join_uri(FAKE_PORTAL_URI);

    let outcome = harness.package.handle_uri(&raw).await;

    assert!(matches!(
        outcome,
        Some(DispatchOutcome::Join { delegated: true })
    ));
    let handled = harness.capability.handled_uris();
    assert_eq!(handled.len(), 1);
    assert_eq!(handled[0].1, FAKE_PORTAL_URI);
    assert!(std::fs::read_dir(harness.dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_service_dispatch_matches_uri_handling() {
    let harness = ready_harness().await;
    let service = harness.package.provide_service();
    let mut rx = service.subscribe();
    let file = harness.file("keynotes.txt");

    let outcome = service
        .dispatch(SessionLocator::New { file: file.clone() })
        .await;

    match outcome {
        DispatchOutcome::Share(share) => assert!(share.is_shared()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(next_event_of(&mut rx, EventKind::SharedFile).await.is_some());
    assert!(harness.lock_path("keynotes.txt").exists());
}

#[tokio::test(start_paused = true)]
async fn test_late_activation_is_absorbed_by_retry() {
    let harness = create_harness(&Config::default());
    harness.packages.set_active(false);
    let service = harness.package.provide_service();
    let capability = harness.capability.clone();
    let coordinator = harness.package.coordinator().clone();
    harness.packages.on_activate(move || {
        let coordinator = coordinator.clone();
        let capability = capability.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            coordinator.consume_capability(capability).await;
        });
    });

    let raw = LinkerEndpoint::default().join_uri(FAKE_PORTAL_URI);
    let outcome = service.handle_uri(&raw).await;

    assert!(matches!(
        outcome,
        Some(DispatchOutcome::Join { delegated: true })
    ));
    assert_eq!(harness.packages.activation_count(), 1);
}

#[tokio::test]
async fn test_missing_teletype_aborts_before_sharing() {
    let harness = create_harness(&Config::default());
    harness.packages.set_loaded(false);
    let mut rx = harness.package.events().subscribe();

    let outcome = harness
        .package
        .handle_uri(&harness.new_uri(&harness.file("a.txt")))
        .await;

    match outcome {
        Some(DispatchOutcome::Share(share)) => {
            assert_eq!(share.aborted_at(), Some(SharePhase::ResolvingCapability))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(kinds(&drain_events(&mut rx)), vec![EventKind::NotInstalled]);
    assert_eq!(harness.capability.share_calls(), 0);
}

#[tokio::test]
async fn test_reuse_open_editor_configuration() {
    let mut config = Config::default();
    config.set("session.reuse_open_editor", "true").unwrap();
    let harness = create_harness(&config);
    harness.package.activate().await;
    harness
        .package
        .consume_teletype(harness.capability.clone())
        .await;
    let file = harness.file("a.txt");

    harness.package.handle_uri(&harness.new_uri(&file)).await;
    let again = harness.package.handle_uri(&harness.new_uri(&file)).await;

    match again {
        Some(DispatchOutcome::Share(share)) => {
            assert!(share.editor().is_some());
            assert!(!share.is_shared());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(harness.capability.share_calls(), 1);
}
