//! Self-update and bundle update against an in-memory manifest server.

use std::collections::HashMap;
use std::fs;

use aquamon::error::UpdateError;
use aquamon::update::bundle::{BundleUpdater, LAST_CHECK_FILE, VERSION_FILE};
use aquamon::update::fetch::{sha256_hex, Fetcher};
use aquamon::update::{UpdateManager, UpdateStatus};

const MANIFEST: &str = "https://updates.example.invalid/manifest.json";

#[derive(Default)]
struct Server {
    files: HashMap<String, Vec<u8>>,
}

impl Server {
    fn serve(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.into(), body.into());
        self
    }
}

impl Fetcher for Server {
    fn get(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| UpdateError::Fetch(format!("404 {url}")))
    }
}

fn program_manifest(latest: &str, min: &str, digest: &str) -> String {
    format!(
        r#"{{"aquamon":{{"latest_version":"{latest}","min_supported_version":"{min}",
            "files":{{"aquamon":{{"url":"https://updates.example.invalid/aquamon","sha256":"{digest}"}}}}}}}}"#
    )
}

fn manager(server: Server, live: &std::path::Path, current: &str) -> UpdateManager<Server> {
    UpdateManager::new(server, MANIFEST, "aquamon", current, live)
}

// ── Program update ────────────────────────────────────────────

#[test]
fn verified_release_replaces_live_file() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("aquamon");
    fs::write(&live, b"old build").unwrap();

    let new_build = b"new build".to_vec();
    let server = Server::default()
        .serve(MANIFEST, program_manifest("0.4.0", "0.1.0", &sha256_hex(&new_build)))
        .serve("https://updates.example.invalid/aquamon", new_build.clone());
    let mgr = manager(server, &live, "0.3.0");

    let UpdateStatus::Available(release) = mgr.check().unwrap() else {
        panic!("0.4.0 should be offered over 0.3.0");
    };
    mgr.apply(&release).unwrap();

    assert_eq!(fs::read(&live).unwrap(), new_build);
    assert_eq!(fs::read(dir.path().join("aquamon.bak")).unwrap(), b"old build");
    assert!(!dir.path().join("aquamon.new").exists());
}

#[test]
fn digest_mismatch_leaves_live_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("aquamon");
    fs::write(&live, b"old build").unwrap();

    let server = Server::default()
        .serve(MANIFEST, program_manifest("0.4.0", "0.1.0", &sha256_hex(b"expected")))
        .serve("https://updates.example.invalid/aquamon", b"tampered".to_vec());
    let mgr = manager(server, &live, "0.3.0");

    let UpdateStatus::Available(release) = mgr.check().unwrap() else {
        panic!("expected an available release");
    };
    assert!(matches!(mgr.apply(&release), Err(UpdateError::HashMismatch { .. })));
    assert_eq!(fs::read(&live).unwrap(), b"old build");
    assert!(!dir.path().join("aquamon.new").exists());
    assert!(!dir.path().join("aquamon.bak").exists());
}

#[test]
fn current_below_minimum_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::default().serve(MANIFEST, program_manifest("2.0.0", "1.5", "00"));
    let mgr = manager(server, &dir.path().join("aquamon"), "1.2.9");
    assert!(matches!(mgr.check(), Err(UpdateError::Unsupported { .. })));
}

#[test]
fn same_version_is_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::default().serve(MANIFEST, program_manifest("0.3", "0.1", "00"));
    let mgr = manager(server, &dir.path().join("aquamon"), "0.3.0");
    assert_eq!(
        mgr.check().unwrap(),
        UpdateStatus::UpToDate {
            latest: "0.3".into()
        }
    );
}

#[test]
fn unreachable_manifest_is_a_fetch_error() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(Server::default(), &dir.path().join("aquamon"), "0.3.0");
    assert!(matches!(mgr.check(), Err(UpdateError::Fetch(_))));
}

// ── Bundle update ─────────────────────────────────────────────

fn bundle_manifest(latest: &str, files: &[(&str, &[u8])]) -> String {
    let entries: Vec<String> = files
        .iter()
        .map(|(path, body)| {
            format!(
                r#""{path}":{{"url":"https://updates.example.invalid/b/{path}","sha256":"{}"}}"#,
                sha256_hex(body)
            )
        })
        .collect();
    format!(
        r#"{{"panel":{{"latest_version":"{latest}","files":{{{}}}}}}}"#,
        entries.join(",")
    )
}

#[test]
fn bundle_update_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join(VERSION_FILE), "1.0.0\n").unwrap();
    fs::write(root.path().join("app.py"), b"print('v1')").unwrap();

    let app: &[u8] = b"print('v2')";
    let sound: &[u8] = b"RIFF....WAVE";
    let mut server = Server::default().serve(
        MANIFEST,
        bundle_manifest("1.1.0", &[("app.py", app), ("MAIN/level_critical.wav", sound)]),
    );
    server = server
        .serve("https://updates.example.invalid/b/app.py", app)
        .serve("https://updates.example.invalid/b/MAIN/level_critical.wav", sound);

    let bundle = BundleUpdater::new(root.path(), server);
    assert_eq!(bundle.installed_version(), "1.0.0");
    let UpdateStatus::Available(release) = bundle.check(MANIFEST, "panel").unwrap() else {
        panic!("1.1.0 should be offered over 1.0.0");
    };
    bundle.apply(&release, 1_760_000_000).unwrap();

    assert_eq!(fs::read(root.path().join("app.py")).unwrap(), app);
    assert_eq!(fs::read(root.path().join("MAIN/level_critical.wav")).unwrap(), sound);
    assert_eq!(bundle.installed_version(), "1.1.0");
    assert_eq!(
        fs::read_to_string(root.path().join(LAST_CHECK_FILE)).unwrap().trim(),
        "1760000000"
    );
    assert!(matches!(
        bundle.check(MANIFEST, "panel"),
        Ok(UpdateStatus::UpToDate { .. })
    ));
}

#[test]
fn bundle_with_missing_file_changes_nothing() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("app.py"), b"print('v1')").unwrap();

    let app: &[u8] = b"print('v2')";
    let server = Server::default()
        .serve(
            MANIFEST,
            bundle_manifest("2.0", &[("app.py", app), ("lib/util.py", b"pass")]),
        )
        .serve("https://updates.example.invalid/b/app.py", app);

    let bundle = BundleUpdater::new(root.path(), server);
    let UpdateStatus::Available(release) = bundle.check(MANIFEST, "panel").unwrap() else {
        panic!("2.0 should be offered over the default version");
    };
    assert!(matches!(
        bundle.apply(&release, 1),
        Err(UpdateError::Fetch(_))
    ));
    assert_eq!(fs::read(root.path().join("app.py")).unwrap(), b"print('v1')");
    assert!(!root.path().join("app.py.new").exists());
    assert!(!root.path().join(VERSION_FILE).exists());
}
