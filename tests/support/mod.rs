// ABOUTME: Test support utilities.
// ABOUTME: Provides the in-memory transport, SSH servers and shared fixtures.

use std::path::{Path, PathBuf};
use std::sync::Once;

use labexec::config::Config;

// Each test binary only uses some of these modules, so allow dead_code.
#[allow(dead_code)]
pub mod fake_transport;
#[allow(dead_code)]
pub mod quiet_server;
#[allow(dead_code)]
pub mod ssh_container;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("labexec=debug".parse().unwrap())
            .add_directive("russh=info".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Path of the checked-in test key.
#[allow(dead_code)]
pub fn fixture_key() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/test_key")
}

/// Install a private key for `target_id` in `key_dir` with owner-only permissions.
#[allow(dead_code)]
pub fn install_key(key_dir: &Path, target_id: &str) -> PathBuf {
    std::fs::create_dir_all(key_dir).unwrap();
    let path = key_dir.join(format!("{target_id}.key"));
    std::fs::copy(fixture_key(), &path).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
    }
    path
}

/// Fleet used by the executor tests: `ingest` and `analysis` operable,
/// `storage` disabled, `report` outside the allow-list.
#[allow(dead_code)]
pub fn lab_config(key_dir: &Path) -> Config {
    let yaml = format!(
        r#"
targets:
  - id: ingest
    host: 10.0.0.11
    user: lab
  - id: analysis
    address: lab@10.0.0.13:2222
  - id: storage
    address: lab@10.0.0.12
    enabled: false
  - id: report
    host: 10.0.0.14
    user: lab
execution:
  default_timeout: 5s
  default_retry: 3
  key_storage_path: {}
  allowed_target_ids: [ingest, analysis, storage]
  backoff:
    initial: 1ms
    max: 5ms
audit:
  actor: tester
"#,
        key_dir.display()
    );
    Config::from_yaml(&yaml).unwrap()
}
