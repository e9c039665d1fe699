#![allow(dead_code)]

use kiln_core::config::types::{KilnConfig, LimitsConfig, WorkspaceConfig};
use kiln_core::kiln_types::OutputEvent;
use kiln_core::ExecutionCoordinator;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Stand-in toolchain. Sources are shell scripts; "compiling" copies the
/// source to the artifact path. Markers in the source select failure modes.
const FAKE_COMPILER: &str = r#"#!/bin/sh
src="$1"
out="$3"
if grep -q KILN_COMPILE_ERROR "$src"; then
    echo "$src:3:5: error: expected ';' before '}' token" >&2
    echo "compilation terminated." >&2
    exit 1
fi
if grep -q KILN_COMPILE_HANG "$src"; then
    while :; do :; done
fi
if grep -q KILN_NO_ARTIFACT "$src"; then
    exit 0
fi
cp "$src" "$out" && chmod 755 "$out"
"#;

static TOOLCHAIN: OnceLock<(TempDir, PathBuf)> = OnceLock::new();

/// Path of the fake compiler, written once per test binary.
pub fn fake_compiler() -> &'static Path {
    let (_, path) = TOOLCHAIN.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-cc");
        std::fs::write(&path, FAKE_COMPILER).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        (dir, path)
    });
    path
}

/// A program "source" understood by the fake compiler.
pub fn program(body: &str) -> String {
    format!("#!/bin/sh\n{}\n", body)
}

pub fn config(workspace_root: &Path) -> KilnConfig {
    let mut config = KilnConfig::default();
    config.toolchain.compiler = fake_compiler().to_string_lossy().into_owned();
    config.toolchain.include_dirs.clear();
    config.toolchain.library_dirs.clear();
    config.toolchain.libraries.clear();
    config.limits = LimitsConfig {
        compile_timeout_secs: 5,
        run_timeout_secs: 5,
        max_concurrent: 4,
    };
    config.workspace = WorkspaceConfig {
        root: Some(workspace_root.to_path_buf()),
        prefix: "it-".to_string(),
    };
    config
}

pub struct Harness {
    pub coordinator: ExecutionCoordinator,
    pub events: mpsc::Receiver<OutputEvent>,
    pub root: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut KilnConfig)) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        adjust(&mut config);

        let coordinator = ExecutionCoordinator::new(config).unwrap();
        let (tx, events) = mpsc::channel(1024);
        assert!(coordinator.attach_consumer(tx).await);

        Self {
            coordinator,
            events,
            root,
        }
    }

    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Number of entries left under the workspace root.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.root.path()).unwrap().count()
    }
}

pub fn lines(events: &[OutputEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .map(|e| (e.kind.to_string(), e.line.clone()))
        .collect()
}
