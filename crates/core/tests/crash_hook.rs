use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use rife_bridge_core::logging::{
    install_panic_hook, PanicHookInstallPlan, DEFAULT_CRASH_DIR_NAME, DEFAULT_LOG_DIR_NAME,
};
use rife_bridge_core::{
    ContextRegistry, EngineBackend, EngineConfig, EngineStatus, FrameShape, FrameView,
    FrameViewMut, InferenceEngine,
};
use tempfile::tempdir;

const CHILD_MODE_ENV: &str = "RIFE_BRIDGE_PANIC_CHILD_MODE";
const CHILD_DATA_DIR_ENV: &str = "RIFE_BRIDGE_PANIC_CHILD_DATA_DIR";

struct PanickingEngine;

impl InferenceEngine for PanickingEngine {
    fn load(&mut self, _model_dir: &Path) -> EngineStatus {
        EngineStatus::OK
    }

    fn process(
        &mut self,
        _frame0: &FrameView<'_>,
        _frame1: &FrameView<'_>,
        _timestep: f32,
        _out: &mut FrameViewMut<'_>,
    ) -> EngineStatus {
        panic!("intentional engine panic for crash_hook_writes_crash_file")
    }
}

struct PanickingBackend;

impl EngineBackend for PanickingBackend {
    fn name(&self) -> &str {
        "panicking"
    }

    fn create(&self, _config: &EngineConfig) -> Option<Box<dyn InferenceEngine>> {
        Some(Box::new(PanickingEngine))
    }

    fn gpu_count(&self) -> i32 {
        0
    }
}

fn run_panic_child(mode: &str, data_dir: &Path) -> std::process::Output {
    Command::new(std::env::current_exe().expect("test executable path"))
        .arg("panic_hook_child_entrypoint")
        .arg("--exact")
        .arg("--nocapture")
        .env(CHILD_MODE_ENV, mode)
        .env(CHILD_DATA_DIR_ENV, data_dir)
        .output()
        .expect("run panic hook child")
}

fn crash_artifacts(crash_dir: &Path) -> Vec<PathBuf> {
    let mut paths = fs::read_dir(crash_dir)
        .expect("read crash directory")
        .map(|entry| entry.expect("read crash directory entry").path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .collect::<Vec<_>>();
    paths.sort();
    paths
}

fn interpolate_with_panicking_engine(model_dir: &Path) {
    let registry = ContextRegistry::new(Arc::new(PanickingBackend));
    let handle = registry
        .create(EngineConfig::default())
        .expect("create context");
    registry.load(handle, model_dir).expect("load model");

    let shape = FrameShape::bgr(2, 2);
    let frame = vec![0u8; 12];
    let mut out = vec![0u8; 12];
    let view = FrameView::new(&frame, shape).expect("frame view");
    let mut out_view = FrameViewMut::new(&mut out, shape).expect("output view");
    let _ = registry.interpolate(handle, &view, &view, 0.5, &mut out_view);
}

#[test]
fn panic_hook_child_entrypoint() {
    let Ok(mode) = std::env::var(CHILD_MODE_ENV) else {
        return;
    };
    let data_dir = PathBuf::from(
        std::env::var(CHILD_DATA_DIR_ENV).expect("child data dir must be set"),
    );

    let first_install = install_panic_hook(Some(data_dir.as_path()));
    assert!(matches!(
        first_install,
        PanicHookInstallPlan::Installed { .. } | PanicHookInstallPlan::AlreadyInstalled { .. }
    ));
    assert!(matches!(
        install_panic_hook(Some(data_dir.as_path())),
        PanicHookInstallPlan::AlreadyInstalled { .. }
    ));

    match mode.as_str() {
        "engine_panic" => interpolate_with_panicking_engine(&data_dir),
        "unwritable_crash_dir" => {
            let crash_dir = data_dir
                .join(DEFAULT_LOG_DIR_NAME)
                .join(DEFAULT_CRASH_DIR_NAME);
            if crash_dir.exists() {
                fs::remove_dir_all(&crash_dir).expect("remove crash directory");
            }
            fs::write(&crash_dir, b"not-a-directory").expect("replace crash directory with file");
            interpolate_with_panicking_engine(&data_dir);
        }
        other => panic!("unknown panic hook child mode: {other}"),
    }
}

#[test]
fn crash_hook_writes_crash_file() {
    let data_dir = tempdir().expect("tempdir");
    let output = run_panic_child("engine_panic", data_dir.path());

    assert!(!output.status.success(), "child process should panic");

    let crash_dir = data_dir
        .path()
        .join(DEFAULT_LOG_DIR_NAME)
        .join(DEFAULT_CRASH_DIR_NAME);
    let artifacts = crash_artifacts(&crash_dir);
    let newest = artifacts.last().expect("expected crash artifact");
    let contents = fs::read_to_string(newest).expect("read crash artifact");

    assert!(contents.contains("timestamp_utc="));
    assert!(contents.contains("payload=intentional engine panic"));
    assert!(contents.contains("location="));
    assert!(contents.contains("backtrace_policy="));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("thread panicked while panicking"));
}

#[test]
fn crash_hook_unwritable_crash_dir_warns_and_does_not_repanic() {
    let data_dir = tempdir().expect("tempdir");
    let output = run_panic_child("unwritable_crash_dir", data_dir.path());

    assert!(!output.status.success(), "child process should panic");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("intentional engine panic"));
    assert!(stderr.contains("Warning: failed to write panic crash artifact under"));
    assert!(!stderr.contains("thread panicked while panicking"));
}
