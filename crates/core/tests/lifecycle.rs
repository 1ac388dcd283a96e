use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rife_bridge_core::{
    BridgeError, ContextHandle, ContextRegistry, ContextState, EngineBackend, EngineConfig,
    EngineStatus, FrameShape, FrameView, FrameViewMut, InferenceEngine,
};

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    in_process: AtomicBool,
    overlapped: AtomicBool,
    panic_next: AtomicBool,
}

/// Writes the first input to the output and flags overlapping calls.
struct CopyEngine {
    counters: Arc<Counters>,
}

impl InferenceEngine for CopyEngine {
    fn load(&mut self, model_dir: &Path) -> EngineStatus {
        if model_dir.ends_with("broken") {
            EngineStatus(-100)
        } else {
            EngineStatus::OK
        }
    }

    fn process(
        &mut self,
        frame0: &FrameView<'_>,
        _frame1: &FrameView<'_>,
        _timestep: f32,
        out: &mut FrameViewMut<'_>,
    ) -> EngineStatus {
        if self.counters.panic_next.swap(false, Ordering::SeqCst) {
            panic!("engine fault");
        }
        if self.counters.in_process.swap(true, Ordering::SeqCst) {
            self.counters.overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(2));
        out.data_mut().copy_from_slice(frame0.data());
        self.counters.in_process.store(false, Ordering::SeqCst);
        EngineStatus::OK
    }
}

impl Drop for CopyEngine {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct CopyBackend {
    counters: Arc<Counters>,
}

impl EngineBackend for CopyBackend {
    fn name(&self) -> &str {
        "copy"
    }

    fn create(&self, _config: &EngineConfig) -> Option<Box<dyn InferenceEngine>> {
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(CopyEngine {
            counters: Arc::clone(&self.counters),
        }))
    }

    fn gpu_count(&self) -> i32 {
        -1
    }
}

fn registry() -> (Arc<ContextRegistry>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let backend = CopyBackend {
        counters: Arc::clone(&counters),
    };
    (Arc::new(ContextRegistry::new(Arc::new(backend))), counters)
}

fn run(registry: &ContextRegistry, handle: ContextHandle, value: u8) -> Vec<u8> {
    let shape = FrameShape::new(4, 4, 4);
    let frame = vec![value; 64];
    let mut out = vec![0u8; 64];
    let view = FrameView::new(&frame, shape).unwrap();
    let mut out_view = FrameViewMut::new(&mut out, shape).unwrap();
    registry
        .interpolate(handle, &view, &view, 0.5, &mut out_view)
        .unwrap();
    out
}

#[test]
fn handles_are_never_reused() {
    let (registry, counters) = registry();
    let first = registry.create(EngineConfig::default()).unwrap();
    assert!(registry.destroy(first));
    let second = registry.create(EngineConfig::default()).unwrap();

    assert_ne!(first, second);
    assert!(!registry.is_live(first));
    assert_eq!(
        registry.load(first, Path::new("models")),
        Err(BridgeError::InvalidHandle)
    );
    assert!(!registry.destroy(first));
    assert_eq!(counters.live.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_reload_returns_context_to_configured() {
    let (registry, _) = registry();
    let handle = registry.create(EngineConfig::default()).unwrap();
    registry.load(handle, Path::new("models/good")).unwrap();

    let err = registry
        .load(handle, Path::new("models/broken"))
        .unwrap_err();
    assert_eq!(err, BridgeError::Engine { status: -100 });
    assert_eq!(err.status(), -100);

    let state = registry.with_context(handle, |ctx| ctx.state()).unwrap();
    assert_eq!(state, ContextState::Configured);
}

#[test]
fn calls_on_one_handle_are_serialized() {
    let (registry, counters) = registry();
    let handle = registry.create(EngineConfig::default()).unwrap();
    registry.load(handle, Path::new("models/good")).unwrap();

    let workers: Vec<_> = (0..4u8)
        .map(|value| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..5 {
                    assert_eq!(run(&registry, handle, value), vec![value; 64]);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(!counters.overlapped.load(Ordering::SeqCst));
}

#[test]
fn context_survives_engine_panic() {
    let (registry, counters) = registry();
    let handle = registry.create(EngineConfig::default()).unwrap();
    registry.load(handle, Path::new("models/good")).unwrap();

    counters.panic_next.store(true, Ordering::SeqCst);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&registry, handle, 1)));
    assert!(outcome.is_err());
    counters.in_process.store(false, Ordering::SeqCst);

    assert_eq!(run(&registry, handle, 9), vec![9u8; 64]);
}

#[test]
fn destroying_all_handles_releases_all_engines() {
    let (registry, counters) = registry();
    let handles: Vec<_> = (0..8)
        .map(|_| registry.create(EngineConfig::default()).unwrap())
        .collect();
    assert_eq!(registry.live_contexts(), 8);
    assert_eq!(counters.live.load(Ordering::SeqCst), 8);

    for handle in handles {
        assert!(registry.destroy(handle));
    }
    assert_eq!(registry.live_contexts(), 0);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[test]
fn negative_gpu_count_reads_as_zero() {
    let (registry, _) = registry();
    assert_eq!(registry.gpu_count(), 0);
}
