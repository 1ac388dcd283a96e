//! Binding to the native RIFE ncnn-vulkan engine library.
//!
//! The engine is built as a shared library exporting a flat C shim:
//!
//! ```text
//! void* rife_ncnn_create(int gpuid, int tta, int tta_temporal, int uhd,
//!                        int num_threads, int rife_v2, int rife_v4, int padding);
//! void  rife_ncnn_destroy(void* engine);
//! int   rife_ncnn_load(void* engine, const char* modeldir);
//! int   rife_ncnn_process(void* engine, const uint8_t* in0, const uint8_t* in1,
//!                         int w, int h, int elempack, uint8_t* out, float t);
//! int   rife_ncnn_gpu_count(void);
//! ```
//!
//! The library is resolved at runtime so that hosts without Vulkan can still
//! load this crate; in that case no context can be created and the GPU count is 0.

use std::env;
use std::ffi::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{model_dir_c_string, EngineBackend, EngineStatus, InferenceEngine};
use crate::error::STATUS_INVALID_PATH;
use crate::frame::{FrameView, FrameViewMut};

pub const ENV_LIB_PATH: &str = "RIFE_NCNN_LIB_PATH";

#[cfg(all(unix, not(target_os = "macos")))]
const ENGINE_LIB_NAME: &str = "librife_ncnn_vulkan.so";
#[cfg(target_os = "macos")]
const ENGINE_LIB_NAME: &str = "librife_ncnn_vulkan.dylib";
#[cfg(windows)]
const ENGINE_LIB_NAME: &str = "rife_ncnn_vulkan.dll";

const SYM_CREATE: &[u8] = b"rife_ncnn_create\0";
const SYM_DESTROY: &[u8] = b"rife_ncnn_destroy\0";
const SYM_LOAD: &[u8] = b"rife_ncnn_load\0";
const SYM_PROCESS: &[u8] = b"rife_ncnn_process\0";
const SYM_GPU_COUNT: &[u8] = b"rife_ncnn_gpu_count\0";

type CreateFn = unsafe extern "C" fn(
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
) -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type LoadFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
type ProcessFn = unsafe extern "C" fn(
    *mut c_void,
    *const u8,
    *const u8,
    c_int,
    c_int,
    c_int,
    *mut u8,
    f32,
) -> c_int;
type GpuCountFn = unsafe extern "C" fn() -> c_int;

static ENGINE_LIBRARY: OnceLock<Result<Arc<EngineLibrary>, String>> = OnceLock::new();

/// Search directories for the engine library.
///
/// Probes these locations in order:
///   1. `<exe_dir>/` (Windows only)
///   2. `<exe_dir>/lib/`
///   3. `<exe_dir>/../lib/`
///   4. `<cwd>/lib/`
///   5. `/usr/local/lib/` (Unix only)
///   6. `/usr/lib/` (Unix only)
fn candidate_lib_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = env::current_exe().and_then(|p| p.canonicalize()) {
        if let Some(exe_dir) = exe.parent() {
            #[cfg(windows)]
            {
                dirs.push(exe_dir.to_path_buf());
            }
            dirs.push(exe_dir.join("lib"));
            if let Some(parent) = exe_dir.parent() {
                dirs.push(parent.join("lib"));
            }
        }
    }
    if let Ok(cwd) = env::current_dir() {
        let cwd_lib = cwd.join("lib");
        if !dirs.contains(&cwd_lib) {
            dirs.push(cwd_lib);
        }
    }
    #[cfg(unix)]
    {
        dirs.push(PathBuf::from("/usr/local/lib"));
        dirs.push(PathBuf::from("/usr/lib"));
    }
    dirs
}

fn find_engine_lib_in_dirs(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(ENGINE_LIB_NAME))
        .find(|candidate| candidate.is_file())
}

/// Explicit env override first, then the search directories.
pub fn resolve_library_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(ENV_LIB_PATH) {
        return Some(PathBuf::from(path));
    }
    find_engine_lib_in_dirs(&candidate_lib_dirs())
}

/// Symbol table of a loaded engine library. The function pointers stay valid
/// for as long as `_library` is alive.
pub struct EngineLibrary {
    path: PathBuf,
    create: CreateFn,
    destroy: DestroyFn,
    load: LoadFn,
    process: ProcessFn,
    gpu_count: GpuCountFn,
    _library: Library,
}

impl std::fmt::Debug for EngineLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EngineLibrary {
    /// Load the library at `path` and resolve every shim symbol.
    ///
    /// # Safety
    ///
    /// The library's initializers run on load, and the resolved symbols must
    /// have the signatures documented at module level.
    pub unsafe fn open(path: &Path) -> Result<Self, String> {
        let library = Library::new(path)
            .map_err(|e| format!("failed to load {}: {e}", path.display()))?;

        let create = *library
            .get::<CreateFn>(SYM_CREATE)
            .map_err(|e| format!("missing rife_ncnn_create: {e}"))?;
        let destroy = *library
            .get::<DestroyFn>(SYM_DESTROY)
            .map_err(|e| format!("missing rife_ncnn_destroy: {e}"))?;
        let load = *library
            .get::<LoadFn>(SYM_LOAD)
            .map_err(|e| format!("missing rife_ncnn_load: {e}"))?;
        let process = *library
            .get::<ProcessFn>(SYM_PROCESS)
            .map_err(|e| format!("missing rife_ncnn_process: {e}"))?;
        let gpu_count = *library
            .get::<GpuCountFn>(SYM_GPU_COUNT)
            .map_err(|e| format!("missing rife_ncnn_gpu_count: {e}"))?;

        Ok(Self {
            path: path.to_path_buf(),
            create,
            destroy,
            load,
            process,
            gpu_count,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Process-wide engine library, loaded on first use.
pub fn engine_library() -> Result<Arc<EngineLibrary>, String> {
    ENGINE_LIBRARY
        .get_or_init(|| {
            let path = resolve_library_path().ok_or_else(|| {
                format!("{ENGINE_LIB_NAME} not found; set {ENV_LIB_PATH} to its location")
            })?;
            let library = unsafe { EngineLibrary::open(&path) };
            match library {
                Ok(library) => {
                    info!(path = %path.display(), "RIFE ncnn engine library loaded");
                    Ok(Arc::new(library))
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "RIFE ncnn engine library unusable");
                    Err(reason)
                }
            }
        })
        .clone()
}

/// Log which engine library was resolved, for diagnostics.
/// Call after tracing is initialized.
pub fn log_library_status() {
    match env::var(ENV_LIB_PATH) {
        Ok(path) if Path::new(&path).is_file() => info!("RIFE engine library: {path}"),
        Ok(path) => warn!("{ENV_LIB_PATH} set to {path} but file not found"),
        Err(_) => match find_engine_lib_in_dirs(&candidate_lib_dirs()) {
            Some(path) => info!("RIFE engine library: {}", path.display()),
            None => warn!("{ENGINE_LIB_NAME} not found in default search paths"),
        },
    }
}

fn flag(value: bool) -> c_int {
    c_int::from(value)
}

/// [`EngineBackend`] backed by the native ncnn-vulkan library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NcnnBackend;

impl NcnnBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EngineBackend for NcnnBackend {
    fn name(&self) -> &str {
        "ncnn-vulkan"
    }

    fn create(&self, config: &EngineConfig) -> Option<Box<dyn InferenceEngine>> {
        let library = match engine_library() {
            Ok(library) => library,
            Err(reason) => {
                debug!(%reason, "cannot create RIFE engine without the native library");
                return None;
            }
        };

        let raw = unsafe {
            (library.create)(
                config.gpu_id,
                flag(config.tta_mode),
                flag(config.tta_temporal_mode),
                flag(config.uhd_mode),
                config.num_threads,
                flag(config.rife_v2),
                flag(config.rife_v4),
                config.padding,
            )
        };
        if raw.is_null() {
            warn!(
                library = %library.path().display(),
                gpu_id = config.gpu_id,
                "Native engine rejected the configuration"
            );
            return None;
        }
        Some(Box::new(NcnnEngine { raw, library }))
    }

    fn gpu_count(&self) -> i32 {
        match engine_library() {
            Ok(library) => unsafe { (library.gpu_count)() }.max(0),
            Err(_) => 0,
        }
    }
}

/// One native engine instance; destroyed when dropped.
pub struct NcnnEngine {
    raw: *mut c_void,
    library: Arc<EngineLibrary>,
}

// The native instance is only ever touched through `&mut self`, one thread at a time.
unsafe impl Send for NcnnEngine {}

impl InferenceEngine for NcnnEngine {
    fn load(&mut self, model_dir: &Path) -> EngineStatus {
        // EngineContext::load rejects these paths before they get here.
        let Ok(dir) = model_dir_c_string(model_dir) else {
            return EngineStatus(STATUS_INVALID_PATH);
        };
        EngineStatus(unsafe { (self.library.load)(self.raw, dir.as_ptr()) })
    }

    fn process(
        &mut self,
        frame0: &FrameView<'_>,
        frame1: &FrameView<'_>,
        timestep: f32,
        out: &mut FrameViewMut<'_>,
    ) -> EngineStatus {
        let shape = out.shape();
        EngineStatus(unsafe {
            (self.library.process)(
                self.raw,
                frame0.as_ptr(),
                frame1.as_ptr(),
                shape.width as c_int,
                shape.height as c_int,
                shape.channels as c_int,
                out.as_mut_ptr(),
                timestep,
            )
        })
    }
}

impl Drop for NcnnEngine {
    fn drop(&mut self) {
        unsafe { (self.library.destroy)(self.raw) };
    }
}
