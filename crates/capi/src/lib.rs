//! C ABI for the RIFE frame interpolation bridge.
//!
//! Every entry point returns a value instead of unwinding: panics are caught
//! at the boundary, and the message of the most recent failure on the calling
//! thread is available from [`rife_last_error`]. See `include/rife_bridge.h`.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::sync::{Arc, OnceLock};

use rife_bridge_core::config::{self, BridgeConfig};
use rife_bridge_core::error::{BridgeError, BridgeResult, STATUS_OK};
use rife_bridge_core::logging::{self, LoggingInitOptions, LoggingInitReport};
use rife_bridge_core::ncnn::{self, NcnnBackend};
use rife_bridge_core::{
    ContextHandle, ContextRegistry, EngineBackend, EngineConfig, FrameShape, FrameView,
    FrameViewMut,
};
use tracing::debug;

/// Handle value that never names a context.
pub const RIFE_INVALID_HANDLE: u64 = 0;

pub const RIFE_LOG_CONSOLE_AND_FILE: c_int = 0;
pub const RIFE_LOG_CONSOLE_ONLY: c_int = 1;
pub const RIFE_LOG_ALREADY_INITIALIZED: c_int = 2;

static REGISTRY: OnceLock<ContextRegistry> = OnceLock::new();

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Use `backend` for every context this library creates.
///
/// Only effective before the first C call touches the registry; returns
/// `false` once a backend is already in place.
pub fn install_backend(backend: Arc<dyn EngineBackend>) -> bool {
    if REGISTRY.get().is_some() {
        return false;
    }
    REGISTRY.set(ContextRegistry::new(backend)).is_ok()
}

/// Process-wide handle table, defaulting to the native ncnn backend.
pub fn registry() -> &'static ContextRegistry {
    REGISTRY.get_or_init(|| {
        ncnn::log_library_status();
        ContextRegistry::new(Arc::new(NcnnBackend::new()))
    })
}

/// Message of the last failure on this thread, if any.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
    })
}

fn record_error(message: impl Into<String>) {
    let message = CString::new(message.into().replace('\0', " "))
        .unwrap_or_else(|_| CString::from(c"ffi error"));
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(message);
    });
}

fn clear_error() {
    LAST_ERROR.with(|slot| {
        slot.borrow_mut().take();
    });
}

/// Run `f`, converting both errors and panics into `fallback`.
fn guarded<T>(fallback: T, f: impl FnOnce() -> BridgeResult<T>) -> T {
    guarded_with(|_| fallback, f)
}

fn guarded_status(f: impl FnOnce() -> BridgeResult<()>) -> c_int {
    guarded_with(|error| error.status(), || f().map(|()| STATUS_OK))
}

fn guarded_with<T>(
    on_error: impl FnOnce(&BridgeError) -> T,
    f: impl FnOnce() -> BridgeResult<T>,
) -> T {
    clear_error();
    let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(BridgeError::Panic(logging::panic_payload_to_string(
            payload.as_ref(),
        )))
    });
    match outcome {
        Ok(value) => value,
        Err(error) => {
            // Engine failures were already logged by the context.
            debug!(
                status = error.status(),
                precondition = error.is_precondition(),
                %error,
                "Call failed at C boundary"
            );
            record_error(error.to_string());
            on_error(&error)
        }
    }
}

fn handle_arg(raw: u64) -> BridgeResult<ContextHandle> {
    ContextHandle::from_raw(raw).ok_or(BridgeError::InvalidHandle)
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &'static str) -> BridgeResult<&'a CStr> {
    if ptr.is_null() {
        return Err(BridgeError::NullArgument(name));
    }
    Ok(unsafe { CStr::from_ptr(ptr) })
}

fn path_arg(raw: &CStr) -> BridgeResult<PathBuf> {
    if raw.to_bytes().is_empty() {
        return Err(BridgeError::InvalidPath("path is empty".to_string()));
    }
    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        Ok(PathBuf::from(OsStr::from_bytes(raw.to_bytes())))
    }
    #[cfg(not(unix))]
    {
        raw.to_str()
            .map(PathBuf::from)
            .map_err(|_| BridgeError::InvalidPath("path is not valid UTF-8".to_string()))
    }
}

fn ranges_overlap(a: *const u8, b: *const u8, len: usize) -> bool {
    let (a, b) = (a as usize, b as usize);
    a < b.saturating_add(len) && b < a.saturating_add(len)
}

/// Create a context. Non-zero flags are true. Returns `RIFE_INVALID_HANDLE`
/// when the engine cannot be created.
#[no_mangle]
pub extern "C" fn rife_create(
    gpuid: c_int,
    tta_mode: c_int,
    tta_temporal_mode: c_int,
    uhd_mode: c_int,
    num_threads: c_int,
    rife_v2: c_int,
    rife_v4: c_int,
    padding: c_int,
) -> u64 {
    let config = EngineConfig {
        gpu_id: gpuid,
        tta_mode: tta_mode != 0,
        tta_temporal_mode: tta_temporal_mode != 0,
        uhd_mode: uhd_mode != 0,
        num_threads,
        rife_v2: rife_v2 != 0,
        rife_v4: rife_v4 != 0,
        padding,
    };
    guarded(RIFE_INVALID_HANDLE, || create_handle(config))
}

/// Create a context from an engine config JSON object. Missing fields take
/// their defaults; an empty string selects the default config.
///
/// # Safety
///
/// `config_json` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rife_create_from_json(config_json: *const c_char) -> u64 {
    guarded(RIFE_INVALID_HANDLE, || {
        let raw = unsafe { str_arg(config_json, "config_json") }?;
        let raw = raw
            .to_str()
            .map_err(|_| BridgeError::InvalidPath("config JSON is not valid UTF-8".to_string()))?;
        let config = EngineConfig::from_json_str(raw)
            .map_err(|e| BridgeError::InvalidPath(format!("{e:#}")))?;
        create_handle(config)
    })
}

/// Create a context from a TOML config file and load its `model_dir`, if set.
/// Relative model paths resolve against the config file's directory. An empty
/// path selects `config.toml` in the default data directory.
///
/// # Safety
///
/// `config_path` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rife_create_from_config(config_path: *const c_char) -> u64 {
    guarded(RIFE_INVALID_HANDLE, || {
        let raw = unsafe { str_arg(config_path, "config_path") }?;
        let path = if raw.to_bytes().is_empty() {
            config::config_path(&config::data_dir(None))
        } else {
            path_arg(raw)?
        };
        let bridge_config = BridgeConfig::load_from_path(&path)
            .map_err(|e| BridgeError::InvalidPath(format!("{e:#}")))?;
        let handle = create_handle(bridge_config.engine.clone())?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(model_dir) = bridge_config.resolve_model_dir(base) {
            let registry = registry();
            if let Err(error) = registry.load(handle_arg(handle)?, &model_dir) {
                registry.destroy(handle_arg(handle)?);
                return Err(error);
            }
        }
        Ok(handle)
    })
}

fn create_handle(config: EngineConfig) -> BridgeResult<u64> {
    registry()
        .create(config)
        .map(ContextHandle::as_raw)
        .ok_or(BridgeError::CreateFailed)
}

/// Release a context. Zero, unknown and already destroyed handles are ignored.
#[no_mangle]
pub extern "C" fn rife_destroy(ctx: u64) {
    guarded((), || {
        if let Some(handle) = ContextHandle::from_raw(ctx) {
            registry().destroy(handle);
        }
        Ok(())
    })
}

/// Load the model in `modeldir`. Returns 0 on success, a negative status for
/// a bad handle or path, or the engine's status.
///
/// # Safety
///
/// `modeldir` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rife_load(ctx: u64, modeldir: *const c_char) -> c_int {
    guarded_status(|| {
        let handle = handle_arg(ctx)?;
        let model_dir = path_arg(unsafe { str_arg(modeldir, "modeldir") }?)?;
        registry().load(handle, &model_dir)
    })
}

/// Interpolate between `data0` (t = 0) and `data1` (t = 1) into `out_data`.
///
/// Returns 0 on success, a negative status for local precondition failures,
/// or the engine's status.
///
/// # Safety
///
/// Each non-null buffer must hold `width * height * elempack` bytes and stay
/// valid and unaliased by other writers for the duration of the call.
/// In-place output is not supported: an `out_data` range that overlaps
/// either input is rejected with `RIFE_ERR_INVALID_FRAME`.
#[no_mangle]
pub unsafe extern "C" fn rife_process_frames(
    ctx: u64,
    data0: *const u8,
    data1: *const u8,
    width: c_int,
    height: c_int,
    elempack: c_int,
    out_data: *mut u8,
    timestep: f32,
) -> c_int {
    guarded_status(|| {
        let handle = handle_arg(ctx)?;
        if data0.is_null() {
            return Err(BridgeError::NullArgument("data0"));
        }
        if data1.is_null() {
            return Err(BridgeError::NullArgument("data1"));
        }
        if out_data.is_null() {
            return Err(BridgeError::NullArgument("out_data"));
        }

        let shape = FrameShape::from_raw(width, height, elempack)?;
        let len = shape.element_count()?;
        let out_const = out_data as *const u8;
        if ranges_overlap(out_const, data0, len) || ranges_overlap(out_const, data1, len) {
            return Err(BridgeError::InvalidFrame(
                "output buffer overlaps an input buffer".to_string(),
            ));
        }

        let (frame0, frame1, out) = unsafe {
            (
                slice::from_raw_parts(data0, len),
                slice::from_raw_parts(data1, len),
                slice::from_raw_parts_mut(out_data, len),
            )
        };
        let frame0 = FrameView::new(frame0, shape)?;
        let frame1 = FrameView::new(frame1, shape)?;
        let mut out = FrameViewMut::new(out, shape)?;
        registry().interpolate(handle, &frame0, &frame1, timestep, &mut out)
    })
}

/// Number of usable accelerators. Never negative; needs no context.
#[no_mangle]
pub extern "C" fn rife_get_gpu_count() -> c_int {
    guarded(0, || Ok(registry().gpu_count()))
}

/// Message of the last failed call on this thread, or null. The pointer is
/// valid until the next call into this library from the same thread.
#[no_mangle]
pub extern "C" fn rife_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Install structured logging. `data_dir` may be null for stderr only;
/// otherwise logs rotate daily under `<data_dir>/logs`. `verbose` 1 selects
/// debug, 2 or more trace; `RUST_LOG` applies when `verbose` is 0.
///
/// Returns `RIFE_LOG_CONSOLE_AND_FILE`, `RIFE_LOG_CONSOLE_ONLY`,
/// `RIFE_LOG_ALREADY_INITIALIZED`, or a negative status.
///
/// # Safety
///
/// `data_dir` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rife_init_logging(data_dir: *const c_char, verbose: c_int) -> c_int {
    guarded_with(
        |error| error.status(),
        || {
            let data_dir = if data_dir.is_null() {
                None
            } else {
                Some(path_arg(unsafe { CStr::from_ptr(data_dir) })?)
            };
            let options = LoggingInitOptions {
                data_dir,
                verbose: verbose.clamp(0, u8::MAX as c_int) as u8,
                rust_log_env: std::env::var("RUST_LOG").ok(),
                ..Default::default()
            };
            let code = match logging::init_logging(&options) {
                LoggingInitReport::ConsoleAndFile { .. } => RIFE_LOG_CONSOLE_AND_FILE,
                LoggingInitReport::ConsoleOnly { .. } => RIFE_LOG_CONSOLE_ONLY,
                LoggingInitReport::AlreadyInitialized => RIFE_LOG_ALREADY_INITIALIZED,
            };
            Ok(code)
        },
    )
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn rife_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}
