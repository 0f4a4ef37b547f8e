//! FFI bindings for Synheart Body
//!
//! This module provides C-compatible functions for driving the engine from a
//! host app (Kotlin/Swift UI layers). All functions use C strings
//! (null-terminated) and return allocated memory that must be freed by the
//! caller using `body_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::engine::RecomputeEngine;
use crate::store::InMemoryStore;
use crate::types::{MetricName, RawMetric, Sample};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Read a required string argument
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("Null {name} pointer"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| format!("{name} is not valid UTF-8: {e}"))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid RFC 3339 timestamp {s:?}: {e}"))
}

fn parse_raw_metric(s: &str) -> Result<RawMetric, String> {
    s.parse::<RawMetric>().map_err(|e| e.to_string())
}

/// Return a string result, or NULL with the last error set
fn string_result(result: Result<String, String>) -> *mut c_char {
    match result {
        Ok(s) => string_to_cstr(&s),
        Err(msg) => {
            set_last_error(&msg);
            ptr::null_mut()
        }
    }
}

/// Return 0 on success, or -1 with the last error set
fn status_result(result: Result<(), String>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(msg) => {
            set_last_error(&msg);
            -1
        }
    }
}

// ============================================================================
// Engine API
// ============================================================================

/// Opaque handle to a RecomputeEngine
pub struct BodyEngineHandle {
    config: EngineConfig,
    engine: RecomputeEngine,
}

/// Create a new engine with an empty in-memory store.
///
/// # Safety
/// - `config_json` may be NULL (defaults) or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `body_engine_free`.
/// - Returns NULL on error; call `body_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn body_engine_new(config_json: *const c_char) -> *mut BodyEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let parsed = required_arg(config_json, "config")
            .and_then(|json| EngineConfig::from_json(&json).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(msg) => {
                set_last_error(&msg);
                return ptr::null_mut();
            }
        }
    };

    match RecomputeEngine::from_config(&config, InMemoryStore::new()) {
        Ok(engine) => Box::into_raw(Box::new(BodyEngineHandle { config, engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn body_engine_free(handle: *mut BodyEngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Replace the engine's store with one loaded from JSON, then rebuild.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn body_engine_load_store(
    handle: *mut BodyEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *handle;

    status_result((|| -> Result<(), String> {
        let json = required_arg(json, "JSON")?;
        let store = InMemoryStore::from_json(&json).map_err(|e| e.to_string())?;
        let mut engine =
            RecomputeEngine::from_config(&handle.config, store).map_err(|e| e.to_string())?;
        engine.rebuild_all().map_err(|e| e.to_string())?;
        handle.engine = engine;
        Ok(())
    })())
}

/// Serialize the engine's store to JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - Returns a newly allocated string that must be freed with `body_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn body_engine_save_store(handle: *const BodyEngineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    string_result(handle.engine.store().to_json().map_err(|e| e.to_string()))
}

/// Record a raw measurement.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - `metric` and `timestamp` must be valid null-terminated C strings;
///   `timestamp` is RFC 3339.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn body_engine_record(
    handle: *mut BodyEngineHandle,
    metric: *const c_char,
    value: f64,
    timestamp: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *handle;

    status_result((|| -> Result<(), String> {
        let metric = parse_raw_metric(&required_arg(metric, "metric")?)?;
        let at = parse_timestamp(&required_arg(timestamp, "timestamp")?)?;
        handle
            .engine
            .on_raw_changed(metric, value, at)
            .map_err(|e| e.to_string())
    })())
}

/// Delete a raw measurement by exact `(metric, value, timestamp)`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - `metric` and `timestamp` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn body_engine_delete(
    handle: *mut BodyEngineHandle,
    metric: *const c_char,
    value: f64,
    timestamp: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *handle;

    status_result((|| -> Result<(), String> {
        let metric = parse_raw_metric(&required_arg(metric, "metric")?)?;
        let at = parse_timestamp(&required_arg(timestamp, "timestamp")?)?;
        let sample = Sample::raw(metric, value, at);
        handle
            .engine
            .on_delete(metric, &sample)
            .map_err(|e| e.to_string())
    })())
}

/// History of any metric as a JSON array. Derived histories never fail;
/// they come back empty if the store cannot be read.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - `metric` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `body_free_string`.
#[no_mangle]
pub unsafe extern "C" fn body_engine_history(
    handle: *mut BodyEngineHandle,
    metric: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    string_result((|| -> Result<String, String> {
        let metric: MetricName = required_arg(metric, "metric")?
            .parse()
            .map_err(|e: crate::error::MetricsError| e.to_string())?;
        let samples = match metric {
            MetricName::Raw(m) => handle.engine.raw_history(m).map_err(|e| e.to_string())?,
            MetricName::Derived(m) => handle.engine.history(m),
        };
        serde_json::to_string(&samples).map_err(|e| e.to_string())
    })())
}

/// Latest value per raw metric as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - Returns a newly allocated string that must be freed with `body_free_string`.
#[no_mangle]
pub unsafe extern "C" fn body_engine_profile(handle: *const BodyEngineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    string_result(
        handle
            .engine
            .profile_snapshot()
            .map_err(|e| e.to_string())
            .and_then(|p| serde_json::to_string(&p).map_err(|e| e.to_string())),
    )
}

/// Rebuild every derived series; returns the rebuild summary as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `body_engine_new`.
/// - Returns a newly allocated string that must be freed with `body_free_string`.
#[no_mangle]
pub unsafe extern "C" fn body_engine_rebuild(handle: *mut BodyEngineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    string_result(
        handle
            .engine
            .rebuild_all()
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::to_string(&s).map_err(|e| e.to_string())),
    )
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Body functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Body function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn body_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Body function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn body_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn body_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
