//! FFI bindings for KinetiCandles
//!
//! C-compatible functions over the JSON surface. Inputs are null-terminated
//! UTF-8 strings; returned strings are allocated here and must be released
//! with `kc_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::encoder::ReportEncoder;
use crate::error::EngineError;
use crate::ingest::parse_array;
use crate::patterns::PatternLibrary;
use crate::pipeline::{records_to_analysis, records_to_candles};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Config from an optional C string; NULL or empty selects the defaults
unsafe fn read_config(config_json: *const c_char) -> Result<EngineConfig, EngineError> {
    match cstr_to_string(config_json) {
        Some(json) if !json.trim().is_empty() => EngineConfig::from_json(&json),
        _ => Ok(EngineConfig::default()),
    }
}

/// Run `op` and hand its JSON result across the boundary
fn respond(op: impl FnOnce() -> Result<String, EngineError>) -> *mut c_char {
    match op() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Analyze a JSON array of raw records and return the encoded report.
///
/// # Safety
/// - `records_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - Returns a newly allocated string that must be freed with `kc_free_string`.
/// - Returns NULL on error; call `kc_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kc_analyze(records_json: *const c_char, config_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(records_str) = cstr_to_string(records_json) else {
        set_last_error("Invalid records string pointer");
        return ptr::null_mut();
    };

    respond(|| {
        let config = read_config(config_json)?;
        let records = parse_array(&records_str)?;
        let analysis = records_to_analysis(&records, &config)?;
        ReportEncoder::new().encode_to_json(&analysis)
    })
}

/// Bin a JSON array of raw records into candles at the configured resolution.
///
/// # Safety
/// - `records_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - Returns a newly allocated string that must be freed with `kc_free_string`.
/// - Returns NULL on error; call `kc_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kc_candles(records_json: *const c_char, config_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(records_str) = cstr_to_string(records_json) else {
        set_last_error("Invalid records string pointer");
        return ptr::null_mut();
    };

    respond(|| {
        let config = read_config(config_json)?;
        let records = parse_array(&records_str)?;
        let series = records_to_candles(&records, &config)?.into_result()?;
        Ok(serde_json::to_string(&series)?)
    })
}

/// Return the built-in pattern library as a JSON array.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `kc_free_string`.
#[no_mangle]
pub unsafe extern "C" fn kc_templates() -> *mut c_char {
    clear_last_error();
    respond(|| {
        let library = PatternLibrary::builtin(&EngineConfig::default().patterns.thresholds);
        Ok(serde_json::to_string(library.templates())?)
    })
}

/// Free a string returned by a `kc_*` function.
///
/// # Safety
/// - `ptr` must be a pointer returned by a `kc_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn kc_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next `kc_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn kc_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn kc_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
