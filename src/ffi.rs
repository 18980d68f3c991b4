//! FFI bindings for Niblet Monitor
//!
//! This module provides C-compatible functions for embedding the monitor in
//! other runtimes. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `niblet_free_string`.
//!
//! Alerts are never delivered to a platform from here: the host reads the
//! `alert_dispatched` outputs (or drains the alert queue) and performs the
//! tone and notification calls itself.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};

use crate::adapter::HolisticFrame;
use crate::alert::{NotificationPermission, Outbox};
use crate::classifier::classify;
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::session::MonitorSession;
use crate::types::{MonitorEvent, SessionOutput, Visibility};

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

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn timestamp_from_ms(at_ms: i64) -> Result<DateTime<Utc>, MonitorError> {
    Utc.timestamp_millis_opt(at_ms)
        .single()
        .ok_or_else(|| MonitorError::InvalidFrame(format!("timestamp out of range: {at_ms}")))
}

fn parse_frame(json: &str) -> Result<HolisticFrame, MonitorError> {
    let frame: HolisticFrame = serde_json::from_str(json)?;
    frame
        .validate()
        .map_err(|e| MonitorError::InvalidFrame(e.to_string()))?;
    Ok(frame)
}

/// Serialize outputs, or record the error and return NULL
fn outputs_to_cstr(result: Result<Vec<SessionOutput>, MonitorError>) -> *mut c_char {
    match result.and_then(|outputs| serde_json::to_string(&outputs).map_err(MonitorError::from)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Classify a single frame and return the proximity result as JSON.
///
/// # Safety
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_classify(frame_json: *const c_char, threshold: f64) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(frame_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid frame string pointer");
            return ptr::null_mut();
        }
    };

    if !threshold.is_finite() || threshold <= 0.0 {
        set_last_error("Distance threshold must be a positive number");
        return ptr::null_mut();
    }

    let result = parse_frame(&json_str)
        .map(|frame| classify(&frame.to_observation(), threshold))
        .and_then(|proximity| serde_json::to_string(&proximity).map_err(MonitorError::from));

    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Session API
// ============================================================================

/// Opaque handle to a monitoring session
pub struct NibletSessionHandle {
    session: MonitorSession,
    alerts: Outbox,
}

/// Create a new session from a JSON configuration (NULL for defaults).
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a pointer to a newly allocated session; free with `niblet_session_free`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_new(config_json: *const c_char) -> *mut NibletSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(MonitorConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(s) => MonitorConfig::from_json(&s),
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    let alerts = Outbox::new();
    match config.and_then(|config| MonitorSession::new(config, alerts.channels(false))) {
        Ok(session) => Box::into_raw(Box::new(NibletSessionHandle { session, alerts })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_free(handle: *mut NibletSessionHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Start monitoring at `at_ms` (Unix epoch milliseconds).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a JSON array of outputs that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_start(handle: *mut NibletSessionHandle, at_ms: i64) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    outputs_to_cstr(timestamp_from_ms(at_ms).and_then(|at| handle.session.start(at)))
}

/// Stop monitoring and reset all session state.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_stop(handle: *mut NibletSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *handle;
    match handle.session.stop() {
        Ok(()) => {
            handle.alerts.drain();
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Feed one detector frame observed at `at_ms`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns a JSON array of outputs that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_frame(
    handle: *mut NibletSessionHandle,
    frame_json: *const c_char,
    at_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;

    let json_str = match cstr_to_string(frame_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid frame string pointer");
            return ptr::null_mut();
        }
    };

    outputs_to_cstr(parse_frame(&json_str).and_then(|frame| {
        let at = timestamp_from_ms(at_ms)?;
        Ok(handle
            .session
            .handle(at, MonitorEvent::FrameArrived(frame.to_observation())))
    }))
}

/// Deliver one reward tick.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a JSON array of outputs that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_tick_reward(handle: *mut NibletSessionHandle, at_ms: i64) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    outputs_to_cstr(timestamp_from_ms(at_ms).map(|at| handle.session.handle(at, MonitorEvent::RewardTick)))
}

/// Deliver one periodic alert tick.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a JSON array of outputs that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_tick_alert(handle: *mut NibletSessionHandle, at_ms: i64) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    outputs_to_cstr(timestamp_from_ms(at_ms).map(|at| handle.session.handle(at, MonitorEvent::AlertTick)))
}

/// Report a visibility change of the monitoring surface (`hidden` non-zero when hidden).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a JSON array of outputs that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_visibility(
    handle: *mut NibletSessionHandle,
    hidden: i32,
    at_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    let visibility = if hidden != 0 {
        Visibility::Hidden
    } else {
        Visibility::Visible
    };
    outputs_to_cstr(
        timestamp_from_ms(at_ms)
            .map(|at| handle.session.handle(at, MonitorEvent::VisibilityChanged(visibility))),
    )
}

/// Tell the session what the host's notification permission currently is.
///
/// `permission`: 0 = not yet asked, 1 = granted, 2 = denied.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_set_permission(handle: *mut NibletSessionHandle, permission: i32) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let permission = match permission {
        0 => NotificationPermission::Default,
        1 => NotificationPermission::Granted,
        2 => NotificationPermission::Denied,
        other => {
            set_last_error(&format!("Unknown permission value: {other}"));
            return -1;
        }
    };

    let handle = &mut *handle;
    handle.alerts.set_permission(permission);
    handle.alerts.set_prompt_answer(permission);
    0
}

/// Tell the session whether the host runs a background-delivery worker.
///
/// While one is registered, alerts raised with the surface hidden are queued
/// as `{"kind":"background","message":{"type":"BITE_ALERT"}}` for the host to
/// post to it.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_set_background_worker(
    handle: *mut NibletSessionHandle,
    registered: i32,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *handle;
    let channels = handle.alerts.channels(registered != 0);
    handle.session.replace_channels(channels);
    0
}

/// Press the notification toggle. Returns the toggle outcome as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a newly allocated string that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_toggle_notifications(handle: *mut NibletSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    match serde_json::to_string(&handle.session.toggle_notifications()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Press the sound toggle. Returns 1 when sound is now on, 0 when off, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_toggle_sound(handle: *mut NibletSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *handle;
    i32::from(handle.session.toggle_sound())
}

/// Take every alert queued for the host to deliver, as a JSON array.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a newly allocated string that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_drain_alerts(handle: *mut NibletSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &*handle;
    match serde_json::to_string(&handle.alerts.drain()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Current session state as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `niblet_session_new`.
/// - Returns a newly allocated string that must be freed with `niblet_free_string`.
/// - Returns NULL on error; call `niblet_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn niblet_session_snapshot(handle: *mut NibletSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &*handle;
    match serde_json::to_string(&handle.session.snapshot()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Niblet functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Niblet function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn niblet_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Niblet function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn niblet_last_error() -> *const c_char {
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
pub unsafe extern "C" fn niblet_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    const T0: i64 = 1_705_327_200_000;

    fn biting_frame() -> CString {
        let mut hand = vec![r#"{"x":0.9,"y":0.9}"#; 21];
        hand[8] = r#"{"x":0.5,"y":0.52}"#;
        CString::new(format!(
            r#"{{"mouth":{{"x":0.5,"y":0.5}},"leftHandLandmarks":[{}]}}"#,
            hand.join(",")
        ))
        .unwrap()
    }

    unsafe fn take_json(ptr: *mut c_char) -> serde_json::Value {
        assert!(!ptr.is_null());
        let value = serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap();
        niblet_free_string(ptr);
        value
    }

    #[test]
    fn test_ffi_classify() {
        let frame = biting_frame();
        unsafe {
            let result = take_json(niblet_classify(frame.as_ptr(), 0.08));
            assert_eq!(result["hand_near_mouth"], true);

            let none = CString::new("{}").unwrap();
            let result = take_json(niblet_classify(none.as_ptr(), 0.08));
            assert_eq!(result["hand_near_mouth"], false);
        }
    }

    #[test]
    fn test_ffi_session_lifecycle() {
        let config = CString::new(r#"{"bite_threshold_ms": 700}"#).unwrap();
        let frame = biting_frame();

        unsafe {
            let session = niblet_session_new(config.as_ptr());
            assert!(!session.is_null());
            assert_eq!(niblet_session_set_permission(session, 1), 0);

            let outcome = take_json(niblet_session_toggle_notifications(session));
            assert_eq!(outcome["affordance"]["pressed"], true);

            let started = take_json(niblet_session_start(session, T0));
            assert!(started.as_array().is_some_and(|a| !a.is_empty()));

            take_json(niblet_session_frame(session, frame.as_ptr(), T0));
            let outputs = take_json(niblet_session_frame(session, frame.as_ptr(), T0 + 700));
            let kinds: Vec<_> = outputs
                .as_array()
                .unwrap()
                .iter()
                .map(|o| o["type"].as_str().unwrap().to_string())
                .collect();
            assert!(kinds.contains(&"bite_sustained".to_string()));
            assert!(kinds.contains(&"alert_dispatched".to_string()));

            let alerts = take_json(niblet_session_drain_alerts(session));
            assert_eq!(alerts.as_array().map(|a| a.len()), Some(1));

            let snapshot = take_json(niblet_session_snapshot(session));
            assert_eq!(snapshot["alert_active"], true);

            take_json(niblet_session_tick_reward(session, T0 + 1000));
            take_json(niblet_session_tick_alert(session, T0 + 2000));
            take_json(niblet_session_visibility(session, 1, T0 + 2100));

            assert_eq!(niblet_session_stop(session), 0);
            assert_eq!(niblet_session_stop(session), -1);
            niblet_session_free(session);
        }
    }

    #[test]
    fn test_ffi_background_worker_receives_hidden_alerts() {
        let config = CString::new(r#"{"bite_threshold_ms": 700}"#).unwrap();
        let frame = biting_frame();

        unsafe {
            let session = niblet_session_new(config.as_ptr());
            assert!(!session.is_null());
            assert_eq!(niblet_session_set_permission(session, 1), 0);
            take_json(niblet_session_toggle_notifications(session));
            assert_eq!(niblet_session_set_background_worker(session, 1), 0);

            take_json(niblet_session_start(session, T0));
            take_json(niblet_session_visibility(session, 1, T0));
            take_json(niblet_session_frame(session, frame.as_ptr(), T0));
            take_json(niblet_session_frame(session, frame.as_ptr(), T0 + 700));

            let alerts = take_json(niblet_session_drain_alerts(session));
            assert_eq!(alerts.as_array().map(|a| a.len()), Some(1));
            assert_eq!(alerts[0]["kind"], "background");
            assert_eq!(alerts[0]["message"]["type"], "BITE_ALERT");

            assert_eq!(niblet_session_set_background_worker(ptr::null_mut(), 1), -1);
            niblet_session_free(session);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            assert!(niblet_session_new(invalid.as_ptr()).is_null());

            let error = niblet_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            assert!(niblet_session_start(ptr::null_mut(), T0).is_null());
            assert!(niblet_classify(ptr::null(), 0.08).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = niblet_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
