//! FFI interface for C/C++ interop
//!
//! Provides a C-compatible function for extracting a table from HTML.
//! The request and the result are passed as JSON.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::Serialize;

use crate::table::{HtmlPage, Record, TableRequest};

/// Result struct returned to C/C++
/// Both pointers are owned by Rust and must be freed via free_table_result
#[repr(C)]
pub struct TableResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message if extraction failed (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct TableResponse<'a> {
    records: &'a [Record],
}

/// Extract table records from HTML according to a JSON `TableRequest`.
///
/// # Arguments
/// * `html_ptr` - Pointer to HTML content (UTF-8, not necessarily null-terminated)
/// * `html_len` - Length of HTML content in bytes
/// * `request_json` - JSON-serialized TableRequest (null-terminated)
///
/// # Returns
/// TableResultFFI with either json_ptr set (`{"records": [...]}`) or error_ptr set
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `request_json` must be a valid null-terminated C string
/// - Caller must free the result via `free_table_result`
#[no_mangle]
pub unsafe extern "C" fn extract_table_from_html(
    html_ptr: *const c_char,
    html_len: usize,
    request_json: *const c_char,
) -> TableResultFFI {
    let html = if html_ptr.is_null() || html_len == 0 {
        ""
    } else {
        let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
        match std::str::from_utf8(slice) {
            Ok(s) => s,
            Err(_) => return make_error_result("Invalid UTF-8 in HTML content"),
        }
    };

    if request_json.is_null() {
        return make_error_result("Request JSON is null");
    }
    let request_str = match CStr::from_ptr(request_json).to_str() {
        Ok(s) => s,
        Err(_) => return make_error_result("Invalid UTF-8 in request JSON"),
    };

    let request = match TableRequest::from_json(request_str) {
        Ok(r) => r,
        Err(e) => return make_error_result(&e.to_string()),
    };

    let page = HtmlPage::parse(html);
    let records = match request.run(&page) {
        Ok(records) => records,
        Err(e) => return make_error_result(&e.to_string()),
    };

    match serde_json::to_string(&TableResponse { records: &records }) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => TableResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

/// Free a TableResultFFI returned by extract_table_from_html
///
/// # Safety
/// - `result` must have been returned by `extract_table_from_html`
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn free_table_result(result: TableResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

fn make_error_result(msg: &str) -> TableResultFFI {
    let error_cstr = CString::new(msg.replace('\0', ""))
        .unwrap_or_else(|_| CString::from(c"Unknown error"));
    TableResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}
