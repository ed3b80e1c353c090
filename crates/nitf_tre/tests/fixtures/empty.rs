//! Handler module whose init function has no catalog to offer

use std::{ffi::c_char, ptr};

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn EMPTY_init() -> *const c_char {
    ptr::null()
}
