//! Handler module loaded by the registry tests

use std::ffi::c_char;

const CATALOG: &str = concat!(
    r#"
@tre BANDS
{NITF_BCS_N, 2, "Number of bands", "COUNT"},
{NITF_LOOP, 0, NULL, "COUNT"},
    {NITF_BCS_A, 3, "Band", "BAND"},
{NITF_ENDLOOP, 0, NULL, NULL},
{NITF_END, 0, NULL, NULL}
"#,
    "\0"
);

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn BANDS_init() -> *const c_char {
    CATALOG.as_ptr().cast()
}
