// Raw FFI bindings to the libaria2 C++ shim (c/arialink_shim.h).
use libc::{c_char, c_int, c_void, size_t};

pub const RUN_ONCE: c_int = 1;

pub type EventCallback =
    unsafe extern "C" fn(event: c_int, gid: u64, user_data: *mut c_void) -> c_int;

unsafe extern "C" {
    pub fn arialink_library_init() -> c_int;
    pub fn arialink_library_deinit() -> c_int;

    pub fn arialink_session_new(
        keys: *const *const c_char,
        values: *const *const c_char,
        option_count: size_t,
        keep_running: c_int,
        use_signal_handler: c_int,
        callback: Option<EventCallback>,
        user_data: *mut c_void,
    ) -> *mut c_void;

    pub fn arialink_session_final(session: *mut c_void) -> c_int;

    pub fn arialink_run(session: *mut c_void, mode: c_int) -> c_int;

    pub fn arialink_shutdown(session: *mut c_void, force: c_int) -> c_int;

    pub fn arialink_add_uri(
        session: *mut c_void,
        uris: *const *const c_char,
        uri_count: size_t,
        keys: *const *const c_char,
        values: *const *const c_char,
        option_count: size_t,
        out_gid: *mut u64,
    ) -> c_int;
}
