//! C entry points that shadow the platform loader for every library linked after this
//! one. Until the bootstrap arms the linker they forward straight to the loader
//! entry points it installed.
//!
//! The platform loader picks the linker namespace from the caller address, so each
//! export is a naked shim that appends its own return address as an extra argument and
//! tail-calls the `*_from` body. Targets without a shim pass the export's address, which
//! puts every open in this library's namespace.
//!
//! Symbols are only unmangled with the `interpose` feature.
#![cfg_attr(not(feature = "interpose"), allow(dead_code))]

use std::ffi::{CStr, c_char, c_int, c_void};

use tracing::warn;

use crate::config::LinkerConfig;
use crate::interposer::open_in_vendor_namespace;
use crate::logging::{self, category_linker};
use crate::platform::{
    AndroidDlextinfo, LoaderDlopenExtFn, LoaderDlopenFn, LoaderDlsymFn, LoaderProcs,
    PlatformLoader,
};
use crate::process;

/// Defines `$export` with the platform signature and forwards to
/// `$body(args..., caller)`. `$aarch64`/`$x86_64` name the argument register that
/// receives the return address.
macro_rules! export_with_caller {
    (
        $export:ident => $body:ident($($arg:ident: $ty:ty),*),
        aarch64: $aarch64:literal,
        x86_64: $x86_64:literal
    ) => {
        #[cfg(target_arch = "aarch64")]
        #[unsafe(naked)]
        #[cfg_attr(feature = "interpose", unsafe(no_mangle))]
        pub unsafe extern "C" fn $export($($arg: $ty),*) -> *mut c_void {
            std::arch::naked_asm!(
                concat!("mov ", $aarch64, ", x30"),
                "b {body}",
                body = sym $body,
            )
        }

        #[cfg(target_arch = "x86_64")]
        #[unsafe(naked)]
        #[cfg_attr(feature = "interpose", unsafe(no_mangle))]
        pub unsafe extern "C" fn $export($($arg: $ty),*) -> *mut c_void {
            std::arch::naked_asm!(
                concat!("mov ", $x86_64, ", [rsp]"),
                "jmp {body}",
                body = sym $body,
            )
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        #[cfg_attr(feature = "interpose", unsafe(no_mangle))]
        pub unsafe extern "C" fn $export($($arg: $ty),*) -> *mut c_void {
            unsafe { $body($($arg,)* $export as usize) }
        }
    };
}

export_with_caller!(
    dlopen => dlopen_from(filename: *const c_char, flags: c_int),
    aarch64: "x2",
    x86_64: "rdx"
);
export_with_caller!(
    dlsym => dlsym_from(handle: *mut c_void, symbol: *const c_char),
    aarch64: "x2",
    x86_64: "rdx"
);
export_with_caller!(
    android_dlopen_ext => android_dlopen_ext_from(
        filename: *const c_char,
        flags: c_int,
        extinfo: *const AndroidDlextinfo
    ),
    aarch64: "x3",
    x86_64: "rcx"
);
export_with_caller!(
    android_load_sphal_library => android_load_sphal_library_from(
        filename: *const c_char,
        flags: c_int
    ),
    aarch64: "x2",
    x86_64: "rdx"
);

fn to_ptr(handle: Option<usize>) -> *mut c_void {
    handle.map_or(std::ptr::null_mut(), |handle| handle as *mut c_void)
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) })
    }
}

unsafe extern "C" fn dlopen_from(
    filename: *const c_char,
    flags: c_int,
    caller: usize,
) -> *mut c_void {
    let filename = unsafe { c_str(filename) };
    match process::armed() {
        Ok(context) => to_ptr(context.open(filename, flags, caller)),
        Err(_) => match process::loader_procs() {
            Some(procs) => to_ptr(procs.open(filename, flags, caller)),
            None => std::ptr::null_mut(),
        },
    }
}

unsafe extern "C" fn dlsym_from(
    handle: *mut c_void,
    symbol: *const c_char,
    caller: usize,
) -> *mut c_void {
    let Some(symbol) = (unsafe { c_str(symbol) }) else {
        return std::ptr::null_mut();
    };
    match process::armed() {
        Ok(context) => to_ptr(context.symbol(handle as usize, symbol, caller)),
        Err(_) => match process::loader_procs() {
            Some(procs) => to_ptr(procs.symbol(handle as usize, symbol, caller)),
            None => std::ptr::null_mut(),
        },
    }
}

unsafe extern "C" fn android_dlopen_ext_from(
    filename: *const c_char,
    flags: c_int,
    extinfo: *const AndroidDlextinfo,
    caller: usize,
) -> *mut c_void {
    let Some(filename) = (unsafe { c_str(filename) }) else {
        return std::ptr::null_mut();
    };
    // SAFETY: the caller passes null or a valid dlextinfo for the duration of the call.
    let extinfo = unsafe { extinfo.as_ref() };
    match process::armed() {
        Ok(context) => to_ptr(context.open_ext(filename, flags, extinfo, caller)),
        Err(_) => match process::loader_procs() {
            Some(procs) => to_ptr(procs.open_ext(filename, flags, extinfo, caller)),
            None => std::ptr::null_mut(),
        },
    }
}

unsafe extern "C" fn android_load_sphal_library_from(
    filename: *const c_char,
    flags: c_int,
    caller: usize,
) -> *mut c_void {
    let Some(filename) = (unsafe { c_str(filename) }) else {
        return std::ptr::null_mut();
    };
    match process::armed() {
        Ok(context) => to_ptr(context.open_vendor(filename, flags, caller)),
        Err(_) => match process::loader_procs() {
            Some(procs) => {
                let namespaces = LinkerConfig::default().vendor_namespaces;
                to_ptr(open_in_vendor_namespace(
                    &*procs,
                    &namespaces,
                    filename,
                    flags,
                    caller,
                ))
            }
            None => {
                warn!(
                    "{} no loader entry points; cannot open {}",
                    category_linker(),
                    filename.to_string_lossy()
                );
                std::ptr::null_mut()
            }
        },
    }
}

/// Hands over the platform loader's own entry points and sets up logging. Must run
/// before anything is opened through the exports above.
#[cfg_attr(feature = "interpose", unsafe(no_mangle))]
pub extern "C" fn jb_linker_set_proc_addrs(
    dlopen: Option<LoaderDlopenFn>,
    dlsym: Option<LoaderDlsymFn>,
    dlopen_ext: Option<LoaderDlopenExtFn>,
) {
    // The host may already have installed a subscriber.
    let _ = logging::init();
    match (dlopen, dlsym, dlopen_ext) {
        (Some(dlopen), Some(dlsym), Some(dlopen_ext)) => {
            process::install_loader_procs(LoaderProcs::new(dlopen, dlsym, dlopen_ext));
        }
        _ => warn!("{} ignoring incomplete loader entry points", category_linker()),
    }
}

#[cfg_attr(feature = "interpose", unsafe(no_mangle))]
pub extern "C" fn jb_linker_set_vulkan_loader_handle(handle: *mut c_void) {
    process::set_vulkan_loader_handle(handle as usize);
}

#[cfg_attr(feature = "interpose", unsafe(no_mangle))]
pub extern "C" fn jb_linker_set_vulkan_driver_handle(handle: *mut c_void) {
    process::set_vulkan_driver_handle(handle as usize);
}
