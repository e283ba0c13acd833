//! The host's own dynamic loader, reached through entry points the bootstrap hands over
//! before the interposing exports shadow the system ones.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::path::Path;
use std::sync::OnceLock;

/// `android_dlextinfo::flags` bit selecting `library_namespace`.
pub const ANDROID_DLEXT_USE_NAMESPACE: u64 = 0x200;

/// Mirror of bionic's `android_dlextinfo`.
#[repr(C)]
#[derive(Debug)]
pub struct AndroidDlextinfo {
    pub flags: u64,
    pub reserved_addr: *mut c_void,
    pub reserved_size: usize,
    pub relro_fd: c_int,
    pub library_fd: c_int,
    pub library_fd_offset: i64,
    pub library_namespace: *mut c_void,
}

impl AndroidDlextinfo {
    pub fn with_namespace(namespace: usize) -> Self {
        Self {
            flags: ANDROID_DLEXT_USE_NAMESPACE,
            reserved_addr: std::ptr::null_mut(),
            reserved_size: 0,
            relro_fd: 0,
            library_fd: 0,
            library_fd_offset: 0,
            library_namespace: namespace as *mut c_void,
        }
    }
}

/// Handles and addresses are raw pointer values; zero means "not found".
pub trait PlatformLoader: Send + Sync {
    fn open(&self, filename: Option<&CStr>, flags: i32, caller: usize) -> Option<usize>;

    fn symbol(&self, handle: usize, symbol: &CStr, caller: usize) -> Option<usize>;

    fn open_ext(
        &self,
        filename: &CStr,
        flags: i32,
        extinfo: Option<&AndroidDlextinfo>,
        caller: usize,
    ) -> Option<usize>;

    fn exported_namespace(&self, name: &CStr) -> Option<usize>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub type LoaderDlopenFn = unsafe extern "C" fn(
    filename: *const c_char,
    flags: c_int,
    caller: *const c_void,
) -> *mut c_void;
pub type LoaderDlsymFn = unsafe extern "C" fn(
    handle: *mut c_void,
    symbol: *const c_char,
    caller: *const c_void,
) -> *mut c_void;
pub type LoaderDlopenExtFn = unsafe extern "C" fn(
    filename: *const c_char,
    flags: c_int,
    extinfo: *const AndroidDlextinfo,
    caller: *const c_void,
) -> *mut c_void;
type GetExportedNamespaceFn = unsafe extern "C" fn(name: *const c_char) -> *mut c_void;

/// [`PlatformLoader`] over the linker's private `__loader_*` entry points.
#[derive(Debug)]
pub struct LoaderProcs {
    dlopen: LoaderDlopenFn,
    dlsym: LoaderDlsymFn,
    dlopen_ext: LoaderDlopenExtFn,
    get_exported_namespace: OnceLock<Option<GetExportedNamespaceFn>>,
}

impl LoaderProcs {
    pub fn new(
        dlopen: LoaderDlopenFn,
        dlsym: LoaderDlsymFn,
        dlopen_ext: LoaderDlopenExtFn,
    ) -> Self {
        Self {
            dlopen,
            dlsym,
            dlopen_ext,
            get_exported_namespace: OnceLock::new(),
        }
    }

    fn namespace_lookup(&self) -> Option<GetExportedNamespaceFn> {
        *self.get_exported_namespace.get_or_init(|| {
            let caller = non_null as usize;
            let addr = self.symbol(0, c"android_get_exported_namespace", caller)?;
            // SAFETY: the platform exports this symbol with exactly this signature.
            Some(unsafe { std::mem::transmute::<usize, GetExportedNamespaceFn>(addr) })
        })
    }
}

fn non_null(ptr: *mut c_void) -> Option<usize> {
    if ptr.is_null() { None } else { Some(ptr as usize) }
}

impl PlatformLoader for LoaderProcs {
    fn open(&self, filename: Option<&CStr>, flags: i32, caller: usize) -> Option<usize> {
        let filename = filename.map_or(std::ptr::null(), CStr::as_ptr);
        // SAFETY: `filename` is null or NUL-terminated and outlives the call.
        non_null(unsafe { (self.dlopen)(filename, flags, caller as *const c_void) })
    }

    fn symbol(&self, handle: usize, symbol: &CStr, caller: usize) -> Option<usize> {
        let handle = if handle == 0 {
            libc::RTLD_DEFAULT
        } else {
            handle as *mut c_void
        };
        // SAFETY: handle came from the loader (or is a pseudo-handle); symbol is NUL-terminated.
        non_null(unsafe { (self.dlsym)(handle, symbol.as_ptr(), caller as *const c_void) })
    }

    fn open_ext(
        &self,
        filename: &CStr,
        flags: i32,
        extinfo: Option<&AndroidDlextinfo>,
        caller: usize,
    ) -> Option<usize> {
        let extinfo = extinfo.map_or(std::ptr::null(), |info| info as *const AndroidDlextinfo);
        // SAFETY: every pointer is either null or borrowed for the duration of the call.
        non_null(unsafe {
            (self.dlopen_ext)(filename.as_ptr(), flags, extinfo, caller as *const c_void)
        })
    }

    fn exported_namespace(&self, name: &CStr) -> Option<usize> {
        let lookup = self.namespace_lookup()?;
        // SAFETY: `name` is NUL-terminated.
        non_null(unsafe { lookup(name.as_ptr()) })
    }
}
