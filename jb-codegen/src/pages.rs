//! Append-only executable pages that hold generated stubs.
//!
//! A page is mapped read+write+execute, filled front to back, and sealed read+execute
//! once a stub no longer fits. Pages stay mapped for as long as their owner lives, so
//! every stub address handed out remains callable.

use crate::error::{CodegenError, CodegenResult};

/// One installed stub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trampoline {
    addr: usize,
    len: usize,
}

impl Trampoline {
    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.addr as *const u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct ExecutablePage {
    ptr: *mut u8,
    len: usize,
    used: usize,
    sealed: bool,
}

// The mapping is owned exclusively by this value; written bytes are never mutated again.
unsafe impl Send for ExecutablePage {}

impl ExecutablePage {
    pub fn map(len: usize) -> CodegenResult<Self> {
        if len == 0 {
            return Err(CodegenError::CodeGenFailed(
                "cannot map an empty executable page".to_string(),
            ));
        }
        let ptr = alloc_executable_region(len)?;
        Ok(Self {
            ptr,
            len,
            used: 0,
            sealed: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        if self.sealed { 0 } else { self.len - self.used }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn append(&mut self, code: &[u8]) -> CodegenResult<Trampoline> {
        if code.len() > self.remaining() {
            return Err(CodegenError::CodeGenFailed(format!(
                "stub of {} bytes does not fit in {} remaining bytes",
                code.len(),
                self.remaining()
            )));
        }
        // SAFETY: `used + code.len() <= len`, inside our own writable mapping.
        let dst = unsafe { self.ptr.add(self.used) };
        write_machine_code(dst, code)?;
        self.used += code.len();
        Ok(Trampoline {
            addr: dst as usize,
            len: code.len(),
        })
    }

    fn seal(&mut self) -> CodegenResult<()> {
        if self.sealed {
            return Ok(());
        }
        finalize_executable_region(self.ptr, self.len)?;
        self.sealed = true;
        Ok(())
    }
}

impl Drop for ExecutablePage {
    fn drop(&mut self) {
        let _ = free_executable_region(self.ptr, self.len);
    }
}

impl std::fmt::Debug for ExecutablePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutablePage")
            .field("addr", &(self.ptr as usize))
            .field("len", &self.len)
            .field("used", &self.used)
            .field("sealed", &self.sealed)
            .finish()
    }
}

/// The pages owned by one library; the last one is the only page still written to.
#[derive(Debug)]
pub struct TrampolinePages {
    pages: Vec<ExecutablePage>,
    page_size: usize,
}

impl TrampolinePages {
    pub fn new() -> CodegenResult<Self> {
        Ok(Self::with_page_size(system_page_size()?))
    }

    /// Pages of `page_size` bytes. Nothing is mapped until the first install.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.pages.iter().map(ExecutablePage::used).sum()
    }

    pub fn pages(&self) -> &[ExecutablePage] {
        &self.pages
    }

    /// Copies `code` into the current page, or into a fresh one when it does not fit.
    /// On failure nothing mapped by this call survives and earlier stubs are untouched.
    pub fn install(&mut self, code: &[u8]) -> CodegenResult<Trampoline> {
        if code.is_empty() {
            return Err(CodegenError::CodeGenFailed("empty stub".to_string()));
        }
        if code.len() > self.page_size {
            return Err(CodegenError::CodeGenFailed(format!(
                "stub of {} bytes exceeds the {} byte page",
                code.len(),
                self.page_size
            )));
        }

        if let Some(current) = self.pages.last_mut() {
            if current.remaining() >= code.len() {
                return current.append(code);
            }
        }

        self.pages.try_reserve(1).map_err(|err| {
            CodegenError::CodeGenFailed(format!("cannot grow page list: {err}"))
        })?;
        let mut page = ExecutablePage::map(self.page_size)?;
        let trampoline = page.append(code)?;
        if let Some(previous) = self.pages.last_mut() {
            previous.seal()?;
        }
        self.pages.push(page);
        Ok(trampoline)
    }
}

#[cfg(unix)]
fn system_page_size() -> CodegenResult<usize> {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        return Err(CodegenError::CodeGenFailed(format!(
            "sysconf(_SC_PAGESIZE) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(size as usize)
}

#[cfg(not(unix))]
fn system_page_size() -> CodegenResult<usize> {
    Err(CodegenError::CodeGenFailed(
        "executable pages are unsupported on this platform".to_string(),
    ))
}

#[cfg(unix)]
fn alloc_executable_region(len: usize) -> CodegenResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(CodegenError::CodeGenFailed(format!(
            "mmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(not(unix))]
fn alloc_executable_region(_len: usize) -> CodegenResult<*mut u8> {
    Err(CodegenError::CodeGenFailed(
        "executable pages are unsupported on this platform".to_string(),
    ))
}

#[cfg(unix)]
fn free_executable_region(ptr: *mut u8, len: usize) -> CodegenResult<()> {
    if ptr.is_null() {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        return Err(CodegenError::CodeGenFailed(format!(
            "munmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn free_executable_region(_ptr: *mut u8, _len: usize) -> CodegenResult<()> {
    Ok(())
}

fn write_machine_code(ptr: *mut u8, code: &[u8]) -> CodegenResult<()> {
    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
    }

    #[cfg(all(
        target_arch = "aarch64",
        any(target_os = "linux", target_os = "android")
    ))]
    unsafe {
        __clear_cache(
            ptr as *mut libc::c_char,
            ptr.add(code.len()) as *mut libc::c_char,
        );
    }

    Ok(())
}

#[cfg(unix)]
fn finalize_executable_region(ptr: *mut u8, len: usize) -> CodegenResult<()> {
    let rc = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        return Err(CodegenError::CodeGenFailed(format!(
            "mprotect(PROT_READ|PROT_EXEC) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn finalize_executable_region(_ptr: *mut u8, _len: usize) -> CodegenResult<()> {
    Ok(())
}

#[cfg(all(
    target_arch = "aarch64",
    any(target_os = "linux", target_os = "android")
))]
unsafe extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}
