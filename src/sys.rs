use std::io;

/// Page-granular virtual memory operations needed to build a guarded region.
///
/// Each operating-system family implements this trait once. The region code
/// is generic over `VirtualMemory`, so every platform difference lives in the
/// implementations below and nowhere else.
pub trait VirtualMemory {
    /// Size of one memory page in bytes. Always a power of two.
    fn page_size() -> usize;

    /// Reserve and commit `len` bytes of zeroed, readable and writable memory.
    ///
    /// `len` is a non-zero multiple of `page_size()`.
    ///
    /// # Safety
    ///
    /// The returned mapping must eventually be passed to `release` with the
    /// same `len`, exactly once.
    unsafe fn reserve(len: usize) -> io::Result<*mut u8>;

    /// Make `len` bytes starting at `ptr` inaccessible (no read, write or execute).
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must be page-aligned and lie inside a live reservation.
    unsafe fn protect_guard(ptr: *mut u8, len: usize) -> io::Result<()>;

    /// Return an entire reservation to the operating system.
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must be exactly what `reserve` returned and was given.
    /// Nothing may touch the memory afterwards.
    unsafe fn release(ptr: *mut u8, len: usize) -> io::Result<()>;
}

/// The host operating system's virtual memory facility.
pub struct Os;

#[cfg(unix)]
impl VirtualMemory for Os {
    fn page_size() -> usize {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    }

    unsafe fn reserve(len: usize) -> io::Result<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(ptr as *mut u8)
    }

    unsafe fn protect_guard(ptr: *mut u8, len: usize) -> io::Result<()> {
        let rc = unsafe { libc::mprotect(ptr as *mut libc::c_void, len, libc::PROT_NONE) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn release(ptr: *mut u8, len: usize) -> io::Result<()> {
        let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
impl VirtualMemory for Os {
    fn page_size() -> usize {
        use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        info.dwPageSize as usize
    }

    unsafe fn reserve(len: usize) -> io::Result<*mut u8> {
        use windows_sys::Win32::System::Memory::{
            MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc,
        };

        let ptr = unsafe {
            VirtualAlloc(std::ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        if ptr.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(ptr as *mut u8)
    }

    unsafe fn protect_guard(ptr: *mut u8, len: usize) -> io::Result<()> {
        use windows_sys::Win32::System::Memory::{PAGE_NOACCESS, VirtualProtect};

        let mut old = 0;
        let ok = unsafe { VirtualProtect(ptr as *const _, len, PAGE_NOACCESS, &mut old) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn release(ptr: *mut u8, _len: usize) -> io::Result<()> {
        use windows_sys::Win32::System::Memory::{MEM_RELEASE, VirtualFree};

        // MEM_RELEASE requires a size of zero and frees the whole reservation.
        let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let page = Os::page_size();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn test_reserve_is_zeroed_and_writable() {
        let page = Os::page_size();
        unsafe {
            let ptr = Os::reserve(page * 2).unwrap();
            let bytes = std::slice::from_raw_parts_mut(ptr, page * 2);
            assert!(bytes.iter().all(|&b| b == 0));
            bytes[0] = 7;
            bytes[page * 2 - 1] = 9;
            assert_eq!(bytes[0], 7);
            Os::release(ptr, page * 2).unwrap();
        }
    }

    #[test]
    fn test_protect_then_release() {
        let page = Os::page_size();
        unsafe {
            let ptr = Os::reserve(page * 3).unwrap();
            Os::protect_guard(ptr, page).unwrap();
            Os::protect_guard(ptr.add(page * 2), page).unwrap();
            // The middle page is still usable.
            *ptr.add(page) = 1;
            assert_eq!(*ptr.add(page), 1);
            Os::release(ptr, page * 3).unwrap();
        }
    }
}
