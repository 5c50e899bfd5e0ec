use std::io;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use thiserror::Error;

use crate::sys::{Os, VirtualMemory};

/// Which guard page an operation concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardSide {
    /// The page immediately before the tape.
    Underflow,
    /// The page immediately after the tape.
    Overflow,
}

impl std::fmt::Display for GuardSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardSide::Underflow => f.write_str("underflow"),
            GuardSide::Overflow => f.write_str("overflow"),
        }
    }
}

/// Failures while acquiring or releasing a guarded region.
///
/// Two kinds, told apart by [`RegionError::is_allocation_failure`]:
/// allocation failures (`EmptyTape`, `TooLarge`, `Reserve`, `Protect`) and
/// the release failure (`Release`). Both are fatal for a running program:
/// there is no degraded mode without guard pages, and a failed release means
/// the handle was corrupted.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The tape size was zero.
    #[error("Failed to allocate memory: tape size must be positive")]
    EmptyTape,

    /// The page-rounded reservation does not fit in the address space.
    #[error("Failed to allocate memory: tape size {0} is too large")]
    TooLarge(usize),

    /// The operating system declined the reservation.
    #[error("Failed to allocate memory: {0}")]
    Reserve(#[source] io::Error),

    /// A guard page could not be made inaccessible.
    #[error("Failed to protect {side} page: {source}")]
    Protect {
        side: GuardSide,
        #[source]
        source: io::Error,
    },

    /// The operating system declined to release the reservation.
    #[error("Failed to free memory: {0}")]
    Release(#[source] io::Error),
}

impl RegionError {
    /// True for every failure to set up the region, false for release failures.
    pub fn is_allocation_failure(&self) -> bool {
        !matches!(self, RegionError::Release(_))
    }
}

/// A zero-initialized byte tape bracketed by two inaccessible guard pages.
///
/// Layout of the reservation, in pages:
///
/// ```text
/// [ guard ][ tape (len rounded up to whole pages) ][ guard ]
///          ^ as_ptr()
/// ```
///
/// Any access one byte before `as_ptr()` or at `as_ptr() + usable_len()`
/// lands in a guard page and faults. The region is released exactly once,
/// either by `release` or on drop.
pub struct GuardedRegion<V: VirtualMemory = Os> {
    tape: NonNull<u8>,
    len: usize,
    usable_len: usize,
    page_size: usize,
    _backend: PhantomData<V>,
}

impl GuardedRegion<Os> {
    /// Acquire a guarded tape of `tape_size` bytes from the host OS.
    pub fn acquire(tape_size: usize) -> Result<Self, RegionError> {
        Self::acquire_with(tape_size)
    }
}

impl<V: VirtualMemory> GuardedRegion<V> {
    /// Acquire a guarded tape of `tape_size` bytes from backend `V`.
    ///
    /// Reserves `ceil(tape_size / page) + 2` pages and protects the first and
    /// last. If either guard cannot be installed the reservation is returned
    /// to the OS before the error is reported.
    pub fn acquire_with(tape_size: usize) -> Result<Self, RegionError> {
        if tape_size == 0 {
            return Err(RegionError::EmptyTape);
        }
        let page_size = V::page_size();
        let usable_len = round_up_to_page(tape_size, page_size)
            .ok_or(RegionError::TooLarge(tape_size))?;
        let total = usable_len
            .checked_add(page_size * 2)
            .ok_or(RegionError::TooLarge(tape_size))?;

        let base = unsafe { V::reserve(total) }.map_err(RegionError::Reserve)?;

        let guards = [
            (GuardSide::Underflow, base),
            (GuardSide::Overflow, base.wrapping_add(total - page_size)),
        ];
        for (side, page) in guards {
            if let Err(source) = unsafe { V::protect_guard(page, page_size) } {
                // Best effort: the protect error is the one worth reporting.
                let _ = unsafe { V::release(base, total) };
                return Err(RegionError::Protect { side, source });
            }
        }

        let tape = NonNull::new(base.wrapping_add(page_size))
            .ok_or_else(|| RegionError::Reserve(io::Error::other("null reservation")))?;

        Ok(Self {
            tape,
            len: tape_size,
            usable_len,
            page_size,
            _backend: PhantomData,
        })
    }

    /// Pointer to the first usable byte, just past the leading guard page.
    pub fn as_ptr(&self) -> *mut u8 {
        self.tape.as_ptr()
    }

    /// The requested tape size.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a region holds at least one byte.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The tape size rounded up to whole pages. The trailing guard page
    /// starts at `as_ptr() + usable_len()`.
    pub fn usable_len(&self) -> usize {
        self.usable_len
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.tape.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.tape.as_ptr(), self.len) }
    }

    /// Release the tape and both guard pages as one unit.
    pub fn release(self) -> Result<(), RegionError> {
        let this = ManuallyDrop::new(self);
        unsafe { this.unmap() }
    }

    /// # Safety
    ///
    /// Must be called at most once per region.
    unsafe fn unmap(&self) -> Result<(), RegionError> {
        let base = self.tape.as_ptr().wrapping_sub(self.page_size);
        let total = self.usable_len + self.page_size * 2;
        unsafe { V::release(base, total) }.map_err(RegionError::Release)
    }
}

impl<V: VirtualMemory> Drop for GuardedRegion<V> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.unmap() } {
            eprintln!("Assertion failed: {e}");
            std::process::abort();
        }
    }
}

impl<V: VirtualMemory> std::fmt::Debug for GuardedRegion<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedRegion")
            .field("tape", &self.tape)
            .field("len", &self.len)
            .field("usable_len", &self.usable_len)
            .field("page_size", &self.page_size)
            .finish()
    }
}

fn round_up_to_page(size: usize, page_size: usize) -> Option<usize> {
    debug_assert!(page_size.is_power_of_two());
    Some(size.checked_add(page_size - 1)? & !(page_size - 1))
}
