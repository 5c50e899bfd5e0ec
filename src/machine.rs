use std::io::{self, Read, Write};

use thiserror::Error;

use crate::region::{GuardedRegion, RegionError};

/// What `Read` stores when the input source is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofBehavior {
    /// Store this byte. `Sentinel(0xFF)` matches C's `getchar` EOF truncated to a byte.
    Sentinel(u8),
    /// Leave the cell as it was.
    Unchanged,
}

/// Configuration for a tape machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Tape length in bytes. Rounded up to whole pages by the allocator.
    pub tape_size: usize,
    /// End-of-input policy for `Read`.
    pub eof: EofBehavior,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            tape_size: 30000,
            eof: EofBehavior::Sentinel(0xFF),
        }
    }
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A data pointer over a guarded tape, plus the byte streams `Read` and
/// `Write` talk to.
///
/// The primitives never check bounds. Each tape-touching primitive is an
/// `unsafe fn` whose contract is that `dp + offset` lies within the tape;
/// a violation that lands in a guard page kills the process with an access
/// fault, which is the intended failure mode. `select` only does pointer
/// arithmetic and is safe on its own.
pub struct TapeMachine<R, W> {
    region: GuardedRegion,
    dp: *mut u8,
    eof: EofBehavior,
    input: R,
    output: W,
}

impl<R: Read, W: Write> TapeMachine<R, W> {
    /// Acquire a zeroed guarded tape and point `dp` at its first byte.
    pub fn new(config: &MachineConfig, input: R, output: W) -> Result<Self, RegionError> {
        let region = GuardedRegion::acquire(config.tape_size)?;
        let dp = region.as_ptr();
        Ok(Self {
            region,
            dp,
            eof: config.eof,
            input,
            output,
        })
    }

    #[inline(always)]
    fn cell(&self, offset: isize) -> *mut u8 {
        self.dp.wrapping_offset(offset)
    }

    /// `*(dp + offset) += delta`, wrapping.
    ///
    /// # Safety
    ///
    /// `dp + offset` must lie within the tape.
    #[inline(always)]
    pub unsafe fn adjust(&mut self, offset: isize, delta: u8) {
        let cell = self.cell(offset);
        unsafe { *cell = (*cell).wrapping_add(delta) };
    }

    /// `dp += delta`. Not checked; the next dereference faults if `dp` left the tape.
    #[inline(always)]
    pub fn select(&mut self, delta: isize) {
        self.dp = self.dp.wrapping_offset(delta);
    }

    /// `*(dp + offset) = next input byte`, blocking until one is available.
    ///
    /// # Safety
    ///
    /// `dp + offset` must lie within the tape.
    #[inline]
    pub unsafe fn read(&mut self, offset: isize) -> io::Result<()> {
        let mut buf = [0u8; 1];
        let value = match self.input.read_exact(&mut buf) {
            Ok(()) => Some(buf[0]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => match self.eof {
                EofBehavior::Sentinel(b) => Some(b),
                EofBehavior::Unchanged => None,
            },
            Err(e) => return Err(e),
        };
        if let Some(value) = value {
            unsafe { *self.cell(offset) = value };
        }
        Ok(())
    }

    /// Emit `*(dp + offset)` and flush.
    ///
    /// # Safety
    ///
    /// `dp + offset` must lie within the tape.
    #[inline]
    pub unsafe fn write(&mut self, offset: isize) -> io::Result<()> {
        let byte = unsafe { *self.cell(offset) };
        self.output.write_all(&[byte])?;
        self.output.flush()
    }

    /// `*(dp + offset) = value`
    ///
    /// # Safety
    ///
    /// `dp + offset` must lie within the tape.
    #[inline(always)]
    pub unsafe fn set(&mut self, offset: isize, value: u8) {
        unsafe { *self.cell(offset) = value };
    }

    /// `*(dp + offset) += *dp * factor`, wrapping. The current cell is unchanged.
    ///
    /// # Safety
    ///
    /// Both `dp` and `dp + offset` must lie within the tape.
    #[inline(always)]
    pub unsafe fn multiply_add(&mut self, offset: isize, factor: u8) {
        let source = unsafe { *self.dp };
        let target = self.cell(offset);
        unsafe { *target = (*target).wrapping_add(source.wrapping_mul(factor)) };
    }

    /// True when the loop at the current position should run (`*dp != 0`).
    ///
    /// # Safety
    ///
    /// `dp` must lie within the tape.
    #[inline(always)]
    pub unsafe fn is_nonzero(&self) -> bool {
        unsafe { *self.dp != 0 }
    }

    /// Move `dp` to the nearest zero cell at or before it.
    ///
    /// `*dp` is read first, so a `dp` left in a guard page (for example by a
    /// previous scan that found no zero) faults here. From a cell on the tape
    /// the scan never reads before the tape start; if no zero is found, `dp`
    /// is left one byte before the tape, in the underflow guard page. From a
    /// cell off the tape it steps one byte at a time.
    ///
    /// # Safety
    ///
    /// `dp` must lie within the tape.
    #[inline]
    pub unsafe fn scan_left(&mut self) {
        if unsafe { std::ptr::read_volatile(self.dp) } == 0 {
            return;
        }
        let base = self.region.as_ptr();
        let Some(index) = self.tape_index() else {
            unsafe { self.step_until_zero(-1) };
            return;
        };
        let before = unsafe { std::slice::from_raw_parts(base, index + 1) };
        self.dp = match before.iter().rposition(|&b| b == 0) {
            Some(found) => base.wrapping_add(found),
            None => base.wrapping_sub(1),
        };
    }

    /// Move `dp` to the nearest zero cell at or after it.
    ///
    /// `*dp` is read first, as in `scan_left`. From a cell on the tape the
    /// scan is bounded by the remaining tape length; if no zero is found,
    /// `dp` is left at the first byte after the tape. From a cell off the
    /// tape it steps one byte at a time.
    ///
    /// # Safety
    ///
    /// `dp` must lie within the tape.
    #[inline]
    pub unsafe fn scan_right(&mut self) {
        if unsafe { std::ptr::read_volatile(self.dp) } == 0 {
            return;
        }
        let base = self.region.as_ptr();
        let Some(index) = self.tape_index() else {
            unsafe { self.step_until_zero(1) };
            return;
        };
        let remaining = self.region.len() - index;
        let after = unsafe { std::slice::from_raw_parts(self.dp, remaining) };
        self.dp = match after.iter().position(|&b| b == 0) {
            Some(found) => self.dp.wrapping_add(found),
            None => base.wrapping_add(self.region.len()),
        };
    }

    /// Index of `dp` if it is on the tape.
    fn tape_index(&self) -> Option<usize> {
        usize::try_from(self.data_pointer())
            .ok()
            .filter(|&index| index < self.region.len())
    }

    /// Sequential scan: move by `step` until `*dp == 0`. Every cell is read,
    /// so walking into a guard page faults.
    unsafe fn step_until_zero(&mut self, step: isize) {
        while unsafe { std::ptr::read_volatile(self.dp) } != 0 {
            self.dp = self.dp.wrapping_offset(step);
        }
    }

    /// Position of `dp` relative to the tape start. Negative or `>= len()`
    /// once a movement has walked off the tape.
    pub fn data_pointer(&self) -> isize {
        (self.dp as isize).wrapping_sub(self.region.as_ptr() as isize)
    }

    /// Point `dp` at `index` without a bounds check on later use.
    pub fn set_data_pointer(&mut self, index: usize) {
        self.dp = self.region.as_ptr().wrapping_add(index);
    }

    /// Tape length in bytes, as configured.
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn tape(&self) -> &[u8] {
        self.region.as_slice()
    }

    pub fn tape_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Release the tape and guard pages, handing back the output stream.
    pub fn release(self) -> Result<W, RegionError> {
        self.region.release()?;
        Ok(self.output)
    }
}
