//! Memory-bound page touch kernel.

use std::alloc::Layout;
use std::alloc::{self};
use std::ptr;
use std::ptr::NonNull;
use std::thread;
use std::time::Duration;

use crate::error::KernelError;

/// Default buffer size: 256 MiB.
pub const DEFAULT_SIZE: usize = 256 * 1024 * 1024;

/// Distance between touched bytes.
pub const PAGE_STRIDE: usize = 4096;

/// A zeroed, page-aligned heap buffer.
///
/// The allocation is released when the buffer is dropped.
pub struct PageBuffer {
    data: NonNull<u8>,
    layout: Layout,
}

impl PageBuffer {
    /// Allocate `size` zeroed bytes.
    ///
    /// # Returns
    ///
    /// The buffer, or `KernelError::Allocation` if `size` is zero, does not form a
    /// valid layout, or the allocator refuses it.
    pub fn allocate(size: usize) -> Result<Self, KernelError> {
        if size == 0 {
            return Err(KernelError::Allocation { size });
        }
        let layout = Layout::from_size_align(size, PAGE_STRIDE)
            .map_err(|_| KernelError::Allocation { size })?;

        // Pages of a large zeroed allocation are mapped lazily, so the sweeps below
        // are what fault them in.
        let data = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(data)
            .map(|data| Self { data, layout })
            .ok_or(KernelError::Allocation { size })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `value` to the first byte of every page.
    ///
    /// # Returns
    ///
    /// The number of pages touched.
    pub fn sweep(&mut self, value: u8) -> usize {
        let mut pages = 0;
        for offset in (0..self.len()).step_by(PAGE_STRIDE) {
            // SAFETY: offset < len, and the buffer is exclusively borrowed.
            unsafe { ptr::write_volatile(self.data.as_ptr().add(offset), value) };
            pages += 1;
        }
        pages
    }

    /// Read one byte, if `offset` is in bounds.
    pub fn get(&self, offset: usize) -> Option<u8> {
        if offset >= self.len() {
            return None;
        }
        // SAFETY: bounds checked above, and the memory was zero-initialized.
        Some(unsafe { ptr::read_volatile(self.data.as_ptr().add(offset)) })
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.data.as_ptr(), self.layout) };
    }
}

// The buffer is plain owned memory.
unsafe impl Send for PageBuffer {}

/// Allocate `size` bytes, sweep them `sweeps` times, then hold them for `hold`.
///
/// # Returns
///
/// The total number of page touches performed.
pub fn run(size: usize, sweeps: u32, hold: Duration) -> Result<usize, KernelError> {
    let mut buffer = PageBuffer::allocate(size)?;
    let mut touched = 0;
    for sweep in 0..sweeps {
        touched += buffer.sweep((sweep as u8).wrapping_add(1));
    }
    if !hold.is_zero() {
        thread::sleep(hold);
    }
    Ok(touched)
}
