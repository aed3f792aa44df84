//! Memory handed across the host boundary.
//!
//! The host frees node outputs through a single `release(void*)` hook, so
//! every allocation has to be reclaimable from its bare pointer. Each block
//! is prefixed with a header recording its total size; payloads start
//! [`ALIGN`] bytes past the block start and share its alignment.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};

use crate::NodeError;

pub const ALIGN: usize = 16;
const HEADER: usize = ALIGN;

thread_local! {
    static OUTSTANDING: Cell<isize> = const { Cell::new(0) };
}

/// Allocations made minus allocations released on the current thread.
///
/// The count only balances when a block is released on the thread that
/// allocated it; a block freed elsewhere shows up as +1 here and -1 there.
pub fn outstanding() -> isize {
    OUTSTANDING.with(Cell::get)
}

fn track(delta: isize) {
    OUTSTANDING.with(|c| c.set(c.get() + delta));
}

fn layout_for(bytes: usize) -> Result<Layout, NodeError> {
    bytes
        .checked_add(HEADER)
        .and_then(|total| Layout::from_size_align(total, ALIGN).ok())
        .ok_or(NodeError::AllocationFailure { bytes })
}

fn allocate(bytes: usize, zeroed: bool) -> Result<NonNull<u8>, NodeError> {
    let layout = layout_for(bytes)?;
    // SAFETY: the layout is never zero-sized, it always covers the header.
    let base = unsafe {
        if zeroed {
            alloc::alloc_zeroed(layout)
        } else {
            alloc::alloc(layout)
        }
    };
    let base = NonNull::new(base).ok_or(NodeError::AllocationFailure { bytes })?;
    track(1);
    // SAFETY: the block is ALIGN-aligned and at least HEADER bytes long.
    unsafe {
        base.cast::<usize>().as_ptr().write(layout.size());
        Ok(NonNull::new_unchecked(base.as_ptr().add(HEADER)))
    }
}

/// Reclaims a block produced by this module. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a payload pointer obtained from [`HostAlloc::into_raw`]
/// that has not been released yet.
pub unsafe fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: per the caller contract the header sits HEADER bytes before
    // `ptr` and records the layout the block was allocated with.
    unsafe {
        let base = ptr.sub(HEADER);
        let size = base.cast::<usize>().read();
        alloc::dealloc(base, Layout::from_size_align_unchecked(size, ALIGN));
    }
    track(-1);
}

/// An owned, initialized array in host-releasable memory.
///
/// Dropping the handle frees the block; [`into_raw`](Self::into_raw) hands
/// it to the host, which must pass it to `release` exactly once.
pub struct HostAlloc<T: Copy> {
    ptr: NonNull<T>,
    len: usize,
}

// SAFETY: the handle owns its block exclusively, like a `Box<[T]>`.
unsafe impl<T: Copy + Send> Send for HostAlloc<T> {}
unsafe impl<T: Copy + Sync> Sync for HostAlloc<T> {}

impl<T: Copy> HostAlloc<T> {
    fn with_len(len: usize, zeroed: bool) -> Result<Self, NodeError> {
        const { assert!(mem::align_of::<T>() <= ALIGN) };
        let bytes = len
            .checked_mul(mem::size_of::<T>())
            .ok_or(NodeError::AllocationFailure { bytes: usize::MAX })?;
        let ptr = allocate(bytes, zeroed)?.cast::<T>();
        Ok(Self { ptr, len })
    }

    pub fn from_slice(values: &[T]) -> Result<Self, NodeError> {
        let out = Self::with_len(values.len(), false)?;
        // SAFETY: the fresh block holds `values.len()` elements and cannot
        // overlap a borrowed slice.
        unsafe { ptr::copy_nonoverlapping(values.as_ptr(), out.ptr.as_ptr(), values.len()) };
        Ok(out)
    }

    /// # Safety
    ///
    /// The all-zero bit pattern must be a valid `T`.
    pub unsafe fn zeroed(len: usize) -> Result<Self, NodeError> {
        Self::with_len(len, true)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Shortens the visible length. The block keeps its size, which the
    /// header records, so `release` is unaffected.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: every constructor initializes all `len` elements.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn into_raw(self) -> *mut T {
        ManuallyDrop::new(self).ptr.as_ptr()
    }
}

impl HostAlloc<u8> {
    pub fn zeroed_bytes(len: usize) -> Result<Self, NodeError> {
        Self::with_len(len, true)
    }
}

impl<T: Copy> fmt::Debug for HostAlloc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAlloc")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Copy> Drop for HostAlloc<T> {
    fn drop(&mut self) {
        // SAFETY: the block came from `allocate` and ownership was not given away.
        unsafe { release(self.ptr.as_ptr().cast()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_releases_block() {
        let before = outstanding();
        {
            let buf = HostAlloc::from_slice(&[1u64, 2, 3]).unwrap();
            assert_eq!(buf.as_slice(), &[1, 2, 3]);
            assert_eq!(outstanding(), before + 1);
        }
        assert_eq!(outstanding(), before);
    }

    #[test]
    fn into_raw_then_release() {
        let before = outstanding();
        let raw = HostAlloc::from_slice(&[0.5f32; 7]).unwrap().into_raw();
        assert_eq!(raw as usize % ALIGN, 0);
        assert_eq!(outstanding(), before + 1);
        unsafe { release(raw.cast()) };
        assert_eq!(outstanding(), before);
    }

    #[test]
    fn empty_and_zeroed_blocks() {
        let empty = HostAlloc::<u8>::from_slice(&[]).unwrap();
        assert!(empty.is_empty());

        let zeros = unsafe { HostAlloc::<u64>::zeroed(4) }.unwrap();
        assert_eq!(zeros.as_slice(), &[0; 4]);
    }

    #[test]
    fn oversized_request_fails_cleanly() {
        let before = outstanding();
        assert!(matches!(
            HostAlloc::<u64>::with_len(usize::MAX, false),
            Err(NodeError::AllocationFailure { .. })
        ));
        assert!(matches!(
            allocate(isize::MAX as usize, false),
            Err(NodeError::AllocationFailure { .. })
        ));
        assert_eq!(outstanding(), before);
    }

    #[test]
    fn truncate_keeps_block_releasable() {
        let before = outstanding();
        let mut buf = HostAlloc::zeroed_bytes(32).unwrap();
        buf.truncate(8);
        buf.truncate(64);
        assert_eq!(buf.len(), 8);
        drop(buf);
        assert_eq!(outstanding(), before);
    }

    #[test]
    fn counts_are_per_thread() {
        let before = outstanding();
        let (raw, allocated) = std::thread::spawn(|| {
            let raw = HostAlloc::from_slice(&[7u32; 3]).unwrap().into_raw();
            (raw as usize, outstanding())
        })
        .join()
        .unwrap();
        let released = std::thread::spawn(move || {
            unsafe { release(raw as *mut u8) };
            outstanding()
        })
        .join()
        .unwrap();
        assert_eq!(allocated, 1);
        assert_eq!(released, -1);
        assert_eq!(outstanding(), before);
    }

    #[test]
    fn release_null_is_noop() {
        let before = outstanding();
        unsafe { release(ptr::null_mut()) };
        assert_eq!(outstanding(), before);
    }
}
