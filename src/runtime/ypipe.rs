// src/runtime/ypipe.rs

//! Lock-free single-producer/single-consumer queue.
//!
//! Items live in fixed-size chunks linked into a list. The writer only touches
//! the chunk holding the write cursor and the reader only the chunk holding the
//! read cursor, so the two sides never contend on a slot. The only location both
//! sides modify is `published`, which holds the number of items the reader may
//! consume, or [`ASLEEP`] when the reader found the queue empty and went to sleep.
//!
//! Ordering contract: every item write happens-before the `AcqRel` CAS (or the
//! `Release` store) that publishes it, and the reader observes the published
//! count through an `Acquire` CAS before touching any slot.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

/// Chunk size for message pipes.
pub(crate) const MESSAGE_PIPE_GRANULARITY: usize = 256;
/// Chunk size for command pipes.
pub(crate) const COMMAND_PIPE_GRANULARITY: usize = 16;

/// Sentinel stored in `published` while the reader sleeps.
const ASLEEP: u64 = u64::MAX;

struct Chunk<T, const N: usize> {
  values: [UnsafeCell<MaybeUninit<T>>; N],
  next: AtomicPtr<Chunk<T, N>>,
  // Only ever read by the writer (unwrite).
  prev: *mut Chunk<T, N>,
}

impl<T, const N: usize> Chunk<T, N> {
  fn alloc(prev: *mut Chunk<T, N>) -> *mut Chunk<T, N> {
    Box::into_raw(Box::new(Chunk {
      values: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
      next: AtomicPtr::new(ptr::null_mut()),
      prev,
    }))
  }
}

struct WriterState<T, const N: usize> {
  /// Chunk holding the slot for the next write.
  end: *mut Chunk<T, N>,
  /// Sequence number of `end`'s first slot.
  end_base: u64,
  /// Total items written (sequence number of the next write).
  count: u64,
  /// Items up to here are complete and may be flushed.
  flush_to: u64,
  /// Items up to here were already handed to the reader.
  flushed: u64,
}

struct ReaderState<T, const N: usize> {
  begin: *mut Chunk<T, N>,
  begin_base: u64,
  /// Sequence number of the next item to read.
  pos: u64,
  /// Prefetched upper bound of readable items (or `ASLEEP`).
  limit: u64,
}

struct Shared<T, const N: usize> {
  published: AtomicU64,
  writer: UnsafeCell<WriterState<T, N>>,
  reader: UnsafeCell<ReaderState<T, N>>,
}

// The writer state is only touched through `YPipeWriter` and the reader state only
// through `YPipeReader`; each handle is unique, so the cells are never aliased.
unsafe impl<T: Send, const N: usize> Send for Shared<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Shared<T, N> {}

impl<T, const N: usize> Drop for Shared<T, N> {
  fn drop(&mut self) {
    let writer = self.writer.get_mut();
    let reader = self.reader.get_mut();
    let mut chunk = reader.begin;
    let mut base = reader.begin_base;
    let mut seq = reader.pos;
    // Every slot in [reader.pos, writer.count) holds an initialized value,
    // flushed or not.
    while !chunk.is_null() {
      unsafe {
        while seq < writer.count && seq < base + N as u64 {
          let slot = &(*chunk).values[(seq - base) as usize];
          (*slot.get()).assume_init_drop();
          seq += 1;
        }
        let next = (*chunk).next.load(Ordering::Acquire);
        drop(Box::from_raw(chunk));
        chunk = next;
      }
      base += N as u64;
    }
  }
}

/// Creates a connected writer/reader pair.
pub(crate) fn ypipe<T, const N: usize>() -> (YPipeWriter<T, N>, YPipeReader<T, N>) {
  let first = Chunk::<T, N>::alloc(ptr::null_mut());
  let shared = Arc::new(Shared {
    published: AtomicU64::new(0),
    writer: UnsafeCell::new(WriterState {
      end: first,
      end_base: 0,
      count: 0,
      flush_to: 0,
      flushed: 0,
    }),
    reader: UnsafeCell::new(ReaderState {
      begin: first,
      begin_base: 0,
      pos: 0,
      limit: 0,
    }),
  });
  (
    YPipeWriter {
      shared: shared.clone(),
    },
    YPipeReader { shared },
  )
}

/// Producer half of a [`ypipe`].
pub(crate) struct YPipeWriter<T, const N: usize = MESSAGE_PIPE_GRANULARITY> {
  shared: Arc<Shared<T, N>>,
}

unsafe impl<T: Send, const N: usize> Send for YPipeWriter<T, N> {}

impl<T, const N: usize> YPipeWriter<T, N> {
  fn state(&mut self) -> &mut WriterState<T, N> {
    // Exclusive: `&mut self` on the unique writer handle.
    unsafe { &mut *self.shared.writer.get() }
  }

  /// Appends `value`. While `incomplete` is set the item stays invisible to
  /// `flush`, so a multi-part message is published all at once.
  pub(crate) fn write(&mut self, value: T, incomplete: bool) {
    let w = self.state();
    unsafe {
      let slot = &(*w.end).values[(w.count - w.end_base) as usize];
      (*slot.get()).write(value);
    }
    w.count += 1;
    if w.count - w.end_base == N as u64 {
      let fresh = Chunk::alloc(w.end);
      unsafe { (*w.end).next.store(fresh, Ordering::Release) };
      w.end = fresh;
      w.end_base += N as u64;
    }
    if !incomplete {
      w.flush_to = w.count;
    }
  }

  /// Pops the most recent item if it was written as incomplete and not yet
  /// flushed.
  pub(crate) fn unwrite(&mut self) -> Option<T> {
    let w = self.state();
    if w.flush_to == w.count {
      return None;
    }
    if w.count == w.end_base {
      // The end chunk is empty and the reader cannot have reached it.
      let empty = w.end;
      unsafe {
        w.end = (*empty).prev;
        (*w.end).next.store(ptr::null_mut(), Ordering::Relaxed);
        drop(Box::from_raw(empty));
      }
      w.end_base -= N as u64;
    }
    w.count -= 1;
    let value = unsafe {
      let slot = &(*w.end).values[(w.count - w.end_base) as usize];
      (*slot.get()).assume_init_read()
    };
    Some(value)
  }

  /// Publishes all complete items. Returns `false` when the reader was asleep;
  /// the caller must then wake it up.
  pub(crate) fn flush(&mut self) -> bool {
    let shared = &*self.shared;
    let w = unsafe { &mut *shared.writer.get() };
    if w.flushed == w.flush_to {
      return true;
    }
    match shared
      .published
      .compare_exchange(w.flushed, w.flush_to, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => {
        w.flushed = w.flush_to;
        true
      }
      Err(_) => {
        // Only the reader changes `published` to anything but our own values,
        // and only ever to ASLEEP.
        shared.published.store(w.flush_to, Ordering::Release);
        w.flushed = w.flush_to;
        false
      }
    }
  }
}

/// Consumer half of a [`ypipe`].
pub(crate) struct YPipeReader<T, const N: usize = MESSAGE_PIPE_GRANULARITY> {
  shared: Arc<Shared<T, N>>,
}

unsafe impl<T: Send, const N: usize> Send for YPipeReader<T, N> {}

impl<T, const N: usize> YPipeReader<T, N> {
  fn state(&mut self) -> &mut ReaderState<T, N> {
    unsafe { &mut *self.shared.reader.get() }
  }

  /// Returns true if an item is available. A `false` result puts the reader to
  /// sleep, making the next writer flush report that a wake-up is required.
  pub(crate) fn check_read(&mut self) -> bool {
    let shared = &*self.shared;
    let r = unsafe { &mut *shared.reader.get() };
    if r.pos != r.limit && r.limit != ASLEEP {
      return true;
    }
    r.limit = match shared
      .published
      .compare_exchange(r.pos, ASLEEP, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(prev) => prev,
      Err(current) => current,
    };
    !(r.pos == r.limit || r.limit == ASLEEP)
  }

  fn advance_chunk(r: &mut ReaderState<T, N>) {
    if r.pos == r.begin_base + N as u64 {
      unsafe {
        let old = r.begin;
        r.begin = (*old).next.load(Ordering::Acquire);
        drop(Box::from_raw(old));
      }
      r.begin_base += N as u64;
    }
  }

  /// Pops the next item, if one was published.
  pub(crate) fn read(&mut self) -> Option<T> {
    if !self.check_read() {
      return None;
    }
    let r = self.state();
    Self::advance_chunk(r);
    let value = unsafe {
      let slot = &(*r.begin).values[(r.pos - r.begin_base) as usize];
      (*slot.get()).assume_init_read()
    };
    r.pos += 1;
    Some(value)
  }

  /// Applies `f` to the next item without consuming it.
  pub(crate) fn probe(&mut self, f: impl FnOnce(&T) -> bool) -> bool {
    if !self.check_read() {
      return false;
    }
    let r = self.state();
    Self::advance_chunk(r);
    unsafe {
      let slot = &(*r.begin).values[(r.pos - r.begin_base) as usize];
      f((*slot.get()).assume_init_ref())
    }
  }
}
