//! Thread-safe pool of reusable request messages.
//!
//! Every acquisition is an RAII [`Pooled`] guard. Dropping the guard resets
//! the message and hands it back, so release happens exactly once per
//! acquisition on every exit path, including unwinding out of a panicking
//! handler.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::message::Message;

/// Default cap on idle instances kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 256;

type Factory<M> = Box<dyn Fn() -> M + Send + Sync>;

/// A pool of reusable message instances of a single type.
///
/// Instances are created lazily by the factory on a pool miss. The pool does
/// not track which caller holds which instance beyond the guard itself.
pub struct MessagePool<M> {
    idle: Mutex<Vec<M>>,
    factory: Factory<M>,
    max_idle: usize,
    outstanding: AtomicUsize,
}

impl<M: Message> MessagePool<M> {
    /// Creates a pool that builds zero-valued instances with `M::default`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_factory(M::default, DEFAULT_MAX_IDLE)
    }

    /// Creates a pool with an explicit factory and idle cap.
    ///
    /// Released instances beyond `max_idle` are dropped instead of kept.
    #[must_use]
    pub fn with_factory<F>(factory: F, max_idle: usize) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_idle,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Borrows an instance, reusing an idle one when available.
    #[must_use]
    pub fn acquire(&self) -> Pooled<'_, M> {
        let popped = self.idle.lock().pop();
        let msg = popped.unwrap_or_else(|| (self.factory)());
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Pooled {
            pool: self,
            msg: Some(msg),
        }
    }

    /// Number of instances currently borrowed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle instances ready for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut msg: M) {
        msg.reset();
        {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(msg);
            } else {
                tracing::trace!(max_idle = self.max_idle, "message pool full, dropping instance");
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<M: Message> Default for MessagePool<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MessagePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Pooled
// ---------------------------------------------------------------------------

/// A message borrowed from a [`MessagePool`]; returned on drop.
pub struct Pooled<'a, M: Message> {
    pool: &'a MessagePool<M>,
    msg: Option<M>,
}

impl<M: Message> Deref for Pooled<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        // Only `Drop` takes the message out.
        self.msg.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<M: Message> DerefMut for Pooled<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.msg.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<M: Message> Drop for Pooled<'_, M> {
    fn drop(&mut self) {
        if let Some(msg) = self.msg.take() {
            self.pool.release(msg);
        }
    }
}

impl<M: Message> fmt::Debug for Pooled<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.msg).finish()
    }
}
