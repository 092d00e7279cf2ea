//! Fair resumption of writers waiting on the shared socket.

use lru::LruCache;

use crate::core::ConnectionId;

/// A writer that can wait on the shared socket.
///
/// Entries are ids, not references. A `Session` entry whose session has
/// gone away is simply skipped when serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockedWriter {
    /// The time-wait registry's pending packet queue.
    TimeWait,
    /// An active session.
    Session(ConnectionId),
}

/// Marks the registrations that belong to one drain pass.
///
/// Writers registered after the pass started are served by the next pass.
#[derive(Debug, Clone, Copy)]
pub struct WritePass {
    end: u64,
}

/// Insertion-ordered set of blocked writers.
///
/// Registration is idempotent. Servicing is round-robin: each writer gets at
/// most one `on_can_write` per pass, and a writer that re-registers from its
/// own callback waits for the next pass.
#[derive(Debug)]
pub struct WriteBlockedQueue {
    /// Writer to registration sequence number, oldest first.
    entries: LruCache<BlockedWriter, u64>,
    next_seq: u64,
}

impl Default for WriteBlockedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBlockedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            next_seq: 0,
        }
    }

    /// Register a writer. Returns `false` if it was already waiting.
    pub fn register(&mut self, writer: BlockedWriter) -> bool {
        if self.entries.contains(&writer) {
            return false;
        }
        self.entries.push(writer, self.next_seq);
        self.next_seq += 1;
        true
    }

    /// Remove a writer. Safe to call when absent.
    pub fn unregister(&mut self, writer: BlockedWriter) -> bool {
        self.entries.pop(&writer).is_some()
    }

    /// Check if a writer is waiting.
    pub fn contains(&self, writer: BlockedWriter) -> bool {
        self.entries.contains(&writer)
    }

    /// Number of waiting writers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Begin a drain pass over everything registered so far.
    pub fn start_pass(&self) -> WritePass {
        WritePass { end: self.next_seq }
    }

    /// Pop the oldest writer that belongs to `pass`.
    pub fn next_in_pass(&mut self, pass: WritePass) -> Option<BlockedWriter> {
        let due = matches!(self.entries.peek_lru(), Some((_, &seq)) if seq < pass.end);
        if !due {
            return None;
        }
        self.entries.pop_lru().map(|(writer, _)| writer)
    }

    /// Run one drain pass.
    ///
    /// `on_can_write` receives the queue so the writer can re-register
    /// itself. The pass stops as soon as `is_blocked` returns true.
    pub fn drain<B, F>(&mut self, mut is_blocked: B, mut on_can_write: F)
    where
        B: FnMut() -> bool,
        F: FnMut(&mut Self, BlockedWriter),
    {
        Self::drain_in(
            self,
            |queue| queue,
            |_| is_blocked(),
            |queue, writer| on_can_write(queue, writer),
        );
    }

    /// Run one drain pass over a queue owned by `host`.
    ///
    /// `queue` projects the queue out of `host`, so `on_can_write` gets the
    /// whole host and can reach the writers as well as the queue.
    pub fn drain_in<C, Q, B, F>(host: &mut C, mut queue: Q, mut is_blocked: B, mut on_can_write: F)
    where
        C: ?Sized,
        Q: FnMut(&mut C) -> &mut Self,
        B: FnMut(&C) -> bool,
        F: FnMut(&mut C, BlockedWriter),
    {
        let pass = queue(&mut *host).start_pass();
        while !is_blocked(&*host) {
            let Some(writer) = queue(&mut *host).next_in_pass(pass) else {
                break;
            };
            on_can_write(&mut *host, writer);
        }
    }
}
