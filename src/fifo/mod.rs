//! File-backed FIFO usable as an IPC channel between unrelated processes.
//!
//! A queue is a single file:
//!
//! ```text
//! +-------+-----+-------+----------+------+---------+------+---------+----
//! | start | end | count | checksum | len0 | payload | len1 | payload | ...
//! +-------+-----+-------+----------+------+---------+------+---------+----
//!   u32     u32   u32     u32        u16               u16
//! ```
//!
//! All integers are little-endian and `checksum = start ^ end ^ count`.
//! A zero-length file is an empty queue.
//!
//! # Components
//!
//! - [`PersistentQueue`]: the queue handle (enqueue, dequeue, inspection)
//! - [`QueueIndex`]: the decoded, checksum-validated header
//!
//! # Concurrency
//!
//! Every operation holds an advisory `flock` on the file for its whole
//! duration: shared for inspection, exclusive for anything that writes.
//! Any number of processes may open the same path.

pub mod index;
mod lock;
pub mod queue;

pub use index::{QueueIndex, INDEX_SIZE, LENGTH_SIZE, MAX_RECORD_LEN};
pub use queue::PersistentQueue;
