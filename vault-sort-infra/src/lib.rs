//! Run bookkeeping for vault-sort: the append-only audit log and the
//! per-path cooldown queue.

pub mod infra;
