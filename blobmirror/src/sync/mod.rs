pub mod classify;
pub mod engine;
pub mod index;
pub mod job;
pub mod paths;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod stats;
pub mod transfer;
pub mod wellknown;

#[cfg(test)]
mod test_support;

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
