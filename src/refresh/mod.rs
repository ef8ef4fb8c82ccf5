//! Polling backstop: periodic refresh workers.

pub mod worker;

pub use worker::{
    RefreshConfig, RefreshConfigBuilder, RefreshHandle, RefreshJob, RefreshStats, RefreshWorker,
};
