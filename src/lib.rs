pub mod analysis;
pub mod candles;
pub mod csv_export;
pub mod error;
pub mod indicators;
pub mod instruments;
pub mod models;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod storage_utils;
