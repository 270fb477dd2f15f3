pub mod lifecycle;
pub mod merge;
pub mod models;
pub mod stats;
pub mod time_accounting;
pub mod views;
