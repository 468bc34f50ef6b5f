pub mod api;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod foreground;
pub mod init;
pub mod logger;
pub mod policy;
pub mod sinkhole;
pub mod stats;
