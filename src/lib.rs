pub mod batch;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod directory;
pub mod monitor;
pub mod operation;
pub mod probe;
pub mod report;
pub mod util;
