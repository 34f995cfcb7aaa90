pub mod config;
pub mod evaluate;
pub mod export;
pub mod preview;
pub mod scan;
