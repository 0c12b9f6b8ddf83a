//! 端到端场景

mod config_file;
mod lifecycle;
