pub mod channel;
pub mod collection;
pub mod config;
pub mod domain;
pub mod error;
pub mod heatmap;
pub mod output;
pub mod parser;
pub mod render;
pub mod trigger;
pub mod tui;
pub mod watcher;
