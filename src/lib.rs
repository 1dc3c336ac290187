pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod model;
pub mod player;
pub mod playlist;
pub mod subtitle;
pub mod sync;
pub mod ui;
