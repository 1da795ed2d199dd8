pub mod config;
pub mod db;

/// Application name for XDG paths
pub const APP_NAME: &str = "mangomusic";
