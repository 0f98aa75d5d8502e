pub mod cache;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod decode;
pub mod error;
pub mod events;
pub mod playlist;
pub mod reconcile;
pub mod scan;
pub mod transition;
pub mod tasks {
    pub mod control;
    pub mod files;
    pub mod manager;
    pub mod viewer;
}
