pub mod backup;
pub mod clock;
pub mod config;
pub mod container;
pub mod lifecycle;
pub mod retention;
pub mod service;
pub mod state;
pub mod terminal;
