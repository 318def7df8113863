pub mod api;
pub mod bootstrap;
pub mod detectors;
pub mod error;
pub mod model;
pub mod providers;
pub mod resolver;
pub mod service;
pub mod settings;
pub mod storage;
