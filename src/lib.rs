pub mod action;
pub mod adapter;
pub mod app;
pub mod config;
pub mod dom;
pub mod fixture;
pub mod lifecycle;
pub mod observer;
pub mod overlay;
pub mod scanner;
pub mod selector;
pub mod settings;
pub mod utils;
pub mod validator;
pub mod watcher;
