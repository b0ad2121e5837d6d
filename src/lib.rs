// Library exports for labkeeper

pub mod ai;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod http;
pub mod process;
pub mod service;
