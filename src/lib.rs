pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod progress;
pub mod report;
pub mod session;
pub mod transport;
pub mod util;
