pub mod agent;
pub mod cli;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod gemini;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod ui;
