//! Gamewright: compile conversational edits into a versioned game
//! specification, preview it, and package it for the web.

pub mod assets;
pub mod cli;
pub mod config;
pub mod edit;
pub mod export;
pub mod mobile;
pub mod model;
pub mod preview;
pub mod project;
pub mod service;
pub mod session;
pub mod storage;
pub mod templates;
pub mod validate;
