//! Xiaohongshu-style headline generation service.
//!
//! The crate is split along the two moving parts of the system: [`client`]
//! talks to the Baidu Qianfan chat-completions API, and [`controller`] owns
//! the process-wide submission state (single-flight guard, throttle window,
//! and the one-slot result channel a later page load polls). [`web`] renders
//! the form UI on top of both, and [`config`] wires everything up from the
//! environment.

pub mod client;
pub mod config;
pub mod controller;
pub mod web;

pub use client::{AuthScheme, GenerateError, ProbeReport, QianfanClient, TitleGenerator};
pub use config::{AppConfig, ConfigError};
pub use controller::{
    EmptyResultPolicy, GenerationResult, SubmissionController, SubmissionOutcome, SubmissionPolicy,
};
