//! Library surface: every core component (C1-C12) the binary's CLI
//! wires together through [`service::Service`].

pub mod config;
pub mod error;
pub mod events;
pub mod extractor;
pub mod gitcollector;
pub mod ignore_engine;
pub mod indexer;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod search;
pub mod service;
pub mod storage;
pub mod taskqueue;
pub mod throttler;
pub mod watcher;
