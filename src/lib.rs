pub mod app;
pub mod archive;
pub mod candidates;
pub mod condenser;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod hashcheck;
pub mod output;
pub mod params;
pub mod report;
pub mod resolver;
pub mod store;
