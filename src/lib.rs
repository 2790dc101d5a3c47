//! designmypdf: render stored templates with a JSON payload, print them to PDF
//! and publish the result behind a URL.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
