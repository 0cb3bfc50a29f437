#![forbid(unsafe_code)]

//! TikTok download service.
//!
//! yt-dlp does the extraction; this crate validates requests, names and
//! tracks the files it writes, and serves them over HTTP.

pub mod config;
pub mod downloader;
pub mod extractor;
pub mod server;
