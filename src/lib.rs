extern crate tracing as log;

pub mod config;
pub mod error;
pub mod handlers;
pub mod media;
pub mod paste;
pub mod router;
pub mod serve;
pub mod service;
pub mod slug;
pub mod store;

/// Handler responses are fully buffered; the upload cap keeps them small.
pub type Response = http::Response<http_body_util::Full<bytes::Bytes>>;

pub use crate::error::{BoxError, Error};
