//! Glint query gateway: maps request paths onto watch-cache lookups and
//! serves them over HTTP.

#![forbid(unsafe_code)]

mod http;
mod query;

pub use http::{router, serve};
pub use query::{QueryGateway, Reply, ReplyBody, ResourceReference};
