//! Glint watch cache: one local index per tracked resource kind, kept current
//! by a single writer task consuming that kind's watch stream.

#![forbid(unsafe_code)]

mod engine;
mod handler;
mod index;
mod source;

pub use engine::{Phase, WatchCache};
pub use handler::{EventHandler, HandlerFns, LogHandler};
pub use index::{Change, Index, IndexBuilder, IndexSnapshot};
pub use source::{ChannelFeed, ChannelSource};
