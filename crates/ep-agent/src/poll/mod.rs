//! Controller status polling

mod client;

pub use client::{PollClient, StatusSource};
