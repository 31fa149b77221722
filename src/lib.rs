pub mod algorithms;
pub mod app;
pub mod atomic;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fragment;
pub mod message;
pub mod types;
pub mod vertex_set;

pub use error::{Result, WCCError};
