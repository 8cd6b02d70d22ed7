#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod control;
mod err;
mod persist;

pub use config::BandwidthConfig;
pub use control::{BandwidthControl, Direction};
pub use err::Error;
pub use persist::{JsonConfigFile, NoPersist, Persist};

/// A Result type for the bw_ratelim_control crate.
pub type Result<T> = std::result::Result<T, Error>;
