#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod css;
pub mod emit;
pub mod engine;
pub mod fetch;
pub mod html;
pub mod identity;
pub mod models;
pub mod registry;

pub use config::RehostConfig;
pub use engine::{Rehoster, UrlAttributeHandle};
pub use models::{AssetKind, FileContent, ResolvedFile};
pub use registry::FileRegistry;
