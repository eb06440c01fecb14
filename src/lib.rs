pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod fs_util;
pub mod gate;
pub mod jsonstat;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod staging;
pub mod transform;
pub mod warehouse;
