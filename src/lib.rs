pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod project;
pub mod toolchain;
