//! Subcommands of the byzfs CLI

pub mod cat;
pub mod check;
pub mod format;
pub mod image;
pub mod info;
pub mod ls;
pub mod mkdir;
pub mod put;
pub mod rm;
