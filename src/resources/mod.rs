//! Host artifacts. Each handler renders its artifact, converges it through
//! hash-compared writes, and activates it with generated shell.

pub mod file;
pub mod package;
pub mod project;
pub mod proxy;
pub mod runtime;
pub mod service;
