//! m365-provision: idempotent provisioning for the M365 Monitor service.
//!
//! Resolves an install plan, then converges the host stage by stage: system
//! packages, project files, Python venv, env file, systemd unit, nginx site.
//! Generated artifacts are BLAKE3-hashed into a state lock for drift checks.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
pub mod tripwire;
