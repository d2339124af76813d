//! # swarm-settings
//!
//! Configuration for the swarm coordination kernel, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`SwarmSettings::default()`]
//! 2. **User file**: `~/.swarm/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWARM_*` overrides (highest priority)
//!
//! Settings are plain values handed to constructors; nothing here is global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
