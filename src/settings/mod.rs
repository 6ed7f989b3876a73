//! TOML settings for kudos.
//!
//! Settings are loaded from `~/.kudos/settings.toml` with environment variable
//! interpolation. Secrets fall back to the usual environment variables through
//! [`get_with_env_fallback`].
//!
//! ```rust,ignore
//! use kudos_lib::settings::{get_with_env_fallback, SettingsManager};
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//! let url = get_with_env_fallback(&settings.database.url, &["DATABASE_URL"], None);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager};
pub use schema::KudosSettings;
