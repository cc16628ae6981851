//! Store configuration.

/// Default database name.
pub const DEFAULT_NAME: &str = "Aura";

/// Default schema version.
pub const DEFAULT_VERSION: u32 = 1;

/// Configuration for opening the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database name.
    pub name: String,

    /// Schema version to open at. Must be at least 1.
    pub version: u32,

    /// Whether an upgrade drops every existing collection before recreating
    /// the declared ones. Loses all data; meant for development.
    pub reset_on_upgrade: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            version: DEFAULT_VERSION,
            reset_on_upgrade: false,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for the given database name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            ..Self::default()
        }
    }

    /// Returns the bookshelf application's configuration.
    #[must_use]
    pub fn aura() -> Self {
        Self::default()
    }

    /// Sets the database name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets whether upgrades drop and recreate every collection.
    #[must_use]
    pub const fn reset_on_upgrade(mut self, value: bool) -> Self {
        self.reset_on_upgrade = value;
        self
    }
}
