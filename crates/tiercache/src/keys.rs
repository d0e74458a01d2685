//! Key namespacing and keyspace notification channels.

/// Separator between instance name and logical key.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Builds collision-safe remote keys and their notification channels.
#[derive(Debug, Clone)]
pub struct KeyNamespace {
    instance: String,
    database: i64,
}

impl KeyNamespace {
    /// Create a namespace for the given instance on database 0.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            database: 0,
        }
    }

    /// Set the logical database used for channel names.
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Instance name.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Real key for a logical key.
    pub fn real_key(&self, logical_key: &str) -> String {
        format!("{}{}{}", self.instance, NAMESPACE_SEPARATOR, logical_key)
    }

    /// Keyspace channel prefix, e.g. `__keyspace@0__:`.
    pub fn channel_prefix(&self) -> String {
        format!("__keyspace@{}__:", self.database)
    }

    /// Keyspace notification channel for a real key.
    pub fn channel(&self, real_key: &str) -> String {
        format!("{}{}", self.channel_prefix(), real_key)
    }

    /// Extract the real key from a keyspace channel name.
    ///
    /// Returns `None` for channels that are not keyspace channels of this database.
    pub fn key_from_channel<'a>(&self, channel: &'a str) -> Option<&'a str> {
        let key = channel.strip_prefix(&self.channel_prefix())?;
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }
}
