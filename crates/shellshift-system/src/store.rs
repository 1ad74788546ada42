use anyhow::Result;

/// A key-value view over one piece of system configuration.
///
/// Mutators only ever read and write through this interface, so the registry,
/// a JSON settings document and an in-memory map are interchangeable.
pub trait ConfigStore: Send + Sync {
    /// Human-readable location, used in report details.
    fn describe(&self) -> String;

    /// Whether the backing store exists at all. Absent stores are skipped, not failed.
    fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    fn read(&self, key: &str) -> Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> Result<()>;
}
