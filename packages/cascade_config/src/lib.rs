//! String-keyed configuration storage with serializer indirection.
//!
//! A [`Configuration`] maps keys onto opaque serialized byte strings; how
//! values become bytes is delegated to a [`Serializer`] chosen at
//! construction ([`JsonSerializer`] is bundled, anything `serde`-based
//! plugs in). [`CascadingRead`] layers two stores for reading: queries go
//! to a child store first and fall back to a parent, the usual
//! defaults-plus-overrides arrangement.
//!
//! # Example
//!
//! ```rust
//! use cascade_config::{CascadingRead, ConfigRead, Configuration, JsonSerializer};
//!
//! let mut defaults = Configuration::new(JsonSerializer);
//! defaults.set("timeout_ms", &5000_u64).unwrap();
//! defaults.set("retries", &3_u32).unwrap();
//!
//! let mut overrides = Configuration::new(JsonSerializer);
//! overrides.set("timeout_ms", &250_u64).unwrap();
//!
//! let effective = CascadingRead::new(&overrides, &defaults);
//! assert_eq!(effective.get::<u64>("timeout_ms").unwrap(), 250);
//! assert_eq!(effective.get::<u32>("retries").unwrap(), 3);
//! ```

use std::fmt;

use foldhash::{HashMap, HashMapExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure modes of configuration access.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key has no value in the store (or any fallback store).
    #[error("configuration item {key:?} does not exist")]
    Missing {
        /// The key that was asked for.
        key: String,
    },

    /// The serializer could not turn the value into bytes.
    #[error("failed to serialize configuration item")]
    Serialize(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The stored bytes could not be turned back into the requested type.
    #[error("failed to deserialize configuration item")]
    Deserialize(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Turns values into byte strings and back.
///
/// The store never interprets the bytes it holds; all encoding decisions
/// live behind this indirection.
pub trait Serializer {
    /// Appends the serialized form of `value` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] when the value cannot be encoded.
    fn serialize<V: Serialize>(&self, value: &V, out: &mut Vec<u8>) -> Result<(), ConfigError>;

    /// Decodes a value from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Deserialize`] when the bytes do not parse as
    /// a `V`.
    fn deserialize<V: DeserializeOwned>(&self, source: &[u8]) -> Result<V, ConfigError>;
}

/// JSON encoding via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<V: Serialize>(&self, value: &V, out: &mut Vec<u8>) -> Result<(), ConfigError> {
        let bytes =
            serde_json::to_vec(value).map_err(|error| ConfigError::Serialize(Box::new(error)))?;
        out.extend_from_slice(&bytes);
        Ok(())
    }

    fn deserialize<V: DeserializeOwned>(&self, source: &[u8]) -> Result<V, ConfigError> {
        serde_json::from_slice(source).map_err(|error| ConfigError::Deserialize(Box::new(error)))
    }
}

/// Read access to a configuration store.
pub trait ConfigRead {
    /// Returns `true` if the store holds a value for `key`.
    fn contains(&self, key: &str) -> bool;

    /// Reads and decodes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when no value exists,
    /// [`ConfigError::Deserialize`] when it does not parse as a `V`.
    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<V, ConfigError>;
}

/// A string-keyed map of serialized byte strings.
pub struct Configuration<S> {
    serializer: S,
    items: HashMap<String, Vec<u8>>,
}

impl<S: Serializer> Configuration<S> {
    /// Creates an empty store using the given serializer.
    #[must_use]
    pub fn new(serializer: S) -> Self {
        Self {
            serializer,
            items: HashMap::new(),
        }
    }

    /// Serializes `value` and stores it under `key`, replacing any
    /// previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] when encoding fails; the store
    /// is unchanged in that case.
    pub fn set<V: Serialize>(&mut self, key: &str, value: &V) -> Result<(), ConfigError> {
        let mut bytes = Vec::new();
        self.serializer.serialize(value, &mut bytes)?;
        self.items.insert(key.to_string(), bytes);
        Ok(())
    }

    /// Removes the value stored under `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }
}

impl<S: Serializer> ConfigRead for Configuration<S> {
    fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<V, ConfigError> {
        let bytes = self.items.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })?;

        self.serializer.deserialize(bytes)
    }
}

impl<S: fmt::Debug> fmt::Debug for Configuration<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("serializer", &self.serializer)
            .field("item_count", &self.items.len())
            .finish()
    }
}

/// A read view over a child store with a parent fallback.
///
/// Queries hit the child first; keys absent there fall through to the
/// parent. Chains deeper than two are built by using another
/// `CascadingRead` as the parent.
#[derive(Debug)]
pub struct CascadingRead<'a, C, P> {
    child: &'a C,
    parent: &'a P,
}

impl<'a, C: ConfigRead, P: ConfigRead> CascadingRead<'a, C, P> {
    /// Creates a view reading `child` first and `parent` second.
    #[must_use]
    pub fn new(child: &'a C, parent: &'a P) -> Self {
        Self { child, parent }
    }
}

impl<C: ConfigRead, P: ConfigRead> ConfigRead for CascadingRead<'_, C, P> {
    fn contains(&self, key: &str) -> bool {
        self.child.contains(key) || self.parent.contains(key)
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<V, ConfigError> {
        if self.child.contains(key) {
            self.child.get(key)
        } else {
            self.parent.get(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Endpoint {
        host: String,
        port: u16,
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut config = Configuration::new(JsonSerializer);

        config
            .set(
                "endpoint",
                &Endpoint {
                    host: "localhost".to_string(),
                    port: 8080,
                },
            )
            .unwrap();

        let endpoint: Endpoint = config.get("endpoint").unwrap();
        assert_eq!(
            endpoint,
            Endpoint {
                host: "localhost".to_string(),
                port: 8080,
            }
        );
    }

    #[test]
    fn set_replaces_previous_value() {
        let mut config = Configuration::new(JsonSerializer);

        config.set("level", &1_u32).unwrap();
        config.set("level", &2_u32).unwrap();

        assert_eq!(config.get::<u32>("level").unwrap(), 2);
    }

    #[test]
    fn missing_key_is_an_error_value() {
        let config = Configuration::new(JsonSerializer);

        let result = config.get::<u32>("absent");
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn wrong_type_is_a_deserialize_error() {
        let mut config = Configuration::new(JsonSerializer);
        config.set("flag", &true).unwrap();

        let result = config.get::<Endpoint>("flag");
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn remove_forgets_the_value() {
        let mut config = Configuration::new(JsonSerializer);
        config.set("ephemeral", &1_u32).unwrap();

        assert!(config.remove("ephemeral"));
        assert!(!config.remove("ephemeral"));
        assert!(!config.contains("ephemeral"));
    }

    #[test]
    fn cascade_prefers_child_and_falls_back_to_parent() {
        let mut parent = Configuration::new(JsonSerializer);
        parent.set("shared", &"parent".to_string()).unwrap();
        parent.set("only_parent", &10_u32).unwrap();

        let mut child = Configuration::new(JsonSerializer);
        child.set("shared", &"child".to_string()).unwrap();

        let cascade = CascadingRead::new(&child, &parent);

        assert_eq!(cascade.get::<String>("shared").unwrap(), "child");
        assert_eq!(cascade.get::<u32>("only_parent").unwrap(), 10);
        assert!(cascade.contains("shared"));
        assert!(cascade.contains("only_parent"));
        assert!(!cascade.contains("nowhere"));
        assert!(matches!(
            cascade.get::<u32>("nowhere"),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn cascade_chains_to_arbitrary_depth() {
        let mut grandparent = Configuration::new(JsonSerializer);
        grandparent.set("deepest", &true).unwrap();

        let parent = Configuration::new(JsonSerializer);
        let child = Configuration::new(JsonSerializer);

        let lower = CascadingRead::new(&parent, &grandparent);
        let cascade = CascadingRead::new(&child, &lower);

        assert!(cascade.get::<bool>("deepest").unwrap());
    }

    #[test]
    fn serializer_failure_leaves_store_unchanged() {
        /// Refuses to serialize anything.
        struct BrokenSerializer;

        #[derive(Debug, Error)]
        #[error("broken on purpose")]
        struct Broken;

        impl Serializer for BrokenSerializer {
            fn serialize<V: Serialize>(
                &self,
                _value: &V,
                _out: &mut Vec<u8>,
            ) -> Result<(), ConfigError> {
                Err(ConfigError::Serialize(Box::new(Broken)))
            }

            fn deserialize<V: DeserializeOwned>(&self, _source: &[u8]) -> Result<V, ConfigError> {
                Err(ConfigError::Deserialize(Box::new(Broken)))
            }
        }

        let mut config = Configuration::new(BrokenSerializer);

        assert!(matches!(
            config.set("anything", &1_u32),
            Err(ConfigError::Serialize(_))
        ));
        assert!(!config.contains("anything"));
    }
}
