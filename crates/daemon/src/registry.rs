use plug_common::Plug;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Object entries in document order, duplicates included.
struct Entries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of plug ids to addresses")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Static mapping of plug id to network address, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    plugs: Vec<Plug>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(plugs: Vec<Plug>) -> Self {
        let mut registry = Registry::default();
        for plug in plugs {
            if registry.index.contains_key(&plug.id) {
                warn!(plug = %plug.id, "Duplicate plug id ignored");
                continue;
            }
            registry.index.insert(plug.id.clone(), registry.plugs.len());
            registry.plugs.push(plug);
        }
        registry
    }

    /// Parse a `{"plug-id": "address", ...}` document.
    ///
    /// The document itself must be a well-formed JSON object. Entries whose id
    /// is blank or whose address is not a non-empty string are dropped with a
    /// warning rather than failing the whole load. Plugs keep document order;
    /// a repeated id keeps its first address.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let doc: Value = serde_json::from_str(raw)?;
        if !doc.is_object() {
            return Err(ConfigError::PlugsNotAnObject);
        }
        let Entries(entries) = serde_json::from_str(raw)?;

        let mut plugs = Vec::with_capacity(entries.len());
        for (id, address) in entries {
            let id = id.trim();
            if id.is_empty() {
                warn!("Dropping plug entry with empty id");
                continue;
            }
            match address.as_str().map(str::trim) {
                Some(address) if !address.is_empty() => plugs.push(Plug {
                    id: id.to_string(),
                    address: address.to_string(),
                }),
                _ => warn!(plug = %id, value = %address, "Dropping plug entry with invalid address"),
            }
        }

        if plugs.is_empty() {
            warn!("No plugs configured");
        } else {
            info!(count = plugs.len(), "Loaded plug registry");
        }
        Ok(Registry::new(plugs))
    }

    pub fn get(&self, id: &str) -> Option<&Plug> {
        self.index.get(id).map(|&i| &self.plugs[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plug> {
        self.plugs.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugs.iter().map(|p| p.id.as_str())
    }

}
