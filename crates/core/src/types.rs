//! Core identifiers shared by the arena pools, extent providers and selectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena identifier handed out by the underlying allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaId(u32);

impl ArenaId {
    /// Wrap a raw arena index
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw arena index as used by `mallctl` / `mallocx`
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// NUMA node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Wrap a raw node number
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw node number
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ArenaId::new(7).to_string(), "arena#7");
        assert_eq!(NodeId::new(1).to_string(), "node1");
    }

    #[test]
    fn test_node_id_is_transparent_in_toml() -> Result<(), toml::de::Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            node: NodeId,
        }

        let parsed: Wrapper = toml::from_str("node = 3")?;
        assert_eq!(parsed.node, NodeId::new(3));
        Ok(())
    }
}
