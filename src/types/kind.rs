use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// whether a node carries content or children
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Resource,
    Collection,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Resource => "resource",
            NodeKind::Collection => "collection",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resource" => Ok(NodeKind::Resource),
            "collection" => Ok(NodeKind::Collection),
            other => Err(format!("unknown node kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("resource".parse::<NodeKind>(), Ok(NodeKind::Resource));
        assert_eq!("collection".parse::<NodeKind>(), Ok(NodeKind::Collection));
        assert!("folder".parse::<NodeKind>().is_err());
    }
}
