use std::fmt;

use serde::{Deserialize, Serialize};

use super::PubKeys;

/// Why a coordinated multi-party operation (keygen, keysign) failed and which nodes are implicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    pub fail_reason: String,
    #[serde(rename = "blame_peers", default, skip_serializing_if = "Vec::is_empty")]
    pub blame_nodes: PubKeys,
}

impl Blame {
    pub fn new(fail_reason: impl Into<String>, blame_nodes: PubKeys) -> Self {
        Blame {
            fail_reason: fail_reason.into(),
            blame_nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fail_reason.is_empty() && self.blame_nodes.is_empty()
    }
}

impl fmt::Display for Blame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "reason:{}", self.fail_reason)?;
        write!(f, "nodes:[")?;
        for (i, node) in self.blame_nodes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{node}")?;
        }
        writeln!(f, "]")
    }
}
