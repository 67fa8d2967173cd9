//! Node permission and writability.

use std::fmt;

/// Access permission required to interact with a node.
///
/// Ranked `none < list < read < write < config`; `never` sits outside the
/// ranking and means "no access under any token", used by
/// [`Permission::meets`] as an unconditional failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    None,
    List,
    Read,
    Write,
    Config,
    Never,
}

impl Permission {
    fn rank(self) -> u8 {
        match self {
            Permission::None => 0,
            Permission::List => 1,
            Permission::Read => 2,
            Permission::Write => 3,
            Permission::Config => 4,
            Permission::Never => u8::MAX,
        }
    }

    /// Whether a caller holding `self` meets the `required` threshold.
    /// `Never` never meets anything, including itself.
    pub fn meets(self, required: Permission) -> bool {
        if matches!(self, Permission::Never) || matches!(required, Permission::Never) {
            return false;
        }
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::None => "none",
            Permission::List => "list",
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Config => "config",
            Permission::Never => "never",
        };
        f.write_str(s)
    }
}

/// Whether, and under what permission, a node's value may be set by a
/// remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writable {
    Never,
    Write,
    Config,
}

impl fmt::Display for Writable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Writable::Never => "never",
            Writable::Write => "write",
            Writable::Config => "config",
        };
        f.write_str(s)
    }
}

/// Whether, and how, a node participates in the periodic serializer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerializationMode {
    None,
    MetadataOnly,
    Everything,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_ranking() {
        assert!(Permission::Config.meets(Permission::Read));
        assert!(!Permission::Read.meets(Permission::Write));
        assert!(Permission::Read.meets(Permission::Read));
    }

    #[test]
    fn never_meets_nothing() {
        assert!(!Permission::Never.meets(Permission::None));
        assert!(!Permission::Config.meets(Permission::Never));
    }
}
