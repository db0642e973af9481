//! Path layout of a cluster inside the coordination service.

/// `<root>/<host>:<port>` is a member's presence marker and directive slot;
/// `<root>/transfer/<host>:<port>` is its data-handoff inbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterPaths {
    root: String,
}

impl ClusterPaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn member(&self, address: &str) -> String {
        format!("{}/{}", self.root, address)
    }

    pub fn transfer_root(&self) -> String {
        format!("{}/transfer", self.root)
    }

    pub fn inbox(&self, address: &str) -> String {
        format!("{}/{}", self.transfer_root(), address)
    }

    /// Prefix for sequential messages posted into `address`'s inbox.
    pub fn inbox_message(&self, address: &str) -> String {
        format!("{}/msg-", self.inbox(address))
    }
}

impl Default for ClusterPaths {
    fn default() -> Self {
        Self::new("/shardkv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = ClusterPaths::new("/kv/");
        assert_eq!(paths.member("127.0.0.1:5000"), "/kv/127.0.0.1:5000");
        assert_eq!(paths.transfer_root(), "/kv/transfer");
        assert_eq!(paths.inbox("127.0.0.1:5000"), "/kv/transfer/127.0.0.1:5000");
        assert_eq!(
            paths.inbox_message("h:1"),
            "/kv/transfer/h:1/msg-"
        );
    }
}
