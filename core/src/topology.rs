//! Server tree
//!
//! Every server on the network is a node in a tree rooted at this server.
//! Nodes are added under an existing parent and removed together with their
//! whole subtree, so the tree invariant holds by construction.

use crate::{Error, Result};
use std::collections::HashMap;

/// One server in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeServer {
    /// Server ID
    pub sid: String,
    /// Server name
    pub name: String,
    /// Server description
    pub description: String,
    /// Version string reported by the server
    pub version: String,
    /// Parent SID, `None` for the root
    pub parent: Option<String>,
    /// Child SIDs in link order
    pub children: Vec<String>,
}

impl TreeServer {
    pub fn new(sid: &str, name: &str, description: &str, version: &str) -> Self {
        Self {
            sid: sid.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            parent: None,
            children: Vec::new(),
        }
    }
}

/// The server tree, owned by one coordinator
#[derive(Debug, Clone)]
pub struct Topology {
    root: String,
    servers: HashMap<String, TreeServer>,
}

impl Topology {
    /// Create a tree holding only the local server
    pub fn new(local: TreeServer) -> Self {
        let root = local.sid.clone();
        let mut servers = HashMap::new();
        servers.insert(
            root.clone(),
            TreeServer {
                parent: None,
                children: Vec::new(),
                ..local
            },
        );
        Self { root, servers }
    }

    /// The local server
    pub fn root(&self) -> &TreeServer {
        &self.servers[&self.root]
    }

    /// Attach a server beneath `parent_sid`
    pub fn add_server(&mut self, parent_sid: &str, server: TreeServer) -> Result<()> {
        if !self.servers.contains_key(parent_sid) {
            return Err(Error::Topology(format!("Unknown parent server {}", parent_sid)));
        }
        if self.servers.contains_key(&server.sid) {
            return Err(Error::Topology(format!("Server ID {} already exists", server.sid)));
        }
        if self.find_by_name(&server.name).is_some() {
            return Err(Error::Topology(format!("Server {} already exists", server.name)));
        }

        let sid = server.sid.clone();
        self.servers.insert(
            sid.clone(),
            TreeServer {
                parent: Some(parent_sid.to_string()),
                children: Vec::new(),
                ..server
            },
        );
        if let Some(parent) = self.servers.get_mut(parent_sid) {
            parent.children.push(sid);
        }
        Ok(())
    }

    /// Remove a server and all of its descendants. Returns the removed nodes,
    /// the named server first.
    pub fn remove_server(&mut self, sid: &str) -> Result<Vec<TreeServer>> {
        if sid == self.root {
            return Err(Error::Topology("Cannot remove the local server".to_string()));
        }
        let parent = self
            .servers
            .get(sid)
            .and_then(|server| server.parent.clone())
            .ok_or_else(|| Error::Topology(format!("Unknown server {}", sid)))?;

        if let Some(parent) = self.servers.get_mut(&parent) {
            parent.children.retain(|child| child != sid);
        }

        let mut removed = Vec::new();
        let mut pending = vec![sid.to_string()];
        while let Some(current) = pending.pop() {
            if let Some(server) = self.servers.remove(&current) {
                pending.extend(server.children.iter().rev().cloned());
                removed.push(server);
            }
        }
        Ok(removed)
    }

    /// Server by SID
    pub fn find(&self, sid: &str) -> Option<&TreeServer> {
        self.servers.get(sid)
    }

    /// Server by name, case-insensitive
    pub fn find_by_name(&self, name: &str) -> Option<&TreeServer> {
        self.servers.values().find(|server| server.name.eq_ignore_ascii_case(name))
    }

    /// Children of a server in link order
    pub fn children(&self, sid: &str) -> impl Iterator<Item = &TreeServer> {
        self.servers
            .get(sid)
            .into_iter()
            .flat_map(|server| server.children.iter())
            .filter_map(|child| self.servers.get(child))
    }

    /// Whether `sid` is `ancestor` or lies beneath it
    pub fn is_within(&self, sid: &str, ancestor: &str) -> bool {
        let mut current = Some(sid);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.servers.get(node).and_then(|server| server.parent.as_deref());
        }
        false
    }

    /// Distance from the local server, `None` if unknown
    pub fn hops_to(&self, sid: &str) -> Option<u32> {
        let mut hops = 0;
        let mut server = self.servers.get(sid)?;
        while let Some(ref parent) = server.parent {
            hops += 1;
            server = self.servers.get(parent)?;
        }
        Some(hops)
    }

    /// Number of known servers, the local one included
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Topology {
        let mut topology = Topology::new(TreeServer::new("0AA", "hub.example.net", "Hub", "v1"));
        topology.add_server("0AA", TreeServer::new("1AA", "a.example.net", "A", "v1")).unwrap();
        topology.add_server("1AA", TreeServer::new("2AA", "a1.example.net", "A1", "v1")).unwrap();
        topology.add_server("0AA", TreeServer::new("3BB", "b.example.net", "B", "v1")).unwrap();
        topology
    }

    #[test]
    fn test_add_rejects_duplicates_and_orphans() {
        let mut topology = tree();
        let orphan = TreeServer::new("4CC", "c.example.net", "C", "v1");
        assert!(topology.add_server("9ZZ", orphan).is_err());
        let dup_sid = TreeServer::new("1AA", "dup.example.net", "D", "v1");
        assert!(topology.add_server("0AA", dup_sid).is_err());
        let dup_name = TreeServer::new("5DD", "A.EXAMPLE.NET", "D", "v1");
        assert!(topology.add_server("0AA", dup_name).is_err());
        assert_eq!(topology.len(), 4);
    }

    #[test]
    fn test_remove_takes_subtree() {
        let mut topology = tree();
        let removed = topology.remove_server("1AA").unwrap();
        let sids: Vec<_> = removed.iter().map(|s| s.sid.as_str()).collect();
        assert_eq!(sids, vec!["1AA", "2AA"]);
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.root().children, vec!["3BB".to_string()]);
        assert!(topology.remove_server("0AA").is_err());
    }

    #[test]
    fn test_ancestry_and_hops() {
        let topology = tree();
        assert!(topology.is_within("2AA", "1AA"));
        assert!(topology.is_within("1AA", "1AA"));
        assert!(!topology.is_within("3BB", "1AA"));
        assert_eq!(topology.hops_to("0AA"), Some(0));
        assert_eq!(topology.hops_to("2AA"), Some(2));
        assert_eq!(topology.hops_to("7XX"), None);
    }
}
