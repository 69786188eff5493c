//! Node liveness tracking.
//!
//! A node is online while it has been heard from within the timeout.
//! Both heartbeats and data readings count as contact.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Liveness of one sensor node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: String,
    /// Latest contact; never moves backwards
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub online: bool,
    /// Uptime reported by the node's last heartbeat
    pub uptime_secs: Option<u64>,
}

/// A node's online flag changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTransition {
    pub node_id: String,
    pub online: bool,
}

/// Tracks every configured node.
#[derive(Debug, Clone)]
pub struct NodeHealthMonitor {
    nodes: BTreeMap<String, NodeHealth>,
    timeout: Duration,
}

impl NodeHealthMonitor {
    pub fn new<I, S>(node_ids: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes = node_ids
            .into_iter()
            .map(|id| {
                let node_id = id.into();
                (
                    node_id.clone(),
                    NodeHealth {
                        node_id,
                        last_heartbeat: None,
                        online: false,
                        uptime_secs: None,
                    },
                )
            })
            .collect();
        Self { nodes, timeout }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Record contact from a node received at `now`.
    ///
    /// Returns a transition when the node comes back online. Contact older
    /// than the timeout never brings a node online. Unknown ids are ignored.
    pub fn touch(
        &mut self,
        node_id: &str,
        at: DateTime<Utc>,
        uptime_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Option<NodeTransition> {
        let node = self.nodes.get_mut(node_id)?;

        match node.last_heartbeat {
            Some(prev) if at < prev => {
                // out-of-order contact does not move liveness backwards
            }
            _ => {
                node.last_heartbeat = Some(at);
                if uptime_secs.is_some() {
                    node.uptime_secs = uptime_secs;
                }
            }
        }

        let alive = node
            .last_heartbeat
            .is_some_and(|seen| now - seen <= self.timeout);
        if node.online || !alive {
            None
        } else {
            node.online = true;
            Some(NodeTransition {
                node_id: node.node_id.clone(),
                online: true,
            })
        }
    }

    /// Expire nodes not heard from within the timeout.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<NodeTransition> {
        let mut changed = Vec::new();
        for node in self.nodes.values_mut() {
            let alive = node
                .last_heartbeat
                .is_some_and(|seen| now - seen <= self.timeout);
            if node.online && !alive {
                node.online = false;
                changed.push(NodeTransition {
                    node_id: node.node_id.clone(),
                    online: false,
                });
            }
        }
        changed
    }

    pub fn is_online(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|n| n.online)
    }

    pub fn online_count(&self) -> usize {
        self.nodes.values().filter(|n| n.online).count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHealth> {
        self.nodes.values()
    }

    /// Longest reported uptime among online nodes.
    pub fn max_uptime(&self) -> Option<u64> {
        self.nodes
            .values()
            .filter(|n| n.online)
            .filter_map(|n| n.uptime_secs)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> NodeHealthMonitor {
        NodeHealthMonitor::new(["NODE_A", "NODE_B"], Duration::seconds(30))
    }

    #[test]
    fn test_nodes_start_offline() {
        let m = monitor();
        assert!(!m.is_online("NODE_A"));
        assert_eq!(m.online_count(), 0);
    }

    #[test]
    fn test_heartbeat_brings_online() {
        let mut m = monitor();
        let now = Utc::now();
        let t = m.touch("NODE_A", now, Some(12), now);
        assert_eq!(
            t,
            Some(NodeTransition {
                node_id: "NODE_A".to_string(),
                online: true
            })
        );
        assert!(m.is_online("NODE_A"));
        assert_eq!(m.max_uptime(), Some(12));
        assert!(m.touch("NODE_A", now, None, now).is_none());
    }

    #[test]
    fn test_timeout_marks_offline_and_recovers() {
        let mut m = monitor();
        let start = Utc::now();
        m.touch("NODE_A", start, None, start);
        assert!(m.tick(start + Duration::seconds(30)).is_empty());

        let changed = m.tick(start + Duration::seconds(31));
        assert_eq!(changed.len(), 1);
        assert!(!m.is_online("NODE_A"));

        m.touch(
            "NODE_A",
            start + Duration::seconds(40),
            None,
            start + Duration::seconds(40),
        );
        assert!(m.is_online("NODE_A"));
    }

    #[test]
    fn test_liveness_never_moves_backwards() {
        let mut m = monitor();
        let now = Utc::now();
        m.touch("NODE_A", now, None, now);
        m.touch("NODE_A", now - Duration::seconds(20), None, now);
        let node = m.nodes().find(|n| n.node_id == "NODE_A").unwrap();
        assert_eq!(node.last_heartbeat, Some(now));
    }

    #[test]
    fn test_late_contact_from_dead_node_stays_offline() {
        let mut m = monitor();
        let start = Utc::now();
        m.touch("NODE_A", start, None, start);
        let later = start + Duration::seconds(120);
        assert_eq!(m.tick(later).len(), 1);

        // delayed packets sensed long ago
        assert!(m
            .touch("NODE_A", start - Duration::seconds(5), None, later)
            .is_none());
        assert!(m
            .touch("NODE_A", start + Duration::seconds(60), None, later)
            .is_none());
        assert!(!m.is_online("NODE_A"));
        assert!(m.tick(later).is_empty());
    }

    #[test]
    fn test_unknown_node_ignored() {
        let mut m = monitor();
        let now = Utc::now();
        assert!(m.touch("NODE_Z", now, None, now).is_none());
        assert!(!m.contains("NODE_Z"));
    }
}
