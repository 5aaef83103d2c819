//! Node graph data structures and operations

use super::node::{Node, NodeId};
use super::port::PortId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A directed edge from a producer's output port to a consumer's input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub to_port: PortId,
}

impl Connection {
    /// Creates a new connection
    pub fn new(from_node: NodeId, to_node: NodeId, to_port: PortId) -> Self {
        Self {
            from_node,
            to_node,
            to_port,
        }
    }
}

/// A graph containing nodes and their connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGraph {
    pub nodes: HashMap<NodeId, Node>,
    pub connections: Vec<Connection>,
    next_node_id: NodeId,
}

impl NodeGraph {
    /// Creates a new empty node graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the graph and returns its assigned id
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = self.next_node_id;
        node.id = id;
        self.nodes.insert(id, node);
        self.next_node_id += 1;
        id
    }

    /// Removes a node and all its connections
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        self.connections
            .retain(|conn| conn.from_node != node_id && conn.to_node != node_id);
        self.nodes.remove(&node_id)
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Adds a connection between two nodes.
    ///
    /// An input port accepts at most one incoming link; linking over an
    /// occupied port replaces the previous link, matching host editor
    /// behavior.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), String> {
        if connection.from_node == connection.to_node {
            return Err("cannot connect a node to itself".to_string());
        }
        let from = self
            .nodes
            .get(&connection.from_node)
            .ok_or_else(|| format!("source node {} does not exist", connection.from_node))?;
        if from.output.is_none() {
            return Err(format!("node {} has no output port", connection.from_node));
        }
        let to = self
            .nodes
            .get(&connection.to_node)
            .ok_or_else(|| format!("target node {} does not exist", connection.to_node))?;
        if connection.to_port >= to.inputs.len() {
            return Err(format!(
                "node {} has no input port {}",
                connection.to_node, connection.to_port
            ));
        }

        self.connections
            .retain(|c| !(c.to_node == connection.to_node && c.to_port == connection.to_port));
        self.connections.push(connection);
        Ok(())
    }

    /// Removes the link feeding the given input port, if any
    pub fn remove_connection(&mut self, to_node: NodeId, to_port: PortId) -> Option<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.to_node == to_node && c.to_port == to_port)?;
        Some(self.connections.remove(index))
    }

    /// The link feeding the given input port, if any
    pub fn connection_to(&self, to_node: NodeId, to_port: PortId) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.to_node == to_node && c.to_port == to_port)
    }

    /// Direct consumers of a node's output
    pub fn consumers_of(&self, node_id: NodeId) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|c| c.from_node == node_id)
            .map(|c| c.to_node)
            .collect()
    }

    /// Resolves the real producer feeding an input port, walking through
    /// transparent reroute/frame nodes.
    ///
    /// Returns `None` for an unlinked port, a dangling link, or a chain of
    /// transparent nodes with nothing at the far end. A degenerate reroute
    /// loop terminates as `None` instead of spinning.
    pub fn resolve_producer(&self, to_node: NodeId, to_port: PortId) -> Option<NodeId> {
        let mut seen = HashSet::new();
        let mut current = self.connection_to(to_node, to_port)?.from_node;
        loop {
            if !seen.insert(current) {
                return None;
            }
            let node = self.node(current)?;
            if !node.kind().is_transparent() {
                return Some(current);
            }
            current = self.connection_to(current, 0)?.from_node;
        }
    }

    /// Execution order via Kahn's topological sort.
    ///
    /// Errors if the connection set contains a true cycle.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, String> {
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut adj_list: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node_id in self.nodes.keys() {
            in_degree.insert(*node_id, 0);
            adj_list.insert(*node_id, Vec::new());
        }
        for connection in &self.connections {
            adj_list
                .entry(connection.from_node)
                .or_default()
                .push(connection.to_node);
            *in_degree.entry(connection.to_node).or_default() += 1;
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        // Stable order keeps reset passes deterministic
        let mut sorted: Vec<NodeId> = queue.iter().copied().collect();
        sorted.sort_unstable();
        queue = sorted.into();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);
            if let Some(neighbors) = adj_list.get(&node_id) {
                let mut ready: Vec<NodeId> = Vec::new();
                for &neighbor in neighbors {
                    if let Some(degree) = in_degree.get_mut(&neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(neighbor);
                        }
                    }
                }
                ready.sort_unstable();
                queue.extend(ready);
            }
        }

        if result.len() != self.nodes.len() {
            return Err("cycle detected in node graph".to_string());
        }
        Ok(result)
    }

    /// Serializes the graph document to JSON
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("failed to serialize graph: {}", e))
    }

    /// Loads a graph document from JSON
    pub fn from_json(data: &str) -> Result<Self, String> {
        serde_json::from_str(data).map_err(|e| format!("failed to parse graph: {}", e))
    }
}
