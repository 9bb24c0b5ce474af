//! Join path resolution over a connection's declared foreign keys.
//!
//! Unlike the teacher's statistical relationship inference, this graph is
//! built exclusively from foreign keys the database actually declares
//! (`ForeignKeyInfo` from introspection), no overlap-based guessing. Tables
//! are keyed as `"{schema}.{table}"`. Path-finding itself (BFS over an
//! undirected graph, parent-pointer reconstruction) is the same shape as the
//! teacher's `model_graph::path` module.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::error::{SemanticError, SemanticResult};
use crate::worker::protocol::ForeignKeyInfo;

/// One hop of a resolved join path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub from_table: String,
    pub to_table: String,
    pub from_columns: Vec<String>,
    pub to_columns: Vec<String>,
}

/// An ordered sequence of joins connecting a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinPath {
    pub edges: Vec<JoinEdge>,
}

impl JoinPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Graph of declared foreign-key relationships between tables in a connection's
/// schema snapshot, used to resolve join paths for query synthesis.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    graph: UnGraph<String, JoinEdge>,
    node_indices: HashMap<String, NodeIndex>,
}

/// Qualify a schema/table pair into the graph's node key.
pub fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

impl JoinGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a join graph from every table's declared foreign keys.
    ///
    /// `tables` maps a table key (`table_key(schema, table)`) to the foreign
    /// keys declared on that table. Only keys whose referenced table is also
    /// present in `tables` become edges; dangling references are skipped.
    pub fn build(tables: &HashMap<String, Vec<ForeignKeyInfo>>) -> Self {
        let mut g = Self::new();
        for key in tables.keys() {
            g.ensure_node(key);
        }
        for (from_key, fks) in tables {
            for fk in fks {
                let to_key = table_key(&fk.referenced_schema, &fk.referenced_table);
                if !g.node_indices.contains_key(&to_key) {
                    continue;
                }
                g.add_edge(
                    from_key,
                    &to_key,
                    fk.columns.clone(),
                    fk.referenced_columns.clone(),
                );
            }
        }
        g
    }

    fn ensure_node(&mut self, key: &str) -> NodeIndex {
        if let Some(idx) = self.node_indices.get(key) {
            return *idx;
        }
        let idx = self.graph.add_node(key.to_string());
        self.node_indices.insert(key.to_string(), idx);
        idx
    }

    fn add_edge(
        &mut self,
        from_table: &str,
        to_table: &str,
        from_columns: Vec<String>,
        to_columns: Vec<String>,
    ) {
        let from_idx = self.ensure_node(from_table);
        let to_idx = self.ensure_node(to_table);
        if self.graph.find_edge(from_idx, to_idx).is_some() {
            return;
        }
        self.graph.add_edge(
            from_idx,
            to_idx,
            JoinEdge {
                from_table: from_table.into(),
                to_table: to_table.into(),
                from_columns,
                to_columns,
            },
        );
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.node_indices.contains_key(table)
    }

    /// Shortest join path between two tables, via BFS over declared FKs.
    pub fn find_path(&self, from: &str, to: &str) -> SemanticResult<JoinPath> {
        if from == to {
            return Ok(JoinPath::new());
        }

        let from_idx = *self
            .node_indices
            .get(from)
            .ok_or_else(|| SemanticError::NotFound(format!("table '{}'", from)))?;
        let to_idx = *self
            .node_indices
            .get(to)
            .ok_or_else(|| SemanticError::NotFound(format!("table '{}'", to)))?;

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut parents: HashMap<NodeIndex, (NodeIndex, JoinEdge)> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();

        visited.insert(from_idx);
        queue.push_back(from_idx);

        while let Some(current) = queue.pop_front() {
            if current == to_idx {
                return Ok(self.reconstruct(from_idx, to_idx, &parents));
            }
            for edge_ref in self.graph.edges(current) {
                let neighbor = if edge_ref.source() == current {
                    edge_ref.target()
                } else {
                    edge_ref.source()
                };
                if visited.contains(&neighbor) {
                    continue;
                }
                let mut edge = edge_ref.weight().clone();
                // Normalize the edge's direction to current -> neighbor.
                let current_name = &self.graph[current];
                if &edge.from_table != current_name {
                    edge = JoinEdge {
                        from_table: edge.to_table,
                        to_table: edge.from_table,
                        from_columns: edge.to_columns,
                        to_columns: edge.from_columns,
                    };
                }
                visited.insert(neighbor);
                parents.insert(neighbor, (current, edge));
                queue.push_back(neighbor);
            }
        }

        Err(SemanticError::NoJoinPath {
            from: from.into(),
            to: to.into(),
        })
    }

    fn reconstruct(
        &self,
        from_idx: NodeIndex,
        to_idx: NodeIndex,
        parents: &HashMap<NodeIndex, (NodeIndex, JoinEdge)>,
    ) -> JoinPath {
        let mut edges = Vec::new();
        let mut current = to_idx;
        while current != from_idx {
            let (parent, edge) = &parents[&current];
            edges.push(edge.clone());
            current = *parent;
        }
        edges.reverse();
        JoinPath { edges }
    }

    /// Join path touching every table in `tables`, rooted at `tables[0]`.
    /// Edges are deduplicated across the individual pairwise paths.
    pub fn find_join_tree(&self, tables: &[&str]) -> SemanticResult<JoinPath> {
        let root = match tables.first() {
            Some(r) => *r,
            None => return Ok(JoinPath::new()),
        };
        let mut all_edges = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for target in &tables[1..] {
            if *target == root {
                continue;
            }
            let path = self.find_path(root, target)?;
            for edge in path.edges {
                let pair = (edge.from_table.clone(), edge.to_table.clone());
                if seen.insert(pair) {
                    all_edges.push(edge);
                }
            }
        }
        Ok(JoinPath { edges: all_edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(cols: &[&str], ref_table: &str, ref_cols: &[&str]) -> ForeignKeyInfo {
        ForeignKeyInfo {
            name: "fk".into(),
            columns: cols.iter().map(|s| s.to_string()).collect(),
            referenced_schema: "public".into(),
            referenced_table: ref_table.into(),
            referenced_columns: ref_cols.iter().map(|s| s.to_string()).collect(),
            on_delete: None,
            on_update: None,
        }
    }

    fn sample_graph() -> JoinGraph {
        let mut tables = HashMap::new();
        tables.insert(
            table_key("public", "orders"),
            vec![fk(&["customer_id"], "customers", &["id"])],
        );
        tables.insert(table_key("public", "customers"), vec![]);
        tables.insert(
            table_key("public", "order_items"),
            vec![fk(&["order_id"], "orders", &["id"])],
        );
        JoinGraph::build(&tables)
    }

    #[test]
    fn test_direct_path() {
        let g = sample_graph();
        let path = g
            .find_path(&table_key("public", "orders"), &table_key("public", "customers"))
            .unwrap();
        assert_eq!(path.edges.len(), 1);
        assert_eq!(path.edges[0].from_table, table_key("public", "orders"));
    }

    #[test]
    fn test_transitive_path() {
        let g = sample_graph();
        let path = g
            .find_path(
                &table_key("public", "order_items"),
                &table_key("public", "customers"),
            )
            .unwrap();
        assert_eq!(path.edges.len(), 2);
    }

    #[test]
    fn test_same_table_empty_path() {
        let g = sample_graph();
        let path = g
            .find_path(&table_key("public", "orders"), &table_key("public", "orders"))
            .unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_no_path_returns_error() {
        let mut tables = HashMap::new();
        tables.insert(table_key("public", "orders"), vec![]);
        tables.insert(table_key("public", "widgets"), vec![]);
        let g = JoinGraph::build(&tables);
        let err = g
            .find_path(&table_key("public", "orders"), &table_key("public", "widgets"))
            .unwrap_err();
        assert!(matches!(err, SemanticError::NoJoinPath { .. }));
    }

    #[test]
    fn test_dangling_fk_skipped() {
        let mut tables = HashMap::new();
        tables.insert(
            table_key("public", "orders"),
            vec![fk(&["vendor_id"], "vendors_not_introspected", &["id"])],
        );
        let g = JoinGraph::build(&tables);
        assert!(!g.has_table(&table_key("public", "vendors_not_introspected")));
    }

    #[test]
    fn test_join_tree_dedups_edges() {
        let g = sample_graph();
        let path = g
            .find_join_tree(&[
                &table_key("public", "order_items"),
                &table_key("public", "orders"),
                &table_key("public", "customers"),
            ])
            .unwrap();
        assert_eq!(path.edges.len(), 2);
    }
}
