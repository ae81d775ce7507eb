//! Hierarchical Navigable Small World index for approximate nearest
//! neighbours
//!
//! Maps string ids to L2-normalised vectors of a fixed dimension and answers
//! cosine-similarity queries. The structure is a stack of small-world layers:
//! every node lives on layer 0, and each node is additionally promoted to
//! higher layers with geometrically decreasing probability. Queries descend
//! greedily through the sparse upper layers, then run a beam search on
//! layer 0.
//!
//! The promotion level is derived from the FNV-1a hash of the id rather than
//! an RNG, so index construction is reproducible for a given insertion set.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ahash::{AHashMap, AHashSet};
use ordered_float::OrderedFloat;

use crate::error::{Result, RetrievalError};
use crate::graph::fnv1a_hash;

/// Tuning parameters for the index
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Maximum neighbours kept per node per layer (M)
    pub max_connections: usize,
    /// Beam width during insertion
    pub ef_construction: usize,
    /// Default beam width during search
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

/// A search result: id plus cosine similarity, descending
#[derive(Debug, Clone, PartialEq)]
pub struct AnnHit {
    pub id: String,
    pub similarity: f32,
}

/// Aggregate index statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct HnswStats {
    pub count: usize,
    pub dimension: Option<usize>,
    pub max_level: usize,
}

#[derive(Debug, Clone)]
struct HnswEntry {
    vector: Vec<f32>,
    level: usize,
    /// neighbours[l] is the neighbour set on layer l, 0..=level
    neighbors: Vec<AHashSet<String>>,
}

/// The ANN index
#[derive(Debug, Clone, Default)]
pub struct HnswIndex {
    config: HnswConfig,
    dimension: Option<usize>,
    entry_point: Option<String>,
    max_level: usize,
    nodes: AHashMap<String, HnswEntry>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            dimension: None,
            entry_point: None,
            max_level: 0,
            nodes: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> HnswStats {
        HnswStats {
            count: self.nodes.len(),
            dimension: self.dimension,
            max_level: self.max_level,
        }
    }

    /// Drop every vector and reset the dimension
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.dimension = None;
    }

    /// Insert a vector under `id`, replacing any existing vector for that id
    ///
    /// The vector is L2-normalised on insert. The dimension is fixed by the
    /// first insert; later inserts of a different dimension fail, as do
    /// zero-length vectors.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(RetrievalError::graph("cannot index a zero-length vector"));
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => {
                return Err(RetrievalError::graph(format!(
                    "vector dimension {} does not match index dimension {}",
                    vector.len(),
                    dim
                )));
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }

        if self.nodes.contains_key(id) {
            self.remove(id);
            // Re-check: removal may have cleared the index and its dimension
            if self.dimension.is_none() {
                self.dimension = Some(vector.len());
            }
        }

        let vector = normalize(vector);
        let level = self.assign_level(id);
        let entry = HnswEntry {
            vector,
            level,
            neighbors: vec![AHashSet::new(); level + 1],
        };

        let Some(entry_point) = self.entry_point.clone() else {
            self.nodes.insert(id.to_string(), entry);
            self.entry_point = Some(id.to_string());
            self.max_level = level;
            return Ok(());
        };

        let query = entry.vector.clone();
        self.nodes.insert(id.to_string(), entry);

        // Greedy descent through the layers above the new node's level
        let mut current = entry_point;
        let mut layer = self.max_level;
        while layer > level {
            current = self.greedy_closest(&query, current, layer);
            layer -= 1;
        }

        // Link on each layer the new node occupies
        let top = level.min(self.max_level);
        for layer in (0..=top).rev() {
            let found = self.search_layer(&query, &current, self.config.ef_construction, layer);
            let m = self.config.max_connections;
            let chosen: Vec<String> = found.iter().take(m).map(|h| h.id.clone()).collect();

            for neighbor_id in &chosen {
                self.link(id, neighbor_id, layer);
                self.prune(neighbor_id, layer);
            }
            if let Some(best) = chosen.first() {
                current = best.clone();
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id.to_string());
        }
        Ok(())
    }

    /// Detach and remove a vector; entry point and max level are recomputed
    /// when the removed node held either role
    pub fn remove(&mut self, id: &str) {
        let Some(entry) = self.nodes.remove(id) else {
            return;
        };

        // Detach from every neighbour set that references the node
        for (layer, neighbor_set) in entry.neighbors.iter().enumerate() {
            for neighbor_id in neighbor_set {
                if let Some(other) = self.nodes.get_mut(neighbor_id) {
                    if let Some(set) = other.neighbors.get_mut(layer) {
                        set.remove(id);
                    }
                }
            }
        }
        // Pruning can leave asymmetric links; sweep the remainder
        for other in self.nodes.values_mut() {
            for set in &mut other.neighbors {
                set.remove(id);
            }
        }

        if self.nodes.is_empty() {
            self.entry_point = None;
            self.max_level = 0;
            self.dimension = None;
            return;
        }

        if self.entry_point.as_deref() == Some(id) || entry.level >= self.max_level {
            let (new_entry, new_level) = self
                .nodes
                .iter()
                .max_by_key(|(nid, e)| (e.level, std::cmp::Reverse(fnv1a_hash(nid))))
                .map(|(nid, e)| (nid.clone(), e.level))
                .unwrap_or_default();
            self.entry_point = Some(new_entry);
            self.max_level = new_level;
        }
    }

    /// Nearest neighbours of `query` by cosine similarity, best first
    ///
    /// Searching an empty index returns an empty list; a query of the wrong
    /// dimension is an error.
    pub fn search(&self, query: &[f32], top_k: usize, ef: Option<usize>) -> Result<Vec<AnnHit>> {
        if self.nodes.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.dimension.unwrap_or(0);
        if query.len() != dim {
            return Err(RetrievalError::graph(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dim
            )));
        }

        let query = normalize(query);
        let mut current = self
            .entry_point
            .clone()
            .unwrap_or_else(|| self.nodes.keys().next().cloned().unwrap_or_default());

        // Hill-climb through upper layers
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_closest(&query, current, layer);
        }

        // Beam search at layer 0
        let ef = ef.unwrap_or(self.config.ef_search).max(top_k);
        let mut hits = self.search_layer(&query, &current, ef, 0);
        hits.truncate(top_k);
        Ok(hits)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Deterministic level: ⌊−ln(U)/ln(M)⌋ with U derived from the id hash
    fn assign_level(&self, id: &str) -> usize {
        let hash = fnv1a_hash(id);
        let unit = (hash as f64 + 1.0) / (u64::MAX as f64 + 2.0);
        let m = self.config.max_connections.max(2) as f64;
        (-unit.ln() / m.ln()).floor() as usize
    }

    fn similarity(&self, query: &[f32], id: &str) -> f32 {
        self.nodes
            .get(id)
            .map(|e| dot(query, &e.vector))
            .unwrap_or(f32::MIN)
    }

    /// Hill-climb on one layer: repeatedly move to the closest neighbour
    fn greedy_closest(&self, query: &[f32], start: String, layer: usize) -> String {
        let mut current = start;
        let mut current_sim = self.similarity(query, &current);
        loop {
            let Some(entry) = self.nodes.get(&current) else {
                return current;
            };
            let Some(neighbors) = entry.neighbors.get(layer) else {
                return current;
            };
            let mut improved = false;
            for neighbor in neighbors {
                let sim = self.similarity(query, neighbor);
                if sim > current_sim {
                    current = neighbor.clone();
                    current_sim = sim;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer: returns up to `ef` hits, best first
    fn search_layer(&self, query: &[f32], start: &str, ef: usize, layer: usize) -> Vec<AnnHit> {
        let mut visited: AHashSet<&str> = AHashSet::new();
        // Max-heap of frontier candidates by similarity
        let mut frontier: BinaryHeap<(OrderedFloat<f32>, String)> = BinaryHeap::new();
        // Min-heap of the ef best results found so far
        let mut best: BinaryHeap<Reverse<(OrderedFloat<f32>, String)>> = BinaryHeap::new();

        let start_sim = self.similarity(query, start);
        if let Some((key, _)) = self.nodes.get_key_value(start) {
            visited.insert(key.as_str());
        }
        frontier.push((OrderedFloat(start_sim), start.to_string()));
        best.push(Reverse((OrderedFloat(start_sim), start.to_string())));

        while let Some((sim, candidate)) = frontier.pop() {
            let worst = best
                .peek()
                .map(|Reverse((s, _))| *s)
                .unwrap_or(OrderedFloat(f32::MIN));
            if best.len() >= ef && sim < worst {
                break;
            }

            let Some(entry) = self.nodes.get(&candidate) else {
                continue;
            };
            let Some(neighbors) = entry.neighbors.get(layer) else {
                continue;
            };
            for neighbor in neighbors {
                let Some((key, _)) = self.nodes.get_key_value(neighbor) else {
                    continue;
                };
                if !visited.insert(key.as_str()) {
                    continue;
                }
                let sim = self.similarity(query, neighbor);
                let worst = best
                    .peek()
                    .map(|Reverse((s, _))| *s)
                    .unwrap_or(OrderedFloat(f32::MIN));
                if best.len() < ef || OrderedFloat(sim) > worst {
                    frontier.push((OrderedFloat(sim), neighbor.clone()));
                    best.push(Reverse((OrderedFloat(sim), neighbor.clone())));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut hits: Vec<AnnHit> = best
            .into_iter()
            .map(|Reverse((sim, id))| AnnHit {
                id,
                similarity: sim.0,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    /// Symmetrically link two nodes on a layer
    fn link(&mut self, a: &str, b: &str, layer: usize) {
        if a == b {
            return;
        }
        if let Some(entry) = self.nodes.get_mut(a) {
            if let Some(set) = entry.neighbors.get_mut(layer) {
                set.insert(b.to_string());
            }
        }
        if let Some(entry) = self.nodes.get_mut(b) {
            if let Some(set) = entry.neighbors.get_mut(layer) {
                set.insert(a.to_string());
            }
        }
    }

    /// Shrink an over-filled neighbour set back to M, keeping the closest
    fn prune(&mut self, id: &str, layer: usize) {
        let m = self.config.max_connections;
        let Some(entry) = self.nodes.get(id) else {
            return;
        };
        let Some(set) = entry.neighbors.get(layer) else {
            return;
        };
        if set.len() <= m {
            return;
        }

        let own = entry.vector.clone();
        let mut ranked: Vec<(OrderedFloat<f32>, String)> = set
            .iter()
            .map(|n| (OrderedFloat(self.similarity(&own, n)), n.clone()))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let keep: AHashSet<String> = ranked.into_iter().take(m).map(|(_, n)| n).collect();

        if let Some(entry) = self.nodes.get_mut(id) {
            if let Some(set) = entry.neighbors.get_mut(layer) {
                set.retain(|n| keep.contains(n));
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}
