use rustc_hash::FxHashMap;
use serde::Serialize;

/// Bandwidth demand between two instance groups of one user request.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct GroupEdge {
    pub src_group: u32,
    pub dst_group: u32,
    /// Required bandwidth on the inter-datacenter link, Gb/s.
    pub required_bw: f64,
}

/// Affinity graph over the instance groups of one user request, with an
/// adjacency index so per-group edge lookups do not scan the whole edge list.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AffinityGraph {
    edges: Vec<GroupEdge>,
    #[serde(skip)]
    adjacency: FxHashMap<u32, Vec<usize>>,
}

impl AffinityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, src_group: u32, dst_group: u32, required_bw: f64) {
        let idx = self.edges.len();
        self.edges.push(GroupEdge {
            src_group,
            dst_group,
            required_bw,
        });
        self.adjacency.entry(src_group).or_default().push(idx);
        self.adjacency.entry(dst_group).or_default().push(idx);
    }

    pub fn edges(&self) -> &[GroupEdge] {
        &self.edges
    }

    /// Edges incident to the group, in insertion order.
    pub fn edges_of(&self, group_id: u32) -> impl Iterator<Item = &GroupEdge> + '_ {
        self.adjacency
            .get(&group_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }
}
