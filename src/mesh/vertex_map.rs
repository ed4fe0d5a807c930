//! Spatial matching of vertices between two meshes
//!
//! Candidates are bucketed along the X axis only. A vertex is compared
//! against its own bucket, and every candidate is stored in the buckets of
//! both `x - tolerance` and `x + tolerance`, so matches within tolerance of a
//! bucket boundary are still found. Matches further apart are not searched.

use crate::mesh::format::MeshBufferSemantic;
use crate::mesh::iter::ChannelReader;
use crate::mesh::mesh::Mesh;

const BUCKET_COUNT: usize = 256;

/// Matches of each vertex of a mesh into another mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexMatchMap {
    /// Start of each vertex's matches in `matches`
    pub first_match: Vec<u32>,
    /// Indices of vertices in the other mesh
    pub matches: Vec<u32>,
}

impl VertexMatchMap {
    /// Other-mesh vertices matched by `vertex`
    pub fn matches_of(&self, vertex: usize) -> &[u32] {
        if vertex >= self.first_match.len() {
            return &[];
        }
        let start = self.first_match[vertex] as usize;
        let end = self
            .first_match
            .get(vertex + 1)
            .map(|e| *e as usize)
            .unwrap_or(self.matches.len());
        &self.matches[start..end]
    }

    pub fn does_match(&self, vertex: usize, other_vertex: u32) -> bool {
        self.matches_of(vertex).contains(&other_vertex)
    }
}

impl Mesh {
    /// Find the vertices of `other` within `tolerance` of each vertex of this mesh
    pub fn get_vertex_map(&self, other: &Mesh, tolerance: f32) -> VertexMatchMap {
        let vertex_count = self.vertex_count();
        let mut map = VertexMatchMap {
            first_match: vec![0; vertex_count],
            matches: Vec::with_capacity(vertex_count + (vertex_count >> 2)),
        };

        let (Some(positions), Some(other_positions)) = (
            ChannelReader::new(self.vertex_buffers(), MeshBufferSemantic::Position, 0),
            ChannelReader::new(other.vertex_buffers(), MeshBufferSemantic::Position, 0),
        ) else {
            return map;
        };
        if vertex_count == 0 || other_positions.is_empty() {
            return map;
        }

        let mut range_min = f32::MAX;
        let mut range_max = f32::MIN;
        for v in 0..other_positions.len() {
            let x = other_positions.as_vec3(v).x;
            range_min = range_min.min(x);
            range_max = range_max.max(x);
        }
        range_min -= tolerance;
        range_max += tolerance;

        let mut bucket_size = (range_max - range_min) / BUCKET_COUNT as f32;
        if bucket_size <= 0.0 {
            bucket_size = 1.0;
        }
        let bucket_of = |x: f32| -> i64 { ((x - range_min) / bucket_size).floor() as i64 };
        let clamp_bucket = |b: i64| b.clamp(0, BUCKET_COUNT as i64 - 1) as usize;

        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); BUCKET_COUNT];
        for v in 0..other_positions.len() {
            let x = other_positions.as_vec3(v).x;
            let low = clamp_bucket(bucket_of(x - tolerance));
            let high = clamp_bucket(bucket_of(x + tolerance));
            buckets[low].push(v as u32);
            if high != low {
                buckets[high].push(v as u32);
            }
        }

        for v in 0..vertex_count {
            map.first_match[v] = map.matches.len() as u32;
            let position = positions.as_vec3(v);
            let bucket = bucket_of(position.x);
            if bucket < 0 || bucket >= BUCKET_COUNT as i64 {
                continue;
            }
            for &candidate in &buckets[bucket as usize] {
                let diff = (position - other_positions.as_vec3(candidate as usize)).abs();
                if diff.x <= tolerance && diff.y <= tolerance && diff.z <= tolerance {
                    map.matches.push(candidate);
                }
            }
        }
        map
    }
}
