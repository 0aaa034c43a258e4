//! Topological line merging.
//!
//! Every polyline of every feature becomes an edge of a planar graph
//! whose nodes are exact endpoint coordinates. Maximal chains of edges
//! joined at nodes of degree two are fused into single `LineString`s;
//! chains stop at endpoints, junctions, and where a ring closes.
//!
//! A merged line with two or fewer coordinates rejects the whole merge
//! and the input collection is returned unchanged.

use std::collections::HashMap;

use civic_map_bicycle_network_models::{
    FeatureCollection, LineFeature, LineGeometry, MergeOutcome,
};
use geo::{Coord, LineString};

/// Merged lines at or below this many coordinates fail the merge.
const STUB_COORDINATES: usize = 2;

type NodeKey = (u64, u64);

fn node_key(c: Coord<f64>) -> NodeKey {
    // Adding 0.0 folds -0.0 into 0.0.
    ((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
}

struct Edge {
    coords: Vec<Coord<f64>>,
    start: NodeKey,
    end: NodeKey,
}

struct Graph {
    edges: Vec<Edge>,
    /// Incident edge indices per node; a ring edge appears twice.
    nodes: HashMap<NodeKey, Vec<usize>>,
}

impl Graph {
    fn build(lines: &[&LineString<f64>]) -> Self {
        let mut graph = Self {
            edges: Vec::with_capacity(lines.len()),
            nodes: HashMap::new(),
        };

        for line in lines {
            let mut coords: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
            for c in &line.0 {
                if coords.last() != Some(c) {
                    coords.push(*c);
                }
            }
            let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied())
            else {
                continue;
            };
            if coords.len() < 2 {
                continue;
            }

            let index = graph.edges.len();
            let (start, end) = (node_key(first), node_key(last));
            graph.nodes.entry(start).or_default().push(index);
            graph.nodes.entry(end).or_default().push(index);
            graph.edges.push(Edge { coords, start, end });
        }

        graph
    }

    fn degree(&self, node: NodeKey) -> usize {
        self.nodes.get(&node).map_or(0, Vec::len)
    }

    fn next_unvisited(&self, node: NodeKey, visited: &[bool]) -> Option<usize> {
        self.nodes
            .get(&node)
            .and_then(|edges| edges.iter().copied().find(|&e| !visited[e]))
    }

    /// Walks a chain starting at `from` through `first`, stopping at the
    /// first node whose degree is not two or when no unvisited edge is
    /// left (a closed ring).
    fn walk(&self, from: NodeKey, first: usize, visited: &mut [bool]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = Vec::new();
        let mut forward = 0usize;
        let mut reverse = 0usize;
        let mut node = from;
        let mut edge_index = first;

        loop {
            visited[edge_index] = true;
            let edge = &self.edges[edge_index];
            let along = edge.start == node;
            let skip = usize::from(!coords.is_empty());

            if along {
                forward += 1;
                coords.extend(edge.coords.iter().skip(skip).copied());
                node = edge.end;
            } else {
                reverse += 1;
                coords.extend(edge.coords.iter().rev().skip(skip).copied());
                node = edge.start;
            }

            if self.degree(node) != 2 {
                break;
            }
            match self.next_unvisited(node, visited) {
                Some(next) => edge_index = next,
                None => break,
            }
        }

        if reverse > forward {
            coords.reverse();
        }
        LineString::new(coords)
    }

    fn merge(&self) -> Vec<LineString<f64>> {
        let mut visited = vec![false; self.edges.len()];
        let mut merged = Vec::new();

        for (index, edge) in self.edges.iter().enumerate() {
            if visited[index] {
                continue;
            }
            if self.degree(edge.start) != 2 {
                merged.push(self.walk(edge.start, index, &mut visited));
            } else if self.degree(edge.end) != 2 {
                merged.push(self.walk(edge.end, index, &mut visited));
            }
        }

        // Whatever is left lies on rings of degree-two nodes only.
        for index in 0..self.edges.len() {
            if !visited[index] {
                merged.push(self.walk(self.edges[index].start, index, &mut visited));
            }
        }

        merged
    }
}

/// Fuses line fragments sharing endpoints into maximal `LineString`s.
///
/// Every output feature is a `LineString`. If any merged line has
/// [`STUB_COORDINATES`] or fewer coordinates, the merge is rejected and
/// the input collection is returned as [`MergeOutcome::Unmerged`].
#[must_use]
pub fn merge_linestrings(collection: FeatureCollection) -> MergeOutcome {
    let lines: Vec<&LineString<f64>> = collection
        .features
        .iter()
        .flat_map(|feature| feature.geometry.parts())
        .collect();
    let input_lines = lines.len();

    let merged = Graph::build(&lines).merge();

    if let Some(stub) = merged.iter().find(|line| line.0.len() <= STUB_COORDINATES) {
        log::warn!(
            "Merge produced a line with {} coordinate(s); keeping {input_lines} unmerged line(s)",
            stub.0.len()
        );
        return MergeOutcome::Unmerged(collection);
    }

    log::info!("Merged {input_lines} line(s) into {}", merged.len());

    MergeOutcome::Merged(FeatureCollection {
        name: collection.name,
        srid: collection.srid,
        features: merged
            .into_iter()
            .map(|line| LineFeature {
                geometry: LineGeometry::LineString(line),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_map_spatial::Srid;
    use geo::{MultiLineString, line_string};

    fn collection(lines: Vec<LineString<f64>>) -> FeatureCollection {
        FeatureCollection {
            name: "test".to_string(),
            srid: Srid::WGS84,
            features: lines
                .into_iter()
                .map(|line| LineFeature {
                    geometry: LineGeometry::LineString(line),
                })
                .collect(),
        }
    }

    fn merged_lines(outcome: MergeOutcome) -> Vec<LineString<f64>> {
        assert!(outcome.is_merged(), "merge was rejected");
        outcome
            .into_collection()
            .features
            .into_iter()
            .map(|f| match f.geometry {
                LineGeometry::LineString(line) => line,
                LineGeometry::MultiLineString(_) => panic!("merged output must be LineStrings"),
            })
            .collect()
    }

    #[test]
    fn merges_touching_lines_and_keeps_isolated_ones() {
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 1.0), (x: 4.0, y: 1.0)],
            line_string![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 12.0, y: 11.0)],
        ]);

        let lines = merged_lines(merge_linestrings(input));

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            line_string![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 2.0, y: 0.0),
                (x: 3.0, y: 1.0),
                (x: 4.0, y: 1.0)
            ]
        );
        assert_eq!(
            lines[1],
            line_string![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 12.0, y: 11.0)]
        );
    }

    #[test]
    fn reverses_fragments_to_join_them() {
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 4.0, y: 0.0), (x: 3.0, y: 0.0), (x: 2.0, y: 0.0)],
        ]);

        let lines = merged_lines(merge_linestrings(input));

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0.len(), 5);
        let xs: Vec<f64> = lines[0].0.iter().map(|c| c.x).collect();
        assert!(xs == [0.0, 1.0, 2.0, 3.0, 4.0] || xs == [4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn stops_at_junctions() {
        // Three arms meeting at (0, 0).
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 1.0), (x: 0.0, y: 2.0)],
            line_string![(x: 0.0, y: 0.0), (x: -1.0, y: 0.0), (x: -2.0, y: 0.0)],
        ]);

        let lines = merged_lines(merge_linestrings(input));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn closes_rings() {
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            line_string![(x: 1.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0)],
        ]);

        let lines = merged_lines(merge_linestrings(input));

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0.len(), 5);
        assert_eq!(lines[0].0.first(), lines[0].0.last());
    }

    #[test]
    fn two_point_result_rejects_the_whole_merge() {
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 1.0), (x: 4.0, y: 1.0)],
            line_string![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0)],
        ]);
        let original = input.clone();

        let outcome = merge_linestrings(input);

        assert!(!outcome.is_merged());
        assert_eq!(outcome.into_collection(), original);
    }

    #[test]
    fn merges_parts_of_multi_line_strings() {
        let input = FeatureCollection {
            name: "multi".to_string(),
            srid: Srid::WGS84,
            features: vec![LineFeature {
                geometry: LineGeometry::MultiLineString(MultiLineString::new(vec![
                    line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
                    line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
                ])),
            }],
        };

        let lines = merged_lines(merge_linestrings(input));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0.len(), 3);
    }

    #[test]
    fn repeated_points_are_collapsed() {
        let input = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 0.0)],
        ]);

        let lines = merged_lines(merge_linestrings(input));
        assert_eq!(lines[0].0.len(), 4);
    }
}
