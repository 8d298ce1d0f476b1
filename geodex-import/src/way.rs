//! Import-side way representation and endpoint merging.

use std::collections::BTreeMap;

use geodex::{GeoBox, GeoCoord, GeodexResult, StoreReader, StoreWriter, TypeId};

/// A typed polyline feature as delivered by the (external) raw-data
/// parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: u64,
    pub type_id: TypeId,
    pub nodes: Vec<GeoCoord>,
}

impl Way {
    pub fn new(id: u64, type_id: TypeId, nodes: Vec<GeoCoord>) -> Way {
        Way { id, type_id, nodes }
    }

    pub fn bounding_box(&self) -> Option<GeoBox> {
        GeoBox::from_coords(&self.nodes)
    }

    /// Minimal geometric sanity: at least one segment, finite in-range
    /// coordinates.
    pub fn is_valid(&self) -> bool {
        self.nodes.len() >= 2 && self.nodes.iter().all(|node| node.is_valid())
    }

    /// Serialize as a data block at the writer's current position.
    pub fn write(&self, writer: &mut StoreWriter) -> GeodexResult<()> {
        writer.write_vu64(self.id)?;
        writer.write_vu32(self.type_id as u32)?;
        writer.write_vu32(self.nodes.len() as u32)?;
        for node in &self.nodes {
            writer.write_coord(node)?;
        }
        Ok(())
    }

    /// Deserialize a data block at the reader's current position.
    pub fn read(reader: &mut StoreReader) -> GeodexResult<Way> {
        let id = reader.read_vu64()?;
        let type_id = reader.read_vu32()? as TypeId;
        let node_count = reader.read_vu32()?;
        let mut nodes = Vec::with_capacity(node_count as usize);
        for _ in 0..node_count {
            nodes.push(reader.read_coord()?);
        }
        Ok(Way { id, type_id, nodes })
    }

    fn front_key(&self) -> u64 {
        coord_key(&self.nodes[0])
    }

    fn back_key(&self) -> u64 {
        coord_key(&self.nodes[self.nodes.len() - 1])
    }
}

/// Quantized join key of a coordinate, at the same resolution the store
/// codec uses, so endpoints that serialize identically merge.
fn coord_key(coord: &GeoCoord) -> u64 {
    let lat = ((coord.lat + 90.0) * 10_000_000.0).round() as u64;
    let lon = ((coord.lon + 180.0) * 10_000_000.0).round() as u64;
    (lat << 32) | lon
}

/// Merge chains of same-type ways sharing endpoints into single
/// polylines, reducing index entries at low zoom.
///
/// Junctions where three or more ways meet are never merged through;
/// the id of the chain's first way survives. Input order drives output
/// order, keeping the result deterministic.
pub fn merge_ways(ways: Vec<Way>) -> Vec<Way> {
    let mut by_endpoint: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (index, way) in ways.iter().enumerate() {
        by_endpoint.entry(way.front_key()).or_default().push(index);
        by_endpoint.entry(way.back_key()).or_default().push(index);
    }

    let mut used = vec![false; ways.len()];
    let mut merged = Vec::with_capacity(ways.len());

    for start in 0..ways.len() {
        if used[start] {
            continue;
        }
        used[start] = true;

        let mut nodes = ways[start].nodes.clone();

        // Extend at the back, then flip and extend the other end; the
        // second flip restores the original orientation.
        for _ in 0..2 {
            loop {
                let key = coord_key(nodes.last().expect("ways have nodes"));
                let partner = match sole_unused_partner(&by_endpoint, &used, key) {
                    Some(partner) => partner,
                    None => break,
                };

                used[partner] = true;
                let other = &ways[partner];
                if other.front_key() == key {
                    nodes.extend(other.nodes.iter().skip(1).copied());
                } else {
                    nodes.extend(other.nodes.iter().rev().skip(1).copied());
                }
            }
            nodes.reverse();
        }

        merged.push(Way {
            id: ways[start].id,
            type_id: ways[start].type_id,
            nodes,
        });
    }

    merged
}

/// The single unused way joining at `key`, or `None` when there is no
/// continuation or the joint is a multi-way junction.
fn sole_unused_partner(
    by_endpoint: &BTreeMap<u64, Vec<usize>>,
    used: &[bool],
    key: u64,
) -> Option<usize> {
    let candidates = by_endpoint.get(&key)?;
    let mut found = None;

    for &index in candidates {
        if used[index] {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(index);
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn way(id: u64, nodes: &[(f64, f64)]) -> Way {
        Way::new(
            id,
            0,
            nodes.iter().map(|(lat, lon)| GeoCoord::new(*lat, *lon)).collect(),
        )
    }

    #[test]
    fn test_way_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("way.dat");
        let original = way(77, &[(0.0, 0.0), (0.5, 1.0), (1.0, 1.0)]);

        let mut writer = geodex::StoreWriter::create(&path).unwrap();
        original.write(&mut writer).unwrap();
        writer.finish().unwrap();

        let mut reader = geodex::StoreReader::open(&path).unwrap();
        let read = Way::read(&mut reader).unwrap();
        assert_eq!(read.id, 77);
        assert_eq!(read.nodes.len(), 3);
        assert!((read.nodes[1].lat - 0.5).abs() < 1e-6);
        assert!((read.nodes[1].lon - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_valid() {
        assert!(way(1, &[(0.0, 0.0), (1.0, 1.0)]).is_valid());
        assert!(!way(2, &[(0.0, 0.0)]).is_valid());
        assert!(!way(3, &[(0.0, 0.0), (f64::NAN, 1.0)]).is_valid());
    }

    #[test]
    fn test_merge_chain_of_three() {
        let ways = vec![
            way(1, &[(0.0, 0.0), (0.0, 1.0)]),
            way(2, &[(0.0, 1.0), (0.0, 2.0)]),
            way(3, &[(0.0, 2.0), (0.0, 3.0)]),
        ];

        let merged = merge_ways(ways);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, 1);
        assert_eq!(merged[0].nodes.len(), 4);
        assert_eq!(merged[0].nodes[0].lon, 0.0);
        assert_eq!(merged[0].nodes[3].lon, 3.0);
    }

    #[test]
    fn test_merge_reversed_partner() {
        let ways = vec![
            way(1, &[(0.0, 0.0), (0.0, 1.0)]),
            // Shares the endpoint but runs towards it.
            way(2, &[(0.0, 2.0), (0.0, 1.0)]),
        ];

        let merged = merge_ways(ways);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].nodes.len(), 3);
        assert_eq!(merged[0].nodes[2].lon, 2.0);
    }

    #[test]
    fn test_merge_stops_at_junction() {
        // Three ways share the node at lon 1.0; merging through would
        // pick an arbitrary branch.
        let ways = vec![
            way(1, &[(0.0, 0.0), (0.0, 1.0)]),
            way(2, &[(0.0, 1.0), (0.0, 2.0)]),
            way(3, &[(0.0, 1.0), (1.0, 1.0)]),
        ];

        let merged = merge_ways(ways);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_disjoint_ways_unchanged() {
        let ways = vec![
            way(1, &[(0.0, 0.0), (0.0, 1.0)]),
            way(2, &[(5.0, 5.0), (5.0, 6.0)]),
        ];

        let merged = merge_ways(ways);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let ways = || {
            vec![
                way(4, &[(0.0, 3.0), (0.0, 4.0)]),
                way(1, &[(0.0, 0.0), (0.0, 1.0)]),
                way(2, &[(0.0, 1.0), (0.0, 2.0)]),
            ]
        };

        let a = merge_ways(ways());
        let b = merge_ways(ways());
        assert_eq!(a, b);
    }
}
