use h3o::{CellIndex, LatLng, Resolution};
use thiserror::Error;

/// Coarse aggregation resolution (~3.2 km hexagons).
pub const RES_COARSE: Resolution = Resolution::Six;
/// Fine ingestion resolution (~460 m hexagons).
pub const RES_FINE: Resolution = Resolution::Eight;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("Invalid H3 index '{0}'")]
    InvalidIndex(String),
    #[error("H3 index must be resolution {expected}, got resolution {received}")]
    WrongResolution { expected: u8, received: u8 },
    #[error("H3 index {received} does not match coordinates (expected {expected})")]
    Mismatch {
        expected: CellIndex,
        received: CellIndex,
    },
}

/// Map a coordinate to the H3 cell containing it at the given resolution.
pub fn cell_for(latitude: f64, longitude: f64, res: Resolution) -> Result<CellIndex, GridError> {
    crate::utils::validators::validate_coordinates(latitude, longitude)
        .map_err(|e| GridError::InvalidCoordinates(e.to_string()))?;

    let coord = LatLng::new(latitude, longitude)
        .map_err(|e| GridError::InvalidCoordinates(e.to_string()))?;

    Ok(coord.to_cell(res))
}

/// The unique coarse-resolution ancestor of a fine-resolution cell.
pub fn ancestor(cell: CellIndex) -> Result<CellIndex, GridError> {
    cell.parent(RES_COARSE).ok_or(GridError::WrongResolution {
        expected: RES_FINE.into(),
        received: cell.resolution().into(),
    })
}

/// Cells at exactly `k` grid steps from `cell`.
///
/// `grid_ring_fast` bails out near pentagon distortion; fall back to the
/// full distance scan in that case.
pub fn ring(cell: CellIndex, k: u32) -> Vec<CellIndex> {
    let fast: Option<Vec<CellIndex>> = cell.grid_ring_fast(k).collect();
    match fast {
        Some(cells) => cells,
        None => cell
            .grid_disk_distances::<Vec<_>>(k)
            .into_iter()
            .filter(|(_, distance)| *distance == k)
            .map(|(c, _)| c)
            .collect(),
    }
}

/// Validate a client-submitted res-8 index against the server-recomputed
/// cell for the raw coordinates.
///
/// GPS noise near a cell edge can put the client's fix one cell over, so an
/// immediate (1-ring) neighbor of the expected cell is accepted. Anything
/// farther is a hard mismatch.
pub fn validate_submitted(
    latitude: f64,
    longitude: f64,
    submitted: &str,
) -> Result<CellIndex, GridError> {
    let received: CellIndex = submitted
        .parse()
        .map_err(|_| GridError::InvalidIndex(submitted.to_string()))?;

    if received.resolution() != RES_FINE {
        return Err(GridError::WrongResolution {
            expected: RES_FINE.into(),
            received: received.resolution().into(),
        });
    }

    let expected = cell_for(latitude, longitude, RES_FINE)?;
    if received == expected || ring(expected, 1).contains(&received) {
        return Ok(received);
    }

    Err(GridError::Mismatch { expected, received })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SF_LAT: f64 = 37.7749;
    const SF_LNG: f64 = -122.4194;

    #[test]
    fn test_cell_for_is_deterministic() {
        let a = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let b = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.resolution(), RES_FINE);
    }

    #[test]
    fn test_cell_for_rejects_out_of_range() {
        assert!(cell_for(91.0, 0.0, RES_FINE).is_err());
        assert!(cell_for(0.0, 181.0, RES_FINE).is_err());
    }

    #[test]
    fn test_ancestor_is_coarse_parent() {
        let fine = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let coarse = ancestor(fine).unwrap();
        assert_eq!(coarse.resolution(), RES_COARSE);
        // the coarse cell derived directly from the same point must agree
        assert_eq!(coarse, cell_for(SF_LAT, SF_LNG, RES_COARSE).unwrap());
    }

    #[test]
    fn test_ancestor_rejects_already_coarse_cell() {
        let coarse = cell_for(SF_LAT, SF_LNG, Resolution::Four).unwrap();
        assert!(ancestor(coarse).is_err());
    }

    #[test]
    fn test_ring_of_hexagon_has_six_neighbors() {
        let cell = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let neighbors = ring(cell, 1);
        assert_eq!(neighbors.len(), 6);
        assert!(!neighbors.contains(&cell));
    }

    #[test]
    fn test_validate_accepts_exact_match() {
        let expected = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let validated = validate_submitted(SF_LAT, SF_LNG, &expected.to_string()).unwrap();
        assert_eq!(validated, expected);
    }

    #[test]
    fn test_validate_accepts_immediate_neighbor() {
        let expected = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let neighbor = ring(expected, 1)[0];
        let validated = validate_submitted(SF_LAT, SF_LNG, &neighbor.to_string()).unwrap();
        assert_eq!(validated, neighbor);
    }

    #[test]
    fn test_validate_rejects_two_ring_neighbor() {
        let expected = cell_for(SF_LAT, SF_LNG, RES_FINE).unwrap();
        let far = ring(expected, 2)[0];
        let err = validate_submitted(SF_LAT, SF_LNG, &far.to_string()).unwrap_err();
        assert!(matches!(err, GridError::Mismatch { .. }));
    }

    #[test]
    fn test_validate_rejects_wrong_resolution() {
        let coarse = cell_for(SF_LAT, SF_LNG, RES_COARSE).unwrap();
        let err = validate_submitted(SF_LAT, SF_LNG, &coarse.to_string()).unwrap_err();
        assert!(matches!(err, GridError::WrongResolution { .. }));
    }

    #[test]
    fn test_validate_rejects_garbage_index() {
        let err = validate_submitted(SF_LAT, SF_LNG, "not-an-index").unwrap_err();
        assert!(matches!(err, GridError::InvalidIndex(_)));
    }
}
