use anyhow::{anyhow, Result};

/// Validate that a latitude/longitude pair is within WGS84 bounds.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(anyhow!(
            "Latitude must be between -90 and 90, got: {}",
            latitude
        ));
    }

    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(anyhow!(
            "Longitude must be between -180 and 180, got: {}",
            longitude
        ));
    }

    Ok(())
}

/// Validate a map viewport bounding box (min corner south-west of max corner).
pub fn validate_bbox(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Result<()> {
    validate_coordinates(min_lat, min_lng)?;
    validate_coordinates(max_lat, max_lng)?;

    if min_lat >= max_lat {
        return Err(anyhow!("min_lat must be less than max_lat"));
    }

    // Viewports crossing the antimeridian are not supported; clients split them.
    if min_lng >= max_lng {
        return Err(anyhow!("min_lng must be less than max_lng"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(37.7749, -122.4194).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.5, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_validate_bbox() {
        assert!(validate_bbox(-123.0, 37.0, -122.0, 38.0).is_ok());
        // inverted bounds
        assert!(validate_bbox(-122.0, 38.0, -123.0, 37.0).is_err());
        // degenerate box
        assert!(validate_bbox(-122.0, 37.0, -122.0, 38.0).is_err());
        // out of range
        assert!(validate_bbox(-200.0, 37.0, -122.0, 38.0).is_err());
    }
}
