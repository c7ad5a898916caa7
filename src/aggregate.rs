/// A coordinate with its contribution to the center of gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub weight: f64,
}

impl GeoPoint {
    /// Point with the default weight of 1.0.
    pub fn new(lat: Option<f64>, lon: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            weight: 1.0,
        }
    }

    #[cfg(test)]
    pub fn weighted(lat: f64, lon: f64, weight: f64) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            weight,
        }
    }

    /// Finite coordinates and a finite, positive weight.
    fn usable(&self) -> Option<(f64, f64, f64)> {
        let (lat, lon) = (self.lat?, self.lon?);
        (lat.is_finite() && lon.is_finite() && self.weight.is_finite() && self.weight > 0.0)
            .then_some((lat, lon, self.weight))
    }
}

/// Weighted mean latitude/longitude; `(0.0, 0.0)` when nothing is usable.
pub fn center_of_gravity<'a, I>(points: I) -> (f64, f64)
where
    I: IntoIterator<Item = &'a GeoPoint>,
{
    let (lat_sum, lon_sum, total) = points
        .into_iter()
        .filter_map(GeoPoint::usable)
        .fold((0.0, 0.0, 0.0), |(la, lo, w), (lat, lon, weight)| {
            (la + lat * weight, lo + lon * weight, w + weight)
        });

    if total > 0.0 {
        (lat_sum / total, lon_sum / total)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn test_weighted_mean() {
        let points = [
            GeoPoint::weighted(10.0, 20.0, 2.0),
            GeoPoint::weighted(40.0, 50.0, 1.0),
        ];
        assert!(close(center_of_gravity(&points), (20.0, 30.0)));
    }

    #[test]
    fn test_empty_is_origin() {
        let none: [GeoPoint; 0] = [];
        assert_eq!(center_of_gravity(&none), (0.0, 0.0));
    }

    #[test]
    fn test_ignores_nan_and_missing_coordinates() {
        let points = [
            GeoPoint::new(Some(f64::NAN), Some(20.0)),
            GeoPoint::new(Some(30.0), Some(f64::INFINITY)),
            GeoPoint::new(None, Some(5.0)),
            GeoPoint::new(Some(45.0), Some(10.0)),
        ];
        assert_eq!(center_of_gravity(&points), (45.0, 10.0));
    }

    #[test]
    fn test_invariant_under_weight_scaling() {
        let points = [
            GeoPoint::weighted(45.4384, 10.9916, 3.0),
            GeoPoint::weighted(45.1564, 10.7914, 1.0),
            GeoPoint::weighted(41.8933, 12.4829, 0.5),
        ];
        let scaled: Vec<GeoPoint> = points
            .iter()
            .map(|p| GeoPoint {
                weight: p.weight * 7.25,
                ..*p
            })
            .collect();
        assert!(close(center_of_gravity(&points), center_of_gravity(&scaled)));
    }

    #[test]
    fn test_zero_negative_and_nonfinite_weights_are_excluded() {
        let base = [
            GeoPoint::weighted(10.0, 20.0, 1.0),
            GeoPoint::weighted(30.0, 40.0, 1.0),
        ];
        let mut noisy = base.to_vec();
        noisy.push(GeoPoint::weighted(80.0, 80.0, 0.0));
        noisy.push(GeoPoint::weighted(-80.0, -80.0, -2.0));
        noisy.push(GeoPoint::weighted(60.0, 60.0, f64::NAN));
        noisy.push(GeoPoint::weighted(60.0, 60.0, f64::INFINITY));

        assert_eq!(center_of_gravity(&base), center_of_gravity(&noisy));
        assert_eq!(
            center_of_gravity(&[GeoPoint::weighted(1.0, 1.0, 0.0)]),
            (0.0, 0.0)
        );
    }
}
