use super::types::Location;

pub fn euclidean(a: Location, b: Location) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Point `index` of `n` evenly spaced on a circle around the origin
pub fn ring_point(index: usize, n: usize, radius: f64) -> Location {
    let angle = 2.0 * std::f64::consts::PI * index as f64 / n.max(1) as f64;
    Location::new(radius * angle.cos(), radius * angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean() {
        assert_eq!(euclidean(Location::new(0.0, 0.0), Location::new(3.0, 4.0)), 5.0);
    }

    #[test]
    fn test_ring_point_radius() {
        for i in 0..5 {
            let p = ring_point(i, 5, 10.0);
            assert!((euclidean(Location::default(), p) - 10.0).abs() < 1e-9);
        }
    }
}
