use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current wall clock in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Uniform random integer in `[min, max]`, both endpoints included.
/// Returns `min` when the range is inverted.
pub fn get_random_int<R: Rng>(rng: &mut R, min: i64, max: i64) -> i64 {
    if max < min {
        return min;
    }

    rng.gen_range(min..=max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_random_int_bounds() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1000 {
            let v = get_random_int(&mut rng, -5, 5);
            assert!((-5..=5).contains(&v));
        }
    }

    #[test]
    fn test_random_int_both_endpoints_reachable() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..1000 {
            seen.insert(get_random_int(&mut rng, 539, 540));
        }

        assert!(seen.contains(&539));
        assert!(seen.contains(&540));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_random_int_degenerate_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(get_random_int(&mut rng, 3, 3), 3);
        assert_eq!(get_random_int(&mut rng, 4, 2), 4);
    }
}
