use std::fmt::Display;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Upper bound (inclusive) of randomly generated input values.
pub const RANDOM_VALUE_MAX: u32 = 1000;

/// `[start, start + 1, ..., start + len - 1]`
pub fn progression(start: f32, len: usize) -> Vec<f32> {
    (0..len).map(|i| start + i as f32).collect()
}

/// Whole numbers in `0..=RANDOM_VALUE_MAX`, reproducible for a given seed.
pub fn random(seed: u64, len: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..=RANDOM_VALUE_MAX) as f32).collect()
}

/// Prints a sequence as space-separated values.
pub struct Listing<'a>(pub &'a [f32]);

impl Display for Listing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, val) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }

            write!(f, "{val}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progression_values() {
        assert_eq!(progression(10.0, 4), [10.0, 11.0, 12.0, 13.0]);
        assert_eq!(progression(0.0, 1), [0.0]);
        assert!(progression(5.0, 0).is_empty());
    }

    #[test]
    fn random_is_seeded() {
        let a = random(42, 64);
        assert_eq!(a, random(42, 64));
        assert_ne!(a, random(43, 64));
        assert!(a.iter().all(|&x| (0.0..=RANDOM_VALUE_MAX as f32).contains(&x) && x.fract() == 0.0));
    }

    #[test]
    fn listing_format() {
        assert_eq!(Listing(&[10.0, 12.0, 14.0, 16.0]).to_string(), "10 12 14 16");
        assert_eq!(Listing(&[1.5]).to_string(), "1.5");
        assert_eq!(Listing(&[]).to_string(), "");
    }
}
