// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives topology sampling, structural plasticity and strategy selection,
// and must stay reproducible from a single seed.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Derive an independent stream (used to give the controller its own draws).
    pub fn fork(&mut self, salt: u64) -> Self {
        Self::new(self.next_u64() ^ salt.wrapping_mul(0xD1B54A32D192ED03))
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    pub fn next_f32_01(&mut self) -> f32 {
        // Convert to [0,1).
        let x = self.next_u32() >> 8;
        (x as f32) / ((1u32 << 24) as f32)
    }

    #[inline]
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32_01()
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64;
        low + (self.next_u64() % span) as usize
    }

    /// Bernoulli draw with probability `p` of returning true.
    #[inline]
    pub fn chance(&mut self, p: f32) -> bool {
        self.next_f32_01() < p
    }

    /// Standard normal sample (Box-Muller, one branch discarded).
    pub fn gaussian(&mut self) -> f32 {
        let u1 = self.next_f32_01().max(1e-7);
        let u2 = self.next_f32_01();
        (-2.0 * u1.ln()).sqrt() * (2.0 * core::f32::consts::PI * u2).cos()
    }

    /// Sample an index from unnormalized non-negative weights.
    ///
    /// Returns `None` when every weight is zero (or the slice is empty).
    pub fn weighted_index(&mut self, weights: &[f32]) -> Option<usize> {
        let total: f32 = weights.iter().filter(|w| w.is_finite()).map(|w| w.max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let mut r = self.next_f32_01() * total;
        let mut last = None;
        for (i, w) in weights.iter().enumerate() {
            if !w.is_finite() || *w <= 0.0 {
                continue;
            }
            last = Some(i);
            if r < *w {
                return Some(i);
            }
            r -= *w;
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn zero_seed_is_usable() {
        let mut rng = Prng::new(0);
        assert_ne!(rng.next_u32(), 0);
    }

    #[test]
    fn unit_interval_and_ranges() {
        let mut rng = Prng::new(3);
        for _ in 0..1000 {
            let x = rng.next_f32_01();
            assert!((0.0..1.0).contains(&x));
            let y = rng.gen_range_f32(-2.0, 3.0);
            assert!((-2.0..3.0).contains(&y));
            let i = rng.gen_range_usize(4, 9);
            assert!((4..9).contains(&i));
        }
        assert_eq!(rng.gen_range_usize(5, 5), 5);
    }

    #[test]
    fn weighted_index_skips_zero_mass() {
        let mut rng = Prng::new(11);
        assert_eq!(rng.weighted_index(&[0.0, 0.0]), None);
        for _ in 0..100 {
            assert_eq!(rng.weighted_index(&[0.0, 2.0, 0.0]), Some(1));
        }
    }

    #[test]
    fn gaussian_is_roughly_centered() {
        let mut rng = Prng::new(5);
        let n = 4000;
        let mean: f32 = (0..n).map(|_| rng.gaussian()).sum::<f32>() / n as f32;
        assert!(mean.abs() < 0.1, "mean {mean}");
    }
}
