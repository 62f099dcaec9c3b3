//! # Length Solver
//!
//! Given the observed angle between two landmarks, the known map distance
//! between them, and noisy visual estimates of the two observer distances,
//! search for (base, top) side pairs that close the triangle. The search is
//! a small genetic algorithm: the visual estimates seed the population, the
//! far-angle residual is the fitness, and the answer is the best handful of
//! individuals rather than a single root.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::{Duration, Instant};

use rand::Rng;

use super::trig;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative step used when nudging a gene until its triangle closes.
const MAKE_FIT_STEP: f64 = 0.005;

/// Cap on make-fit / close-out nudge iterations.
const MAX_NUDGES: usize = 500;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A noisy side-length estimate with how much it is trusted, `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct SideEstimate {
    pub length: f64,
    pub confidence: f64,
}

/// Solver tuning.
#[derive(Debug, Clone)]
pub struct SolverParams {
    pub population_size: usize,
    pub num_elites: usize,

    /// Relative far-angle error below which an individual counts as a
    /// solution.
    pub target_accuracy: f64,

    /// Stop once this many individuals are within target accuracy.
    pub max_num_solutions: usize,

    pub allowed_time: Duration,
    pub generation_cap: usize,

    /// Generations without improvement before the mutation rate doubles.
    pub stagnation_threshold: usize,

    /// Crossover takes every `stride`-th gene from the second parent.
    pub stride: usize,
}

/// One solved (base, top) pair with its far-angle residual.
#[derive(Debug, Clone, Copy)]
pub struct Solution {
    pub base: f64,
    pub top: f64,

    /// `|observed - reconstructed|` far angle, degrees.
    pub residual_deg: f64,
}

#[derive(Debug, Clone, Copy)]
struct Chromosome {
    base: f64,
    top: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            population_size: 60,
            num_elites: 4,
            target_accuracy: 0.04,
            max_num_solutions: 5,
            allowed_time: Duration::from_millis(200),
            generation_cap: 200,
            stagnation_threshold: 8,
            stride: 2,
        }
    }
}

impl SolverParams {
    /// Tighter accuracy and longer budget for the precise estimator modes.
    pub fn with_accuracy(target_accuracy: f64, allowed_time: Duration) -> Self {
        Self {
            target_accuracy,
            allowed_time,
            ..Default::default()
        }
    }
}

impl Chromosome {
    fn gene(&self, idx: usize) -> f64 {
        if idx == 0 {
            self.base
        } else {
            self.top
        }
    }

    fn set_gene(&mut self, idx: usize, value: f64) {
        if idx == 0 {
            self.base = value;
        } else {
            self.top = value;
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run the search. `far_angle_deg` is the observed angular separation,
/// `far_side` the known map distance between the two landmarks. Returns the
/// best individuals sorted by fitness, closed out so every returned triangle
/// is valid; empty when the inputs admit no triangle at all.
pub fn solve<R: Rng>(
    far_angle_deg: f64,
    far_side: f64,
    est_base: SideEstimate,
    est_top: SideEstimate,
    params: &SolverParams,
    rng: &mut R,
) -> Vec<Solution> {
    if far_angle_deg <= 0.0 || far_side <= 0.0 {
        return Vec::new();
    }

    let deadline = Instant::now() + params.allowed_time;

    let mut population = init_population(far_side, est_base, est_top, params, rng);
    if population.is_empty() {
        return Vec::new();
    }

    let mut mutation_rate: f64 = 1.0 / 3.0;
    let mut best_fitness = 0.0;
    let mut stagnant = 0;

    for _ in 0..params.generation_cap {
        population.sort_by(|a, b| {
            fitness(far_angle_deg, far_side, b)
                .partial_cmp(&fitness(far_angle_deg, far_side, a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let solved = population
            .iter()
            .filter(|c| relative_error(far_angle_deg, far_side, c) <= params.target_accuracy)
            .count();
        if solved >= params.max_num_solutions || Instant::now() >= deadline {
            break;
        }

        let top_fitness = fitness(far_angle_deg, far_side, &population[0]);
        if top_fitness > best_fitness {
            best_fitness = top_fitness;
            stagnant = 0;
            mutation_rate = 1.0 / 3.0;
        } else {
            stagnant += 1;
            if stagnant >= params.stagnation_threshold {
                mutation_rate = (mutation_rate * 2.0).min(1.0);
                stagnant = 0;
            }
        }

        population = next_generation(far_angle_deg, &population, params, mutation_rate, rng);
    }

    population.sort_by(|a, b| {
        fitness(far_angle_deg, far_side, b)
            .partial_cmp(&fitness(far_angle_deg, far_side, a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    population
        .iter()
        .take(params.max_num_solutions)
        .filter_map(|c| close_out(far_angle_deg, far_side, *c))
        .collect()
}

/// Estimate confidences for the two sides: a lidar-substituted side is
/// trusted highly, a visual side moderately, and the visually shorter side
/// takes a small extra penalty (apparent size error grows as objects
/// shrink).
pub fn side_confidences(
    base_len: f64,
    base_is_lidar: bool,
    top_len: f64,
    top_is_lidar: bool,
) -> (f64, f64) {
    let mut base = if base_is_lidar { 0.9 } else { 0.65 };
    let mut top = if top_is_lidar { 0.9 } else { 0.65 };

    if !base_is_lidar && !top_is_lidar {
        if base_len <= top_len {
            base -= 0.05;
        } else {
            top -= 0.05;
        }
    }

    (base, top)
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// `1 / |far-angle residual|`; invalid triangles score zero.
fn fitness(far_angle_deg: f64, far_side: f64, c: &Chromosome) -> f64 {
    match trig::far_angle(far_side, c.base, c.top) {
        Ok(angle) => {
            let residual = (far_angle_deg - angle).abs();
            if residual == 0.0 {
                f64::MAX
            } else {
                1.0 / residual
            }
        }
        Err(_) => 0.0,
    }
}

fn relative_error(far_angle_deg: f64, far_side: f64, c: &Chromosome) -> f64 {
    match trig::far_angle(far_side, c.base, c.top) {
        Ok(angle) => (far_angle_deg - angle).abs() / far_angle_deg,
        Err(_) => f64::MAX,
    }
}

/// Seed the population uniformly within each estimate's trust window, then
/// nudge invalid individuals until their triangles close.
fn init_population<R: Rng>(
    far_side: f64,
    est_base: SideEstimate,
    est_top: SideEstimate,
    params: &SolverParams,
    rng: &mut R,
) -> Vec<Chromosome> {
    let mut population = Vec::with_capacity(params.population_size);

    for _ in 0..params.population_size {
        let mut c = Chromosome {
            base: sample_estimate(est_base, rng),
            top: sample_estimate(est_top, rng),
        };
        make_fit(far_side, &mut c, rng);
        population.push(c);
    }

    population
}

fn sample_estimate<R: Rng>(est: SideEstimate, rng: &mut R) -> f64 {
    let max_adjustment = (1.0 - est.confidence) * 2.0;
    let spread = max_adjustment * est.length;
    let lo = (est.length - spread).max(f64::MIN_POSITIVE);
    let hi = est.length + spread;
    rng.gen_range(lo..=hi)
}

/// Grow one randomly chosen gene in small steps until the triangle closes.
fn make_fit<R: Rng>(far_side: f64, c: &mut Chromosome, rng: &mut R) {
    let gene = rng.gen_range(0..2usize);

    for _ in 0..MAX_NUDGES {
        if trig::far_angle(far_side, c.base, c.top).is_ok() {
            return;
        }
        c.set_gene(gene, c.gene(gene) * (1.0 + MAKE_FIT_STEP));
    }
}

/// Breed the next generation: elites survive, the rest come from
/// rank-weighted parents via stride crossover plus mutation.
fn next_generation<R: Rng>(
    far_angle_deg: f64,
    ranked: &[Chromosome],
    params: &SolverParams,
    mutation_rate: f64,
    rng: &mut R,
) -> Vec<Chromosome> {
    let mut next: Vec<Chromosome> =
        ranked.iter().take(params.num_elites).copied().collect();

    let weights = rank_weights(ranked.len());

    while next.len() < params.population_size {
        let p1 = weighted_pick(&weights, rng);
        let mut p2 = weighted_pick(&weights, rng);
        if ranked.len() > 1 {
            while p2 == p1 {
                p2 = weighted_pick(&weights, rng);
            }
        }

        let mut child = crossover(&ranked[p1], &ranked[p2], params.stride, rng);

        if rng.gen::<f64>() < mutation_rate {
            mutate(far_angle_deg, &mut child, rng);
        }

        next.push(child);
    }

    next
}

/// Linear rank weights from 0.9 down to 0.05, renormalized to sum to 1.
fn rank_weights(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }

    let raw: Vec<f64> = (0..n)
        .map(|i| 0.9 - (0.9 - 0.05) * i as f64 / (n - 1) as f64)
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

fn weighted_pick<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let mut roll = rng.gen::<f64>();
    for (i, w) in weights.iter().enumerate() {
        roll -= w;
        if roll <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

/// Child starts as parent 1 and takes every `stride`-th gene from parent 2,
/// beginning at a random offset.
fn crossover<R: Rng>(p1: &Chromosome, p2: &Chromosome, stride: usize, rng: &mut R) -> Chromosome {
    let stride = stride.max(1);
    let offset = rng.gen_range(0..stride);

    let mut child = *p1;
    let mut idx = offset;
    while idx < 2 {
        child.set_gene(idx, p2.gene(idx));
        idx += stride;
    }
    child
}

/// Perturb one gene by up to +/- 10%.
fn mutate<R: Rng>(_far_angle_deg: f64, c: &mut Chromosome, rng: &mut R) {
    let gene = rng.gen_range(0..2usize);
    let factor = 1.0 + rng.gen_range(-0.1..0.1);
    c.set_gene(gene, (c.gene(gene) * factor).max(f64::MIN_POSITIVE));
}

/// Ensure a returned individual's triangle is valid, bumping both sides by
/// 1% increments when the solver stopped early on an open triangle.
fn close_out(far_angle_deg: f64, far_side: f64, mut c: Chromosome) -> Option<Solution> {
    for _ in 0..MAX_NUDGES {
        if let Ok(angle) = trig::far_angle(far_side, c.base, c.top) {
            return Some(Solution {
                base: c.base,
                top: c.top,
                residual_deg: (far_angle_deg - angle).abs(),
            });
        }
        c.base *= 1.01;
        c.top *= 1.01;
    }
    None
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    #[test]
    fn test_solves_known_triangle() {
        // Ground truth: base 100, top 120, far angle 40 degrees
        let far_side = super::super::trig::far_side(40.0, 100.0, 120.0);

        let solutions = solve(
            40.0,
            far_side,
            SideEstimate {
                length: 90.0,
                confidence: 0.65,
            },
            SideEstimate {
                length: 130.0,
                confidence: 0.65,
            },
            &SolverParams::default(),
            &mut rng(),
        );

        assert!(!solutions.is_empty());

        // Best solution reconstructs the observed angle closely
        let best = solutions[0];
        assert!(
            best.residual_deg < 40.0 * 0.04,
            "residual {} too large",
            best.residual_deg
        );

        // Returned triangles are all valid
        for s in &solutions {
            assert!(super::super::trig::far_angle(far_side, s.base, s.top).is_ok());
        }
    }

    #[test]
    fn test_sorted_by_residual() {
        let far_side = super::super::trig::far_side(30.0, 200.0, 180.0);
        let solutions = solve(
            30.0,
            far_side,
            SideEstimate {
                length: 210.0,
                confidence: 0.9,
            },
            SideEstimate {
                length: 170.0,
                confidence: 0.65,
            },
            &SolverParams::default(),
            &mut rng(),
        );

        for pair in solutions.windows(2) {
            assert!(pair[0].residual_deg <= pair[1].residual_deg + 1e-9);
        }
    }

    #[test]
    fn test_rejects_degenerate_inputs() {
        let est = SideEstimate {
            length: 100.0,
            confidence: 0.65,
        };
        assert!(solve(0.0, 50.0, est, est, &SolverParams::default(), &mut rng()).is_empty());
        assert!(solve(40.0, 0.0, est, est, &SolverParams::default(), &mut rng()).is_empty());
    }

    #[test]
    fn test_rank_weights_normalized_and_decreasing() {
        let w = rank_weights(10);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for pair in w.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_side_confidences() {
        // Lidar trusted more than visual
        let (b, t) = side_confidences(100.0, true, 120.0, false);
        assert!(b > t);

        // Purely visual: shorter side penalized
        let (b, t) = side_confidences(80.0, false, 120.0, false);
        assert!(b < t);
        assert!((t - 0.65).abs() < 1e-9);

        let (b, t) = side_confidences(150.0, false, 120.0, false);
        assert!(t < b);
    }

    #[test]
    fn test_close_out_bumps_open_triangle() {
        // 10 + 12 < 100: no triangle until both sides grow
        let solution = close_out(
            20.0,
            100.0,
            Chromosome {
                base: 10.0,
                top: 12.0,
            },
        )
        .unwrap();

        assert!(solution.base + solution.top >= 100.0);
    }
}
