//! Synthetic datasets shared by the integration tests.
//!
//! All generators are seeded, so every test sees the same rows on every run.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustymargins_core::Dataset;

/// y = 1 + 2x + N(0, 1) with x uniform on [0, 10).
pub fn straight_line(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let y: Vec<f64> = x.iter().map(|xi| 1.0 + 2.0 * xi + noise.sample(&mut rng)).collect();
    Dataset::new()
        .with_numeric("y", y)
        .unwrap()
        .with_numeric("x", x)
        .unwrap()
}

/// Three groups with their own intercepts and (optionally) their own slopes.
pub fn grouped_lines(n: usize, seed: u64, slopes: [f64; 3]) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let intercepts = [0.0, 1.5, -1.0];
    let labels = ["a", "b", "c"];
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut g = Vec::with_capacity(n);
    for i in 0..n {
        let k = i % 3;
        let xi: f64 = rng.gen_range(-2.0..2.0);
        x.push(xi);
        y.push(intercepts[k] + slopes[k] * xi + noise.sample(&mut rng));
        g.push(labels[k]);
    }
    Dataset::new()
        .with_numeric("y", y)
        .unwrap()
        .with_numeric("x", x)
        .unwrap()
        .with_factor("g", &g)
        .unwrap()
}

/// Palmer-penguins-like measurements.
///
/// Body mass rises with flipper length at a species-specific rate
/// (Adelie 30, Chinstrap 35, Gentoo 55 g/mm), males are 400 g heavier and
/// islands shift the mean a little. Two rows carry missing values.
pub fn penguins(per_species: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 250.0).unwrap();

    struct Species {
        name: &'static str,
        flipper: (f64, f64),
        bill: (f64, f64),
        base: f64,
        slope: f64,
        islands: &'static [&'static str],
    }
    let all = [
        Species {
            name: "Adelie",
            flipper: (190.0, 6.5),
            bill: (38.8, 2.7),
            base: 3700.0,
            slope: 30.0,
            islands: &["Biscoe", "Dream", "Torgersen"],
        },
        Species {
            name: "Chinstrap",
            flipper: (196.0, 7.0),
            bill: (48.8, 3.3),
            base: 3730.0,
            slope: 35.0,
            islands: &["Dream"],
        },
        Species {
            name: "Gentoo",
            flipper: (217.0, 6.5),
            bill: (47.5, 3.0),
            base: 5000.0,
            slope: 55.0,
            islands: &["Biscoe"],
        },
    ];

    let mut species = Vec::new();
    let mut island = Vec::new();
    let mut sex = Vec::new();
    let mut year = Vec::new();
    let mut flipper_len = Vec::new();
    let mut bill_len = Vec::new();
    let mut body_mass = Vec::new();

    for s in &all {
        let flipper = Normal::new(s.flipper.0, s.flipper.1).unwrap();
        let bill = Normal::new(s.bill.0, s.bill.1).unwrap();
        for i in 0..per_species {
            let isl = s.islands[i % s.islands.len()];
            let male = i % 2 == 1;
            let f = flipper.sample(&mut rng);
            let shift = match isl {
                "Biscoe" => 60.0,
                "Dream" => -40.0,
                _ => 0.0,
            };
            let mass = s.base + s.slope * (f - 200.0) + if male { 400.0 } else { 0.0 } + shift + noise.sample(&mut rng);

            species.push(s.name);
            island.push(isl);
            sex.push(if male { "male" } else { "female" });
            year.push(2007.0 + (i % 3) as f64);
            flipper_len.push(f);
            bill_len.push(bill.sample(&mut rng));
            body_mass.push(mass);
        }
    }
    flipper_len[3] = f64::NAN;
    sex[10] = "";

    Dataset::new()
        .with_factor("species", &species)
        .unwrap()
        .with_factor("island", &island)
        .unwrap()
        .with_factor("sex", &sex)
        .unwrap()
        .with_numeric("year", year)
        .unwrap()
        .with_numeric("flipper_len", flipper_len)
        .unwrap()
        .with_numeric("bill_len", bill_len)
        .unwrap()
        .with_numeric("body_mass", body_mass)
        .unwrap()
}
