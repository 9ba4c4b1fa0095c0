//! Text transformations keyed by request opcode.
//!
//! All transformations are pure functions over the payload text; the
//! randomized ones (shuffle, random-mutate) draw from the thread-local RNG
//! with no fixed seed.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::frame::Opcode;

/// Apply the transformation selected by `opcode`.
pub fn apply(opcode: Opcode, text: &str) -> String {
    match opcode {
        Opcode::Uppercase => uppercase(text),
        Opcode::Lowercase => lowercase(text),
        Opcode::Reverse => reverse(text),
        Opcode::Shuffle => shuffle(text),
        Opcode::RandomMutate => random_mutate(text),
    }
}

fn uppercase(text: &str) -> String {
    text.to_uppercase()
}

fn lowercase(text: &str) -> String {
    text.to_lowercase()
}

fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

/// Uniformly random permutation of the characters.
fn shuffle(text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    chars.shuffle(&mut rand::thread_rng());
    chars.into_iter().collect()
}

/// Drop each character with probability 1/6; otherwise keep it, and with
/// probability 1/6 expand it into a run whose length is a truncated
/// Pareto(1) draw. When every character was dropped, the result falls back
/// to the first character of the original text so that a non-empty request
/// never gets an empty reply.
fn random_mutate(text: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::new();

    for c in text.chars() {
        if rng.gen_range(0..6) == 0 {
            continue;
        }
        if rng.gen_range(0..6) == 0 {
            for _ in 0..pareto_repeat(&mut rng) {
                out.push(c);
            }
        } else {
            out.push(c);
        }
    }

    if out.is_empty() {
        if let Some(first) = text.chars().next() {
            out.push(first);
        }
    }

    out
}

/// Truncated Pareto(shape = 1) sample: floor(1 / (1 - u)), u uniform in
/// [0, 1). Always at least 1, heavy-tailed.
fn pareto_repeat(rng: &mut impl Rng) -> u64 {
    let u: f64 = rng.gen();
    (1.0 / (1.0 - u)) as u64
}
