//! CPU-bound counting kernel.

use std::hint::black_box;

/// Iterations of the inner loop per unit of intensity.
pub const INNER_ITERATIONS: u64 = 1_000_000;

/// Count `intensity * INNER_ITERATIONS` times.
///
/// Every increment passes through `black_box`, so the loop cannot be folded away.
/// Returns the final count.
pub fn run(intensity: u32) -> u64 {
    let mut counter = 0u64;
    for _ in 0..intensity {
        for _ in 0..INNER_ITERATIONS {
            counter = black_box(counter + 1);
        }
    }
    counter
}
