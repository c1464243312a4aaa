//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod process_helpers;

use std::time::Duration;

/// Upper limit for any single pipeline run
pub fn test_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Primes below `bound` by trial division
pub fn naive_primes(bound: i32) -> Vec<i32> {
    (2..bound)
        .filter(|&n| (2..n).take_while(|d| d * d <= n).all(|d| n % d != 0))
        .collect()
}

/// Exact stdout expected for `bound`
pub fn expected_output(bound: i32) -> String {
    naive_primes(bound)
        .iter()
        .map(|p| format!("prime {}\n", p))
        .collect()
}

#[test]
fn test_naive_primes() {
    assert_eq!(naive_primes(2), Vec::<i32>::new());
    assert_eq!(naive_primes(3), vec![2]);
    assert_eq!(naive_primes(20), vec![2, 3, 5, 7, 11, 13, 17, 19]);
}
