//! Phase 9: the first N palindromic integers.

use crate::error::{try_copy, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Whether the decimal digits of `num` read the same in both directions.
pub fn is_palindrome(num: u64) -> bool {
    let mut digits = [0u8; 20];
    let mut len = 0;
    let mut rest = num;
    loop {
        digits[len] = (rest % 10) as u8;
        len += 1;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    (0..len / 2).all(|i| digits[i] == digits[len - 1 - i])
}

/// Smallest palindrome not below `from`.
fn next_palindrome(from: u64) -> u64 {
    (from..).find(|&num| is_palindrome(num)).unwrap_or(from)
}

/// The `n`-th palindrome counting from zero (`0, 1, ..., 9, 11, 22, ...`),
/// found by scanning upward from zero.
pub fn nth_palindrome(n: usize) -> u64 {
    let mut value = 0;
    for _ in 0..n {
        value = next_palindrome(value + 1);
    }
    value
}

/// Fills `palindromes[i]` with the `i`-th palindrome. Each worker locates the
/// first palindrome of its contiguous range by scanning from zero, then
/// continues upward.
#[derive(Clone, Debug)]
pub struct Palindromes {
    pub palindromes: Vec<u64>,
}

impl Palindromes {
    pub fn new(count: usize) -> Self {
        Self {
            palindromes: vec![0; count],
        }
    }
}

impl PhaseKernel for Palindromes {
    fn phase(&self) -> PhaseId {
        PhaseId::Palindromes
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let shadow = match shadow {
            Some(shadow) => Some(shadow.single_u64_mut()?),
            None => None,
        };
        let workers = region.workers();
        let out = Partitioned::new(&mut self.palindromes, workers);
        let shadow = shadow.map(|shadow| Partitioned::new(shadow, workers));

        region.run(|ctx| {
            let mut part = out.lock(ctx.index());
            let mut mirror = shadow.as_ref().map(|shadow| shadow.lock(ctx.index()));
            let mut value = nth_palindrome(part.start);
            for (offset, slot) in part.data.iter_mut().enumerate() {
                if offset > 0 {
                    value = next_palindrome(value + 1);
                }
                *slot = value;
                if let Some(mirror) = mirror.as_mut() {
                    mirror.data[offset] = value;
                }
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::u64("palindromes", &self.palindromes)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            palindromes: try_copy("reference palindromes", &self.palindromes)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_u64("palindromes", self.palindromes.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.palindromes.len() * 8) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_palindrome() {
        for num in [0, 7, 11, 121, 1221, 12321, 9_009] {
            assert!(is_palindrome(num), "{num}");
        }
        for num in [10, 12, 123, 1231, 100] {
            assert!(!is_palindrome(num), "{num}");
        }
        assert!(!is_palindrome(u64::MAX));
    }

    #[test]
    fn test_nth_palindrome() {
        assert_eq!(nth_palindrome(0), 0);
        assert_eq!(nth_palindrome(9), 9);
        assert_eq!(nth_palindrome(10), 11);
        assert_eq!(nth_palindrome(18), 99);
        assert_eq!(nth_palindrome(19), 101);
    }

    #[test]
    fn test_serial_sequence() -> Result<()> {
        let mut kernel = Palindromes::new(13);
        kernel.execute(&Region::serial(1), None)?;
        assert_eq!(kernel.palindromes, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11, 22, 33]);
        Ok(())
    }
}
