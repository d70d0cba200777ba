#![forbid(unsafe_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slotbook_contracts::booking::ReferenceCode;
use slotbook_contracts::ContractViolation;

pub const REFERENCE_PREFIX: &str = "BK-";
pub const REFERENCE_BODY_LEN: usize = 6;
// No 0/O or 1/I.
pub const REFERENCE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug)]
pub struct ReferenceCodeGenerator<R: Rng = StdRng> {
    rng: R,
}

impl ReferenceCodeGenerator<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> ReferenceCodeGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    pub fn next_code(&mut self) -> Result<ReferenceCode, ContractViolation> {
        let body: String = (0..REFERENCE_BODY_LEN)
            .map(|_| {
                let i = self.rng.gen_range(0..REFERENCE_ALPHABET.len());
                char::from(REFERENCE_ALPHABET[i])
            })
            .collect();
        ReferenceCode::new(format!("{REFERENCE_PREFIX}{body}"))
    }

    /// Draws until `taken` rejects nothing, for at most `max_attempts` draws.
    pub fn next_unused(
        &mut self,
        max_attempts: u8,
        taken: impl Fn(&ReferenceCode) -> bool,
    ) -> Result<Option<ReferenceCode>, ContractViolation> {
        for _ in 0..max_attempts {
            let code = self.next_code()?;
            if !taken(&code) {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_refcode_01_codes_use_prefix_and_unambiguous_alphabet() {
        let mut gen = ReferenceCodeGenerator::seeded(7);
        for _ in 0..200 {
            let code = gen.next_code().unwrap();
            let body = code.as_str().strip_prefix(REFERENCE_PREFIX).unwrap();
            assert_eq!(body.len(), REFERENCE_BODY_LEN);
            assert!(body.bytes().all(|b| REFERENCE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn at_refcode_02_collisions_are_redrawn_then_given_up() {
        let mut gen = ReferenceCodeGenerator::seeded(11);
        let first = gen.next_code().unwrap();
        let mut replay = ReferenceCodeGenerator::seeded(11);
        let fresh = replay.next_unused(4, |c| *c == first).unwrap().unwrap();
        assert_ne!(fresh, first);

        let mut gen = ReferenceCodeGenerator::seeded(3);
        assert_eq!(gen.next_unused(5, |_| true).unwrap(), None);
    }
}
