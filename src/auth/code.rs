//! One-time code generators.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};

pub const DEFAULT_CODE_DIGITS: usize = 6;
pub const MIN_CODE_DIGITS: usize = 4;
pub const MAX_CODE_DIGITS: usize = 12;
pub const FIXED_DEVELOPMENT_CODE: &str = "9999";

pub trait CodeGenerator: Send + Sync {
    /// Produce the next challenge code.
    ///
    /// # Errors
    /// Returns an error if the entropy source fails.
    fn next(&self) -> Result<String>;
}

/// Always hands out the same code. Development and tests only.
#[derive(Clone, Debug)]
pub struct FixedCodeGenerator {
    code: String,
}

impl FixedCodeGenerator {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl Default for FixedCodeGenerator {
    fn default() -> Self {
        Self::new(FIXED_DEVELOPMENT_CODE)
    }
}

impl CodeGenerator for FixedCodeGenerator {
    fn next(&self) -> Result<String> {
        Ok(self.code.clone())
    }
}

/// Numeric codes drawn from the operating system RNG, between
/// `MIN_CODE_DIGITS` and `MAX_CODE_DIGITS` long.
#[derive(Clone, Debug)]
pub struct RandomCodeGenerator {
    digits: usize,
}

impl RandomCodeGenerator {
    #[must_use]
    pub fn new(digits: usize) -> Self {
        Self {
            digits: digits.clamp(MIN_CODE_DIGITS, MAX_CODE_DIGITS),
        }
    }

    #[must_use]
    pub const fn digits(&self) -> usize {
        self.digits
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_DIGITS)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn next(&self) -> Result<String> {
        let mut code = String::with_capacity(self.digits);
        let mut bytes = [0u8; 16];
        while code.len() < self.digits {
            OsRng
                .try_fill_bytes(&mut bytes)
                .context("failed to generate challenge code")?;
            // 250 is the largest multiple of 10 below 256; rejecting the rest keeps digits uniform
            for byte in bytes.iter().filter(|byte| **byte < 250) {
                if code.len() == self.digits {
                    break;
                }
                code.push(char::from(b'0' + byte % 10));
            }
        }
        Ok(code)
    }
}
