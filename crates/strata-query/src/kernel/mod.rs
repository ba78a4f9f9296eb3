//! Batched per-row arithmetic.
//!
//! Every [`Recipe`] has a scalar reference implementation ([`ScalarKernel`]) and
//! a SIMD one ([`SimdKernel`]). [`KernelRunner`] splits work into batches and,
//! in [`KernelChoice::Verified`] mode, checks the SIMD results against the
//! scalar oracle.

mod scalar;
mod simd;

pub use scalar::ScalarKernel;
pub use simd::{LaneWidth, SimdKernel};

use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

/// Relative tolerance within which the two implementations must agree.
pub const AGREEMENT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("{recipe:?} expects {expected} input columns, got {actual}")]
    InputArity {
        recipe: Recipe,
        expected: usize,
        actual: usize,
    },
    #[error("{recipe:?} expects {expected} output columns, got {actual}")]
    OutputArity {
        recipe: Recipe,
        expected: usize,
        actual: usize,
    },
    #[error("column length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// The arithmetic shapes the pipeline needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recipe {
    /// `a * b`
    Product,
    /// `a * (1 - b)`
    DiscountedPrice,
    /// `a * (1 - b)` and `a * (1 - b) * (1 + c)`
    DiscountedCharge,
    /// `a * (1 - b) - c * d`
    NetProfit,
}

impl Recipe {
    pub fn input_count(self) -> usize {
        match self {
            Recipe::Product | Recipe::DiscountedPrice => 2,
            Recipe::DiscountedCharge => 3,
            Recipe::NetProfit => 4,
        }
    }

    pub fn output_count(self) -> usize {
        match self {
            Recipe::DiscountedCharge => 2,
            _ => 1,
        }
    }

    /// Checks arities and that every column has the same length; returns it.
    pub fn check_shape(self, inputs: &[&[f64]], outputs: &[&mut [f64]]) -> Result<usize, KernelError> {
        if inputs.len() != self.input_count() {
            return Err(KernelError::InputArity {
                recipe: self,
                expected: self.input_count(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.output_count() {
            return Err(KernelError::OutputArity {
                recipe: self,
                expected: self.output_count(),
                actual: outputs.len(),
            });
        }
        let len = inputs[0].len();
        let lengths = inputs
            .iter()
            .map(|c| c.len())
            .chain(outputs.iter().map(|c| c.len()));
        for actual in lengths {
            if actual != len {
                return Err(KernelError::LengthMismatch {
                    expected: len,
                    actual,
                });
            }
        }
        Ok(len)
    }
}

/// A batch implementation of every [`Recipe`].
///
/// Inputs are dense and null-free; rows with missing values never reach a kernel.
pub trait BatchKernel: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Values processed per vector step (1 for scalar code).
    fn lanes(&self) -> usize;

    fn apply(&self, recipe: Recipe, inputs: &[&[f64]], outputs: &mut [&mut [f64]]) -> Result<(), KernelError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KernelChoice {
    Scalar,
    #[default]
    Simd,
    /// Run both and report disagreements; the scalar result is kept.
    Verified,
}

impl std::str::FromStr for KernelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(KernelChoice::Scalar),
            "simd" => Ok(KernelChoice::Simd),
            "verified" | "verify" => Ok(KernelChoice::Verified),
            other => Err(format!("unknown kernel {other:?}")),
        }
    }
}

/// One element where the SIMD result strayed from the scalar reference.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelDivergence {
    pub recipe: Recipe,
    pub output: usize,
    pub index: usize,
    pub scalar: f64,
    pub vector: f64,
}

/// `true` when `a` and `b` agree within [`AGREEMENT_TOLERANCE`] relative error.
pub fn agrees(a: f64, b: f64) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    (a - b).abs() <= AGREEMENT_TOLERANCE * a.abs().max(b.abs())
}

/// Drives a kernel over arbitrarily long columns in fixed-size batches.
#[derive(Debug)]
pub struct KernelRunner {
    choice: KernelChoice,
    batch_size: usize,
    scalar: ScalarKernel,
    simd: SimdKernel,
    scratch: Vec<Vec<f64>>,
}

impl KernelRunner {
    pub fn new(choice: KernelChoice, batch_size: usize) -> Self {
        Self::with_simd(choice, batch_size, SimdKernel::detect())
    }

    pub fn with_simd(choice: KernelChoice, batch_size: usize, simd: SimdKernel) -> Self {
        Self {
            choice,
            batch_size: batch_size.max(1),
            scalar: ScalarKernel,
            simd,
            scratch: Vec::new(),
        }
    }

    pub fn choice(&self) -> KernelChoice {
        self.choice
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evaluates `recipe`, resizing `outputs` to the input length. Returns the
    /// divergences found in verified mode (always empty otherwise).
    pub fn run(
        &mut self,
        recipe: Recipe,
        inputs: &[&[f64]],
        outputs: &mut [Vec<f64>],
    ) -> Result<Vec<KernelDivergence>, KernelError> {
        let len = inputs.first().map_or(0, |c| c.len());
        for out in outputs.iter_mut() {
            out.clear();
            out.resize(len, 0.0);
        }
        {
            let views: SmallVec<[&mut [f64]; 2]> =
                outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
            recipe.check_shape(inputs, &views)?;
        }

        let mut divergences = Vec::new();
        let mut start = 0usize;
        while start < len {
            let end = (start + self.batch_size).min(len);
            let batch: SmallVec<[&[f64]; 4]> = inputs.iter().map(|c| &c[start..end]).collect();
            let mut views: SmallVec<[&mut [f64]; 2]> =
                outputs.iter_mut().map(|o| &mut o[start..end]).collect();

            match self.choice {
                KernelChoice::Scalar => self.scalar.apply(recipe, &batch, &mut views)?,
                KernelChoice::Simd => self.simd.apply(recipe, &batch, &mut views)?,
                KernelChoice::Verified => {
                    self.simd.apply(recipe, &batch, &mut views)?;

                    self.scratch.resize_with(views.len(), Vec::new);
                    for s in &mut self.scratch {
                        s.clear();
                        s.resize(end - start, 0.0);
                    }
                    let mut reference: SmallVec<[&mut [f64]; 2]> =
                        self.scratch.iter_mut().map(|s| s.as_mut_slice()).collect();
                    self.scalar.apply(recipe, &batch, &mut reference)?;

                    for (output, (vector, scalar)) in views.iter_mut().zip(reference.iter()).enumerate() {
                        for (i, (v, s)) in vector.iter_mut().zip(scalar.iter()).enumerate() {
                            if !agrees(*s, *v) {
                                log::warn!(
                                    "kernel divergence in {recipe:?} output {output} at row {}: scalar={s} simd={v}",
                                    start + i
                                );
                                divergences.push(KernelDivergence {
                                    recipe,
                                    output,
                                    index: start + i,
                                    scalar: *s,
                                    vector: *v,
                                });
                                *v = *s;
                            }
                        }
                    }
                }
            }
            start = end;
        }
        Ok(divergences)
    }
}
