use super::scalar::ScalarKernel;
use super::{BatchKernel, KernelError, Recipe};
use smallvec::SmallVec;
use wide::{f64x2, f64x4};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneWidth {
    Two,
    Four,
}

impl LaneWidth {
    pub fn lanes(self) -> usize {
        match self {
            LaneWidth::Two => 2,
            LaneWidth::Four => 4,
        }
    }
}

/// `wide`-backed implementation. Full vectors cover `len - len % lanes`
/// elements; the remainder goes through the scalar loop.
#[derive(Clone, Copy, Debug)]
pub struct SimdKernel {
    width: LaneWidth,
}

impl SimdKernel {
    /// Picks the widest lane count the running CPU handles natively.
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if std::arch::is_x86_feature_detected!("avx") {
                return Self::with_lanes(LaneWidth::Four);
            }
        }
        Self::with_lanes(LaneWidth::Two)
    }

    pub fn with_lanes(width: LaneWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> LaneWidth {
        self.width
    }
}

impl Default for SimdKernel {
    fn default() -> Self {
        Self::detect()
    }
}

macro_rules! vector_body {
    ($fn_name:ident, $vec:ty, $lanes:expr) => {
        /// Processes whole vectors and returns where the scalar tail starts.
        fn $fn_name(recipe: Recipe, len: usize, inputs: &[&[f64]], outputs: &mut [&mut [f64]]) -> usize {
            #[inline(always)]
            fn load(col: &[f64], i: usize) -> $vec {
                let mut lanes = [0.0f64; $lanes];
                lanes.copy_from_slice(&col[i..i + $lanes]);
                <$vec>::from(lanes)
            }

            let body = len - len % $lanes;
            let one = <$vec>::splat(1.0);
            match (recipe, outputs) {
                (Recipe::Product, [out]) => {
                    let mut i = 0;
                    while i < body {
                        let r = load(inputs[0], i) * load(inputs[1], i);
                        out[i..i + $lanes].copy_from_slice(&r.to_array());
                        i += $lanes;
                    }
                }
                (Recipe::DiscountedPrice, [out]) => {
                    let mut i = 0;
                    while i < body {
                        let r = load(inputs[0], i) * (one - load(inputs[1], i));
                        out[i..i + $lanes].copy_from_slice(&r.to_array());
                        i += $lanes;
                    }
                }
                (Recipe::DiscountedCharge, [price, charge]) => {
                    let mut i = 0;
                    while i < body {
                        let p = load(inputs[0], i) * (one - load(inputs[1], i));
                        let c = p * (one + load(inputs[2], i));
                        price[i..i + $lanes].copy_from_slice(&p.to_array());
                        charge[i..i + $lanes].copy_from_slice(&c.to_array());
                        i += $lanes;
                    }
                }
                (Recipe::NetProfit, [out]) => {
                    let mut i = 0;
                    while i < body {
                        let r = load(inputs[0], i) * (one - load(inputs[1], i))
                            - load(inputs[2], i) * load(inputs[3], i);
                        out[i..i + $lanes].copy_from_slice(&r.to_array());
                        i += $lanes;
                    }
                }
                _ => return 0,
            }
            body
        }
    };
}

vector_body!(body_x2, f64x2, 2);
vector_body!(body_x4, f64x4, 4);

impl BatchKernel for SimdKernel {
    fn name(&self) -> &'static str {
        match self.width {
            LaneWidth::Two => "simd-f64x2",
            LaneWidth::Four => "simd-f64x4",
        }
    }

    fn lanes(&self) -> usize {
        self.width.lanes()
    }

    fn apply(&self, recipe: Recipe, inputs: &[&[f64]], outputs: &mut [&mut [f64]]) -> Result<(), KernelError> {
        let len = recipe.check_shape(inputs, outputs)?;
        let tail = match self.width {
            LaneWidth::Two => body_x2(recipe, len, inputs, outputs),
            LaneWidth::Four => body_x4(recipe, len, inputs, outputs),
        };
        if tail == len {
            return Ok(());
        }

        let tail_inputs: SmallVec<[&[f64]; 4]> = inputs.iter().map(|c| &c[tail..]).collect();
        let mut tail_outputs: SmallVec<[&mut [f64]; 2]> =
            outputs.iter_mut().map(|c| &mut c[tail..]).collect();
        ScalarKernel.apply(recipe, &tail_inputs, &mut tail_outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kernel: &dyn BatchKernel, recipe: Recipe, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let len = inputs[0].len();
        let mut outputs = vec![vec![0.0; len]; recipe.output_count()];
        let ins: Vec<&[f64]> = inputs.iter().map(Vec::as_slice).collect();
        let mut outs: Vec<&mut [f64]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
        kernel.apply(recipe, &ins, &mut outs).unwrap();
        outputs
    }

    #[test]
    fn tails_match_scalar_for_every_width() {
        for len in [0usize, 1, 3, 4, 5, 7, 8, 9] {
            let inputs: Vec<Vec<f64>> = (0..4)
                .map(|k| (0..len).map(|i| (i * 7 + k) as f64 / 13.0).collect())
                .collect();
            for width in [LaneWidth::Two, LaneWidth::Four] {
                let simd = SimdKernel::with_lanes(width);
                for recipe in [
                    Recipe::Product,
                    Recipe::DiscountedPrice,
                    Recipe::DiscountedCharge,
                    Recipe::NetProfit,
                ] {
                    let ins = &inputs[..recipe.input_count()];
                    assert_eq!(
                        run(&simd, recipe, ins),
                        run(&ScalarKernel, recipe, ins),
                        "len={len} width={width:?} recipe={recipe:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn names_and_lanes() {
        assert_eq!(SimdKernel::with_lanes(LaneWidth::Four).lanes(), 4);
        assert_eq!(SimdKernel::with_lanes(LaneWidth::Two).name(), "simd-f64x2");
        assert!(matches!(SimdKernel::detect().lanes(), 2 | 4));
    }
}
