use super::{BatchKernel, KernelError, Recipe};

/// Element-at-a-time reference implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarKernel;

impl BatchKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn lanes(&self) -> usize {
        1
    }

    fn apply(&self, recipe: Recipe, inputs: &[&[f64]], outputs: &mut [&mut [f64]]) -> Result<(), KernelError> {
        let len = recipe.check_shape(inputs, outputs)?;
        match (recipe, outputs) {
            (Recipe::Product, [out]) => {
                let (a, b) = (inputs[0], inputs[1]);
                for i in 0..len {
                    out[i] = a[i] * b[i];
                }
            }
            (Recipe::DiscountedPrice, [out]) => {
                let (a, b) = (inputs[0], inputs[1]);
                for i in 0..len {
                    out[i] = a[i] * (1.0 - b[i]);
                }
            }
            (Recipe::DiscountedCharge, [price, charge]) => {
                let (a, b, c) = (inputs[0], inputs[1], inputs[2]);
                for i in 0..len {
                    let p = a[i] * (1.0 - b[i]);
                    price[i] = p;
                    charge[i] = p * (1.0 + c[i]);
                }
            }
            (Recipe::NetProfit, [out]) => {
                let (a, b, c, d) = (inputs[0], inputs[1], inputs[2], inputs[3]);
                for i in 0..len {
                    out[i] = a[i] * (1.0 - b[i]) - c[i] * d[i];
                }
            }
            // `check_shape` already rejected every other output arity.
            _ => {}
        }
        Ok(())
    }
}
