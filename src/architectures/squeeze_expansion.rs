//! Squeeze-expansion template: collapse spatial dims with a global pool,
//! then re-expand through dense layers.

use crate::architecture::BlockArchitecture;
use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer_block::LayerBlock;
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;

use super::classification::ClassificationBlock;

/// One squeeze-expansion stage: a global average pool followed by up to
/// `MAX_SUB_BLOCKS` dense expansion layers.
pub struct SqueezeExpansionBlock {
    body: BlockBody,
}

impl SqueezeExpansionBlock {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            |_rng| (),
            |shape, _rng| Ok(vec![boxed(LayerBlock::global_average_pool(shape)?)]),
            |shape, (), rng| Ok(vec![boxed(LayerBlock::random_hidden_dense(shape, rng)?)]),
            |_shape, _rng| Ok(vec![]),
        )?;
        let mut block = SqueezeExpansionBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for SqueezeExpansionBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "squeeze_expansion"
    }
}

impl_block_via_composite!(SqueezeExpansionBlock);

/// Squeeze-expansion architecture: a leading convolution, one squeeze
/// stage, and the classifier head.
///
/// The squeeze stage leaves a rank-1 shape, so at most one is generated;
/// further middle draws are skipped once the spatial grid is gone.
pub struct SqueezeExpansionArchitecture {
    body: BlockBody,
    class_count: usize,
}

impl SqueezeExpansionArchitecture {
    pub const MAX_SUB_BLOCKS: usize = 3;

    pub fn new(input_shape: Shape, class_count: usize, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape,
            Self::MAX_SUB_BLOCKS,
            rng,
            |_rng| (),
            |shape, rng| Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)]),
            |shape, (), rng| {
                if shape.rank() != 3 {
                    return Ok(vec![]);
                }
                Ok(vec![boxed(SqueezeExpansionBlock::new(shape, rng)?)])
            },
            |shape, rng| Ok(vec![boxed(ClassificationBlock::new(shape, class_count, rng)?)]),
        )?;
        let mut arch = SqueezeExpansionArchitecture { body, class_count };
        arch.validate(true)?;
        Ok(arch)
    }
}

impl Composite for SqueezeExpansionArchitecture {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "squeeze_expansion_architecture"
    }

    fn check(&self) -> bool {
        self.body
            .output_blocks
            .last()
            .map_or(false, |b| b.role() == "classification")
    }
}

impl_block_via_composite!(SqueezeExpansionArchitecture);

impl BlockArchitecture for SqueezeExpansionArchitecture {
    fn class_count(&self) -> usize {
        self.class_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_stage_squeezes_to_rank_one() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let stage = SqueezeExpansionBlock::new(&Shape::from([14, 14, 32]), &mut rng).unwrap();
            assert_eq!(stage.body.input_blocks[0].role(), "global_average_pool2d");
            assert_eq!(stage.output_shape().rank(), 1);
        }
    }

    #[test]
    fn test_architecture_at_most_one_squeeze() {
        for seed in 0..30 {
            let mut rng = StdRng::seed_from_u64(seed);
            let arch =
                SqueezeExpansionArchitecture::new(Shape::from([32, 32, 3]), 10, &mut rng).unwrap();
            let squeezes = arch
                .body
                .middle_blocks
                .iter()
                .filter(|b| b.role() == "squeeze_expansion")
                .count();
            assert!(squeezes <= 1);
            assert_eq!(arch.output_shape(), Shape::from([10]));
        }
    }
}
