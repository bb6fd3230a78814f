//! ZFNet-style template: conv-then-pool stages in the classic large-kernel
//! layout.

use crate::architecture::BlockArchitecture;
use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer_block::LayerBlock;
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

use super::classification::ClassificationBlock;

/// Sub-block vocabulary of one ZFNet stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZFNetSubBlock {
    Conv2D,
    MaxPool2D,
}

impl ZFNetSubBlock {
    const ALL: [ZFNetSubBlock; 2] = [Self::Conv2D, Self::MaxPool2D];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// One ZFNet stage: a leading convolution, a random conv/pool mix, and a
/// closing max pool.
pub struct ZFNetBlock {
    body: BlockBody,
}

impl ZFNetBlock {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            ZFNetSubBlock::sample,
            |shape, rng| Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)]),
            |shape, tag, rng| match tag {
                ZFNetSubBlock::Conv2D => Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)]),
                ZFNetSubBlock::MaxPool2D => {
                    Ok(vec![boxed(LayerBlock::random_max_pool(shape, rng)?)])
                }
            },
            |shape, rng| Ok(vec![boxed(LayerBlock::random_max_pool(shape, rng)?)]),
        )?;
        let mut block = ZFNetBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for ZFNetBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "zfnet"
    }
}

impl_block_via_composite!(ZFNetBlock);

/// ZFNet-style architecture: conv/pool stages in front of the classifier
/// head.
pub struct ZFNetArchitecture {
    body: BlockBody,
    class_count: usize,
}

impl ZFNetArchitecture {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: Shape, class_count: usize, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape,
            Self::MAX_SUB_BLOCKS,
            rng,
            |_rng| (),
            |shape, rng| Ok(vec![boxed(ZFNetBlock::new(shape, rng)?)]),
            |shape, (), rng| Ok(vec![boxed(ZFNetBlock::new(shape, rng)?)]),
            |shape, rng| Ok(vec![boxed(ClassificationBlock::new(shape, class_count, rng)?)]),
        )?;
        let mut arch = ZFNetArchitecture { body, class_count };
        arch.validate(true)?;
        Ok(arch)
    }
}

impl Composite for ZFNetArchitecture {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "zfnet_architecture"
    }

    fn check(&self) -> bool {
        self.body
            .output_blocks
            .last()
            .map_or(false, |b| b.role() == "classification")
    }
}

impl_block_via_composite!(ZFNetArchitecture);

impl BlockArchitecture for ZFNetArchitecture {
    fn class_count(&self) -> usize {
        self.class_count
    }
}
