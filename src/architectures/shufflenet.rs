//! ShuffleNet-style template: pointwise bottlenecks around depthwise
//! convolutions. Grouped convolutions are approximated with full pointwise
//! convolutions, which keeps the unit vocabulary backend-neutral.

use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer_block::LayerBlock;
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

/// Sub-block vocabulary of a ShuffleNet unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleNetSubBlock {
    DepthwiseConv2D,
    PointwiseConv2D,
}

impl ShuffleNetSubBlock {
    const ALL: [ShuffleNetSubBlock; 2] = [Self::DepthwiseConv2D, Self::PointwiseConv2D];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// One ShuffleNet unit: pointwise in, a depthwise/pointwise mix, pointwise
/// out.
pub struct ShuffleNetBlock {
    body: BlockBody,
}

impl ShuffleNetBlock {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            ShuffleNetSubBlock::sample,
            |shape, rng| Ok(vec![boxed(LayerBlock::pointwise_conv2d(shape, rng)?)]),
            |shape, tag, rng| match tag {
                ShuffleNetSubBlock::DepthwiseConv2D => {
                    Ok(vec![boxed(LayerBlock::random_depthwise_conv2d(shape, rng)?)])
                }
                ShuffleNetSubBlock::PointwiseConv2D => {
                    Ok(vec![boxed(LayerBlock::pointwise_conv2d(shape, rng)?)])
                }
            },
            |shape, rng| Ok(vec![boxed(LayerBlock::pointwise_conv2d(shape, rng)?)]),
        )?;
        let mut block = ShuffleNetBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for ShuffleNetBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "shufflenet"
    }
}

impl_block_via_composite!(ShuffleNetBlock);
