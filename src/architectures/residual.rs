//! Residual template - a shape-preserving group with a skip connection.
//!
//! The group's children must map its input shape to itself so the skip add
//! is well-formed; that identity is the template's structural predicate,
//! with a repair that forces every child back to a shape-preserving
//! configuration. In the executable graph the whole group lowers to a
//! single `AddSkip` unit.

use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer::{LayerKind, Padding};
use crate::layer_block::LayerBlock;
use crate::model::{GraphUnit, LayerSpec};
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

/// Sub-block vocabulary of a residual group; every member preserves the
/// incoming shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualSubBlock {
    IdentityConv2D,
    DepthwiseConv2D,
}

impl ResidualSubBlock {
    const ALL: [ResidualSubBlock; 2] = [Self::IdentityConv2D, Self::DepthwiseConv2D];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// A stack of shape-preserving convolutions whose output is added to the
/// group's input.
pub struct ResidualBlock {
    body: BlockBody,
}

impl ResidualBlock {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            ResidualSubBlock::sample,
            |_shape, _rng| Ok(vec![]),
            |shape, tag, rng| match tag {
                ResidualSubBlock::IdentityConv2D => {
                    Ok(vec![boxed(LayerBlock::identity_conv2d(shape, rng)?)])
                }
                ResidualSubBlock::DepthwiseConv2D => {
                    Ok(vec![boxed(LayerBlock::random_depthwise_conv2d(shape, rng)?)])
                }
            },
            |_shape, _rng| Ok(vec![]),
        )?;
        let mut block = ResidualBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for ResidualBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "residual"
    }

    fn check(&self) -> bool {
        self.body.output_shape() == self.body.input_shape
    }

    /// Force every child back to a shape-preserving configuration; a
    /// mutation may have given a child a stride, a valid padding or a
    /// foreign filter count.
    fn fix(&mut self) -> Result<()> {
        for child in self.body.children_mut() {
            if let Some(leaf) = child.as_any_mut().downcast_mut::<LayerBlock>() {
                let channels = leaf.layer().input_shape().channels();
                match leaf.layer_mut().kind_mut() {
                    LayerKind::Conv2D(p) => {
                        p.filters = channels;
                        p.strides = (1, 1);
                        p.padding = Padding::Same;
                        p.dilation_rate = (1, 1);
                    }
                    LayerKind::DepthwiseConv2D(p) => {
                        p.strides = (1, 1);
                        p.padding = Padding::Same;
                    }
                    _ => {}
                }
                leaf.layer_mut().refresh_output_shape();
            }
        }
        Ok(())
    }

    fn collect(&self, out: &mut Vec<GraphUnit>) {
        let mut inner = Vec::new();
        self.body.collect_units(&mut inner);
        if inner.is_empty() {
            // Childless group: the skip add of nothing is the identity.
            return;
        }
        out.push(GraphUnit {
            spec: LayerSpec::AddSkip { units: inner },
            input_shape: self.body.input_shape.clone(),
            output_shape: self.body.output_shape(),
        });
    }
}

impl_block_via_composite!(ResidualBlock);
