//! Block - the recursive composite at the heart of the architecture tree.
//!
//! A block owns three ordered child sequences (input, middle, output), each
//! child being another block or a single layer wrapped as one. The
//! [`Block`] trait is the object-safe surface every tree node exposes;
//! [`BlockBody`] carries the shared composite state and the recursive
//! validate / repair / shape-propagation / mutation machinery; the
//! [`Composite`] trait lets concrete templates plug in their role tag and
//! any extra structural predicate while inheriting the whole `Block`
//! implementation through a blanket impl.
//!
//! # Construction lifecycle
//!
//! [`BlockBody::generate`] drives the three generation hooks in order:
//!
//! 1. constrained input sub-blocks, seeded with the block's input shape,
//! 2. `k` random middle sub-blocks (`k` uniform in `[0, max_sub_blocks]`),
//!    each tagged with a sub-block type drawn from the template's closed
//!    enum, the shape cursor advancing after each child,
//! 3. constrained output sub-blocks, seeded with the final cursor shape.
//!
//! Hooks always return a flat list of children. After generation the caller
//! validates the finished tree with repair enabled.
//!
//! # Shape invariant
//!
//! For a validated block, the output shape of every child in the flattened
//! sequence `input_blocks ++ middle_blocks ++ output_blocks` equals the
//! input shape of the next child, and the first child's input shape equals
//! the block's own. Repair re-threads shapes top-down and re-validates
//! children until the invariant holds, bounded by
//! [`MAX_REPAIR_ITERATIONS`](crate::layer::MAX_REPAIR_ITERATIONS).

use crate::layer::MutationOutcome;
use crate::model::GraphUnit;
use crate::shape::Shape;
use crate::{BlocknasError, Result};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;

/// Report of one tree mutation: which node was touched and what changed.
///
/// `outcome` is `None` when the selected leaf has no mutatable parameters
/// (the mutation is then a no-op, which is legal).
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Description of the mutated node.
    pub node: String,
    /// The parameter change, if any.
    pub outcome: Option<MutationOutcome>,
}

/// Object-safe surface of every node in an architecture tree.
pub trait Block: Any {
    /// Role tag identifying what this node is among its siblings.
    fn role(&self) -> &'static str;

    /// Shape this node presents to its parent as its left boundary.
    fn input_shape(&self) -> &Shape;

    /// Shape produced by this node's last child (or its own transform).
    fn output_shape(&self) -> Shape;

    /// Re-thread shapes top-down starting from `input`.
    fn propagate_shape(&mut self, input: Shape) -> Result<()>;

    /// Validate this subtree, children before self.
    ///
    /// With `repair` set, local repairs are applied until the subtree
    /// validates, bounded per node; exceeding the bound is
    /// [`BlocknasError::RepairDivergence`].
    fn validate(&mut self, repair: bool) -> Result<bool>;

    /// Number of mutatable leaves in this subtree.
    fn node_count(&self) -> usize;

    /// Mutate the `index`-th leaf (depth-first, left-to-right).
    fn mutate_node(&mut self, index: usize, rng: &mut StdRng) -> Result<MutationEvent>;

    /// Append this subtree's executable units in construction order.
    fn collect_units(&self, out: &mut Vec<GraphUnit>);

    /// Append an indented description of this subtree to `out`.
    fn describe(&self, indent: usize, out: &mut String);

    /// Reference as `Any`, for downcasting in block-level repairs.
    fn as_any(&self) -> &dyn Any;

    /// Mutable reference as `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared state and machinery of a composite block.
pub struct BlockBody {
    /// Shape presented to the parent.
    pub input_shape: Shape,
    /// Constrained children generated first.
    pub input_blocks: Vec<Box<dyn Block>>,
    /// Randomly generated children, at most the template's arity bound.
    pub middle_blocks: Vec<Box<dyn Block>>,
    /// Constrained children generated last.
    pub output_blocks: Vec<Box<dyn Block>>,
}

impl BlockBody {
    /// Create an empty body with the given input shape.
    pub fn new(input_shape: Shape) -> Self {
        BlockBody {
            input_shape,
            input_blocks: Vec::new(),
            middle_blocks: Vec::new(),
            output_blocks: Vec::new(),
        }
    }

    /// Drive the three generation hooks to build a body.
    ///
    /// `sample_tag` draws one member of the template's sub-block-type enum;
    /// `input_hook` / `middle_hook` / `output_hook` are the template's
    /// generation rules. The shape cursor starts at `input_shape` and
    /// advances over every generated child.
    pub fn generate<T: Copy>(
        input_shape: Shape,
        max_sub_blocks: usize,
        rng: &mut StdRng,
        mut sample_tag: impl FnMut(&mut StdRng) -> T,
        mut input_hook: impl FnMut(&Shape, &mut StdRng) -> Result<Vec<Box<dyn Block>>>,
        mut middle_hook: impl FnMut(&Shape, T, &mut StdRng) -> Result<Vec<Box<dyn Block>>>,
        mut output_hook: impl FnMut(&Shape, &mut StdRng) -> Result<Vec<Box<dyn Block>>>,
    ) -> Result<BlockBody> {
        let mut body = BlockBody::new(input_shape);
        let mut cursor = body.input_shape.clone();

        for child in input_hook(&cursor, rng)? {
            cursor = child.output_shape();
            body.input_blocks.push(child);
        }

        let count = rng.gen_range(0..=max_sub_blocks);
        for _ in 0..count {
            let tag = sample_tag(rng);
            for child in middle_hook(&cursor, tag, rng)? {
                cursor = child.output_shape();
                body.middle_blocks.push(child);
            }
        }

        for child in output_hook(&cursor, rng)? {
            cursor = child.output_shape();
            body.output_blocks.push(child);
        }

        Ok(body)
    }

    /// Iterate the flattened child sequence.
    pub fn children(&self) -> impl Iterator<Item = &dyn Block> {
        self.input_blocks
            .iter()
            .chain(self.middle_blocks.iter())
            .chain(self.output_blocks.iter())
            .map(|b| b.as_ref())
    }

    /// Iterate the flattened child sequence mutably.
    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Block>> {
        self.input_blocks
            .iter_mut()
            .chain(self.middle_blocks.iter_mut())
            .chain(self.output_blocks.iter_mut())
    }

    /// Number of children across all three sections.
    pub fn child_count(&self) -> usize {
        self.input_blocks.len() + self.middle_blocks.len() + self.output_blocks.len()
    }

    /// Output shape of the last child, or the input shape when childless.
    pub fn output_shape(&self) -> Shape {
        self.output_blocks
            .last()
            .or_else(|| self.middle_blocks.last())
            .or_else(|| self.input_blocks.last())
            .map(|b| b.output_shape())
            .unwrap_or_else(|| self.input_shape.clone())
    }

    /// Re-thread shapes through every child, advancing the cursor.
    pub fn propagate(&mut self, input: Shape) -> Result<()> {
        self.input_shape = input;
        let mut cursor = self.input_shape.clone();
        for child in self.children_mut() {
            child.propagate_shape(cursor)?;
            cursor = child.output_shape();
        }
        Ok(())
    }

    /// True when every adjacent pair of children agrees on the shape
    /// flowing between them, starting from the body's own input shape.
    pub fn chain_consistent(&self) -> bool {
        let mut cursor = self.input_shape.clone();
        for child in self.children() {
            if child.input_shape() != &cursor {
                return false;
            }
            cursor = child.output_shape();
        }
        true
    }

    /// Locate the first shape disagreement between adjacent children, for
    /// error context.
    pub fn first_mismatch(&self) -> Option<BlocknasError> {
        let children: Vec<&dyn Block> = self.children().collect();
        if let Some(first) = children.first() {
            if first.input_shape() != &self.input_shape {
                return Some(BlocknasError::ShapeMismatch {
                    context: format!("{} child 0", first.role()),
                    expected: first.input_shape().to_string(),
                    actual: self.input_shape.to_string(),
                });
            }
        }
        for (i, (prev, next)) in children.iter().tuple_windows().enumerate() {
            if &prev.output_shape() != next.input_shape() {
                return Some(BlocknasError::ShapeMismatch {
                    context: format!("{} child {}", next.role(), i + 1),
                    expected: next.input_shape().to_string(),
                    actual: prev.output_shape().to_string(),
                });
            }
        }
        None
    }

    /// Validate every child without repairing anything.
    pub fn children_valid(&mut self) -> Result<bool> {
        for child in self.children_mut() {
            if !child.validate(false)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sum of mutatable leaves across children.
    pub fn node_count(&self) -> usize {
        self.children().map(|c| c.node_count()).sum()
    }

    /// Dispatch a leaf mutation into the owning child.
    pub fn mutate_node(&mut self, mut index: usize, rng: &mut StdRng) -> Result<MutationEvent> {
        for child in self.children_mut() {
            let count = child.node_count();
            if index < count {
                return child.mutate_node(index, rng);
            }
            index -= count;
        }
        Err(BlocknasError::Other(format!(
            "mutation index {} out of range",
            index
        )))
    }

    /// Append every child's executable units in order.
    pub fn collect_units(&self, out: &mut Vec<GraphUnit>) {
        for child in self.children() {
            child.collect_units(out);
        }
    }

    /// Append an indented listing of all children.
    pub fn describe_children(&self, indent: usize, out: &mut String) {
        for child in self.children() {
            child.describe(indent, out);
        }
    }
}

/// Plug-in points a concrete composite template provides on top of
/// [`BlockBody`].
///
/// Implementing this trait and invoking [`impl_block_via_composite!`] gives
/// a template its full [`Block`] implementation; the template only supplies
/// its body, its role tag and, when it has one, an extra structural
/// predicate with a matching repair.
pub trait Composite {
    /// The shared composite body.
    fn body(&self) -> &BlockBody;

    /// Mutable access to the body.
    fn body_mut(&mut self) -> &mut BlockBody;

    /// Role tag for this template.
    fn tag(&self) -> &'static str;

    /// Extra predicate checked after all children are valid (e.g. a
    /// terminal "ends in a classifier" rule). Defaults to true.
    fn check(&self) -> bool {
        true
    }

    /// Extra repair applied when [`Composite::check`] fails or shapes
    /// disagree. Defaults to a no-op; templates whose predicate is
    /// repairable (e.g. residual identity) override this.
    fn fix(&mut self) -> Result<()> {
        Ok(())
    }

    /// Executable composition of the children. Defaults to sequential
    /// application; overridden by skip-connection templates.
    fn collect(&self, out: &mut Vec<GraphUnit>) {
        self.body().collect_units(out);
    }
}

/// Derive the [`Block`] implementation for a [`Composite`] template type.
///
/// A blanket impl would collide with the direct `Block` impl on leaf
/// nodes under coherence rules, so composites opt in explicitly.
macro_rules! impl_block_via_composite {
    ($ty:ty) => {
        impl $crate::block::Block for $ty {
            fn role(&self) -> &'static str {
                $crate::block::Composite::tag(self)
            }

            fn input_shape(&self) -> &$crate::shape::Shape {
                &self.body().input_shape
            }

            fn output_shape(&self) -> $crate::shape::Shape {
                self.body().output_shape()
            }

            fn propagate_shape(&mut self, input: $crate::shape::Shape) -> $crate::Result<()> {
                self.body_mut().propagate(input)
            }

            fn validate(&mut self, repair: bool) -> $crate::Result<bool> {
                if !repair {
                    return Ok(self.body_mut().children_valid()?
                        && self.body().chain_consistent()
                        && self.check());
                }
                for _ in 0..$crate::layer::MAX_REPAIR_ITERATIONS {
                    let mut ok = true;
                    for child in self.body_mut().children_mut() {
                        if !child.validate(true)? {
                            ok = false;
                        }
                    }
                    if ok && self.body().chain_consistent() && self.check() {
                        return Ok(true);
                    }
                    self.fix()?;
                    let input = self.body().input_shape.clone();
                    self.body_mut().propagate(input)?;
                }
                let detail = self
                    .body()
                    .first_mismatch()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default();
                Err($crate::BlocknasError::RepairDivergence {
                    node: format!("{} block{}", $crate::block::Composite::tag(self), detail),
                    iterations: $crate::layer::MAX_REPAIR_ITERATIONS,
                })
            }

            fn node_count(&self) -> usize {
                self.body().node_count()
            }

            fn mutate_node(
                &mut self,
                index: usize,
                rng: &mut rand::rngs::StdRng,
            ) -> $crate::Result<$crate::block::MutationEvent> {
                self.body_mut().mutate_node(index, rng)
            }

            fn collect_units(&self, out: &mut Vec<$crate::model::GraphUnit>) {
                $crate::block::Composite::collect(self, out);
            }

            fn describe(&self, indent: usize, out: &mut String) {
                out.push_str(&format!(
                    "{}{} {} -> {}\n",
                    "  ".repeat(indent),
                    $crate::block::Composite::tag(self),
                    self.body().input_shape,
                    self.body().output_shape()
                ));
                self.body().describe_children(indent + 1, out);
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }
    };
}

pub(crate) use impl_block_via_composite;

/// Box a node for use in a generation hook's child list.
pub fn boxed<B: Block>(block: B) -> Box<dyn Block> {
    Box::new(block)
}

/// Mutate exactly one leaf of the tree, then re-validate the whole tree
/// with repair enabled.
///
/// The leaf is selected uniformly at random over the flattened tree. A
/// local parameter change can invalidate shape compatibility anywhere
/// downstream, so the re-validation pass is unconditional. With `verbose`
/// set the mutation is reported through `tracing`.
pub fn mutate_tree(root: &mut dyn Block, rng: &mut StdRng, verbose: bool) -> Result<MutationEvent> {
    let count = root.node_count();
    if count == 0 {
        return Err(BlocknasError::Other("tree has no mutatable nodes".to_string()));
    }
    let index = rng.gen_range(0..count);
    let event = root.mutate_node(index, rng)?;
    if verbose {
        match &event.outcome {
            Some(outcome) => tracing::debug!(
                node = %event.node,
                field = outcome.field,
                before = %outcome.before,
                after = %outcome.after,
                "mutated node"
            ),
            None => tracing::debug!(node = %event.node, "mutation was a no-op"),
        }
    }
    let input = root.input_shape().clone();
    root.propagate_shape(input)?;
    if !root.validate(true)? {
        return Err(BlocknasError::Other(
            "tree failed to re-validate after mutation".to_string(),
        ));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer_block::LayerBlock;
    use rand::SeedableRng;

    struct PlainBlock {
        body: BlockBody,
    }

    impl Composite for PlainBlock {
        fn body(&self) -> &BlockBody {
            &self.body
        }

        fn body_mut(&mut self) -> &mut BlockBody {
            &mut self.body
        }

        fn tag(&self) -> &'static str {
            "plain"
        }
    }

    impl_block_via_composite!(PlainBlock);

    fn conv_chain(rng: &mut StdRng) -> PlainBlock {
        let input = Shape::from([28, 28, 1]);
        let mut body = BlockBody::new(input.clone());
        let first = LayerBlock::random_conv2d(&input, rng).unwrap();
        let second = LayerBlock::random_max_pool(&first.output_shape(), rng).unwrap();
        body.input_blocks.push(Box::new(first));
        body.middle_blocks.push(Box::new(second));
        PlainBlock { body }
    }

    #[test]
    fn test_chain_consistency_after_generation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut block = conv_chain(&mut rng);
        assert!(block.validate(true).unwrap());
        assert!(block.body.chain_consistent());
    }

    #[test]
    fn test_output_shape_is_last_child() {
        let mut rng = StdRng::seed_from_u64(1);
        let block = conv_chain(&mut rng);
        let last = block.body.middle_blocks.last().unwrap().output_shape();
        assert_eq!(block.output_shape(), last);
    }

    #[test]
    fn test_propagate_rethreads_shapes() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut block = conv_chain(&mut rng);
        block.propagate_shape(Shape::from([32, 32, 1])).unwrap();
        assert_eq!(block.input_shape(), &Shape::from([32, 32, 1]));
        assert!(block.body.chain_consistent());
    }

    #[test]
    fn test_node_count_counts_leaves() {
        let mut rng = StdRng::seed_from_u64(3);
        let block = conv_chain(&mut rng);
        assert_eq!(block.node_count(), 2);
    }

    #[test]
    fn test_mutate_tree_preserves_validity() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut block = conv_chain(&mut rng);
        block.validate(true).unwrap();
        for _ in 0..50 {
            mutate_tree(&mut block, &mut rng, false).unwrap();
            assert!(block.validate(false).unwrap());
        }
    }

    #[test]
    fn test_mutation_does_not_change_roles() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut block = conv_chain(&mut rng);
        block.validate(true).unwrap();
        let roles: Vec<&str> = block.body.children().map(|c| c.role()).collect();
        for _ in 0..20 {
            mutate_tree(&mut block, &mut rng, false).unwrap();
        }
        let after: Vec<&str> = block.body.children().map(|c| c.role()).collect();
        assert_eq!(roles, after);
    }

    #[test]
    fn test_validate_idempotent_on_valid_tree() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut block = conv_chain(&mut rng);
        assert!(block.validate(true).unwrap());
        let before: Vec<Shape> = block.body.children().map(|c| c.output_shape()).collect();
        assert!(block.validate(true).unwrap());
        let after: Vec<Shape> = block.body.children().map(|c| c.output_shape()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_generate_respects_arity_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let body = BlockBody::generate(
                Shape::from([28, 28, 1]),
                3,
                &mut rng,
                |_| (),
                |_, _| Ok(vec![]),
                |shape, _tag, rng| {
                    Ok(vec![Box::new(LayerBlock::random_conv2d(shape, rng)?) as Box<dyn Block>])
                },
                |_, _| Ok(vec![]),
            )
            .unwrap();
            assert!(body.middle_blocks.len() <= 3);
        }
    }

    #[test]
    fn test_collect_units_in_order() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut block = conv_chain(&mut rng);
        block.validate(true).unwrap();
        let mut units = Vec::new();
        block.collect_units(&mut units);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].input_shape, Shape::from([28, 28, 1]));
        assert_eq!(units[1].input_shape, units[0].output_shape);
    }
}
