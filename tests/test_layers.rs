//! Integration tests for layer shape inference, validation and mutation.
//!
//! These exercise the Layer API the way the tree machinery drives it:
//! construct, re-thread input shapes, mutate, and rely on repair to keep
//! every layer structurally legal.

use blocknas::layer::{
    Activation, Conv2DParams, DenseParams, DenseRole, Layer, LayerKind, MaxPool2DParams, Padding,
    ReshapeParams, MAX_FILTER_COUNT, MAX_KERNEL_DIMENSION, MAX_STRIDE,
};
use blocknas::mutation::{mutate_int, mutate_tuple, MutationOp};
use blocknas::Shape;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn conv(
    filters: usize,
    kernel: (usize, usize),
    strides: (usize, usize),
    padding: Padding,
    input: Shape,
) -> Layer {
    Layer::new(
        LayerKind::Conv2D(Conv2DParams {
            filters,
            kernel_size: kernel,
            strides,
            padding,
            dilation_rate: (1, 1),
            activation: Activation::ReLU,
        }),
        input,
    )
    .unwrap()
}

#[test]
fn test_conv_same_padding_reference_shapes() {
    let layer = conv(16, (3, 3), (1, 1), Padding::Same, Shape::from([32, 32, 3]));
    assert_eq!(layer.output_shape(), &Shape::from([32, 32, 16]));

    let layer = conv(16, (5, 5), (1, 1), Padding::Same, Shape::from([32, 32, 3]));
    assert_eq!(layer.output_shape(), &Shape::from([32, 32, 16]));
}

#[test]
fn test_conv_valid_padding_reference_shapes() {
    let layer = conv(8, (3, 3), (2, 2), Padding::Valid, Shape::from([10, 10, 3]));
    assert_eq!(layer.output_shape(), &Shape::from([4, 4, 8]));

    let layer = conv(8, (3, 3), (1, 1), Padding::Valid, Shape::from([10, 10, 3]));
    assert_eq!(layer.output_shape(), &Shape::from([8, 8, 8]));
}

#[test]
fn test_layer_chain_shapes_compose() {
    // conv -> pool -> flatten -> dense, threading shapes by hand the way a
    // block does.
    let conv = conv(16, (3, 3), (1, 1), Padding::Same, Shape::from([28, 28, 1]));
    let pool = Layer::new(
        LayerKind::MaxPool2D(MaxPool2DParams {
            pool_size: (2, 2),
            strides: (2, 2),
            padding: Padding::Valid,
        }),
        conv.output_shape().clone(),
    )
    .unwrap();
    let flatten = Layer::new(LayerKind::Flatten, pool.output_shape().clone()).unwrap();
    let dense = Layer::new(
        LayerKind::Dense(DenseParams {
            units: 10,
            activation: Activation::Softmax,
            role: DenseRole::Output,
        }),
        flatten.output_shape().clone(),
    )
    .unwrap();

    assert_eq!(pool.output_shape(), &Shape::from([14, 14, 16]));
    assert_eq!(flatten.output_shape(), &Shape::from([3136]));
    assert_eq!(dense.output_shape(), &Shape::from([10]));
}

#[test]
fn test_rethreading_input_keeps_layer_valid() {
    let mut layer = conv(16, (5, 5), (1, 1), Padding::Valid, Shape::from([28, 28, 1]));
    for dim in [20, 12, 6, 3, 1] {
        layer.set_input_shape(Shape::from([dim, dim, 1]));
        assert!(layer.validate(true).unwrap());
        assert!(layer.output_shape().is_positive());
    }
}

#[test]
fn test_reshape_tracks_upstream_magnitude() {
    let mut layer = Layer::new(
        LayerKind::Reshape(ReshapeParams { target_shape: Shape::from([2, 392]) }),
        Shape::from([28, 28, 1]),
    )
    .unwrap();
    layer.set_input_shape(Shape::from([10, 10, 3]));
    assert!(layer.validate(true).unwrap());
    assert_eq!(layer.output_shape().magnitude(), 300);
}

#[test]
fn test_mutation_sequence_never_breaks_repairable_layer() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut layer = conv(16, (3, 3), (1, 1), Padding::Same, Shape::from([28, 28, 1]));
    for _ in 0..500 {
        layer.mutate(&mut rng);
        assert!(layer.validate(true).unwrap());
        assert!(layer.output_shape().is_positive());
    }
}

proptest! {
    #[test]
    fn prop_mutate_int_stays_in_bounds(
        value in 1usize..=MAX_FILTER_COUNT,
        seed in 0u64..1000,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let next = mutate_int(value, 1, MAX_FILTER_COUNT, MutationOp::Step, &mut rng);
        prop_assert!((1..=MAX_FILTER_COUNT).contains(&next));
        prop_assert!(next.abs_diff(value) <= 1);
    }

    #[test]
    fn prop_mutate_tuple_sync_keeps_square_pairs_square(
        k in 1usize..=MAX_KERNEL_DIMENSION,
        seed in 0u64..1000,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (a, b) = mutate_tuple((k, k), 1, MAX_KERNEL_DIMENSION, MutationOp::SyncStep, &mut rng);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_conv_new_always_valid(
        filters in 1usize..=MAX_FILTER_COUNT,
        kernel in 1usize..=MAX_KERNEL_DIMENSION,
        stride in 1usize..=MAX_STRIDE,
        dim in 4usize..=64,
        same in any::<bool>(),
    ) {
        let padding = if same { Padding::Same } else { Padding::Valid };
        let layer = conv(filters, (kernel, kernel), (stride, stride), padding, Shape::from([dim, dim, 3]));
        prop_assert!(layer.output_shape().is_positive());
        prop_assert_eq!(layer.output_shape().dim(2), filters);
    }

    #[test]
    fn prop_flatten_preserves_magnitude(
        a in 1usize..=32,
        b in 1usize..=32,
        c in 1usize..=8,
    ) {
        let input = Shape::from([a, b, c]);
        let layer = Layer::new(LayerKind::Flatten, input.clone()).unwrap();
        prop_assert_eq!(layer.output_shape().magnitude(), input.magnitude());
        prop_assert_eq!(layer.output_shape().rank(), 1);
    }

    #[test]
    fn prop_random_refactor_preserves_magnitude(
        a in 1usize..=32,
        b in 1usize..=32,
        c in 1usize..=8,
        seed in 0u64..1000,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let input = Shape::from([a, b, c]);
        let target = input.random_refactor(&mut rng);
        prop_assert_eq!(target.magnitude(), input.magnitude());
        prop_assert!(target.is_positive());
        prop_assert!((1..=3).contains(&target.rank()));
    }
}
