//! Layer - the leaf unit of an architecture tree.
//!
//! A [`Layer`] encapsulates one transform: its parameters, its
//! shape-inference formula, its own-parameter mutation and a
//! validate/repair pair scoped to itself. Layers have no visibility into
//! sibling layers; arrangement constraints are enforced one level up, at
//! block level.
//!
//! Layer kinds form a closed sum type ([`LayerKind`]), so dispatch over
//! kinds is exhaustive-match rather than run-time tag lookup, and a search
//! space cannot request a kind that does not exist.
//!
//! # Shape contracts
//!
//! | Kind                | Output shape                                        |
//! |---------------------|-----------------------------------------------------|
//! | Conv2D (same)       | `ceil(in / stride)` per spatial dim, filters chans  |
//! | Conv2D (valid)      | `floor((in - kernel) / stride) + 1`, filters chans  |
//! | DepthwiseConv2D     | as Conv2D, channel count preserved                  |
//! | MaxPool2D           | as Conv2D with pool size, channels preserved        |
//! | GlobalAveragePool2D | `(channels,)`                                       |
//! | Reshape             | the configured target shape                         |
//! | Flatten             | `(magnitude(in),)`                                  |
//! | Dense               | `(units,)`, requires rank-1 input                   |
//! | Dropout             | unchanged                                           |
//!
//! # Examples
//!
//! ```
//! use blocknas::layer::{Conv2DParams, Layer, LayerKind, Padding, Activation};
//! use blocknas::Shape;
//!
//! let conv = Layer::new(
//!     LayerKind::Conv2D(Conv2DParams {
//!         filters: 16,
//!         kernel_size: (3, 3),
//!         strides: (1, 1),
//!         padding: Padding::Same,
//!         dilation_rate: (1, 1),
//!         activation: Activation::ReLU,
//!     }),
//!     Shape::from([32, 32, 3]),
//! )
//! .unwrap();
//! assert_eq!(conv.output_shape(), &Shape::from([32, 32, 16]));
//! ```

use crate::mutation::{mutate_choice, mutate_int, mutate_tuple, mutate_unit_interval, MutationOp};
use crate::shape::Shape;
use crate::{BlocknasError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on repair iterations before a validation pass gives up with
/// [`BlocknasError::RepairDivergence`].
pub const MAX_REPAIR_ITERATIONS: usize = 8;

/// Largest filter count a convolution may mutate to.
pub const MAX_FILTER_COUNT: usize = 128;
/// Largest kernel dimension for convolutions.
pub const MAX_KERNEL_DIMENSION: usize = 7;
/// Largest stride for convolutions and pools.
pub const MAX_STRIDE: usize = 7;
/// Largest dilation rate for convolutions.
pub const MAX_DILATION: usize = 5;
/// Largest pool dimension for max pooling.
pub const MAX_POOL_SIZE: usize = 7;
/// Largest unit count for hidden dense layers.
pub const MAX_DENSE_UNITS: usize = 256;
/// Largest dropout rate.
pub const MAX_DROPOUT_RATE: f64 = 0.5;

/// Spatial padding policy for convolutions and pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Padding {
    /// Output spatial dims are `ceil(in / stride)`.
    Same,
    /// Output spatial dims are `floor((in - window) / stride) + 1`.
    Valid,
}

impl Padding {
    /// Closed variant table for enum mutation.
    pub const ALL: [Padding; 2] = [Padding::Same, Padding::Valid];

    /// Backend-facing name.
    pub fn name(&self) -> &'static str {
        match self {
            Padding::Same => "same",
            Padding::Valid => "valid",
        }
    }
}

/// Activation function attached to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Softmax,
    Tanh,
}

impl Activation {
    /// Closed variant table for enum mutation.
    pub const ALL: [Activation; 4] = [
        Activation::ReLU,
        Activation::Sigmoid,
        Activation::Softmax,
        Activation::Tanh,
    ];

    /// Backend-facing name.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Softmax => "softmax",
            Activation::Tanh => "tanh",
        }
    }
}

/// Whether a dense layer is a hidden unit or the classifier head.
///
/// Output dense layers never mutate their unit count: it is pinned to the
/// architecture's class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenseRole {
    Hidden,
    Output,
}

/// Parameters of a standard 2D convolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2DParams {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    pub dilation_rate: (usize, usize),
    pub activation: Activation,
}

/// Parameters of a depthwise 2D convolution (channel count preserved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthwiseConv2DParams {
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    pub activation: Activation,
}

/// Parameters of a 2D max pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPool2DParams {
    pub pool_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
}

/// Parameters of a reshape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshapeParams {
    pub target_shape: Shape,
}

/// Parameters of a dense (fully connected) layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    pub units: usize,
    pub activation: Activation,
    pub role: DenseRole,
}

/// Parameters of a dropout layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutParams {
    pub rate: f64,
}

/// The closed set of layer kinds the framework can place in a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    Conv2D(Conv2DParams),
    DepthwiseConv2D(DepthwiseConv2DParams),
    MaxPool2D(MaxPool2DParams),
    GlobalAveragePool2D,
    Reshape(ReshapeParams),
    Flatten,
    Dense(DenseParams),
    Dropout(DropoutParams),
}

impl LayerKind {
    /// Human-readable kind tag.
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Conv2D(_) => "Conv2D",
            LayerKind::DepthwiseConv2D(_) => "DepthwiseConv2D",
            LayerKind::MaxPool2D(_) => "MaxPool2D",
            LayerKind::GlobalAveragePool2D => "GlobalAveragePool2D",
            LayerKind::Reshape(_) => "Reshape",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense(_) => "Dense",
            LayerKind::Dropout(_) => "Dropout",
        }
    }
}

/// Report of a single applied parameter mutation, for observability.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Name of the mutated parameter.
    pub field: &'static str,
    /// Parameter value before the mutation.
    pub before: String,
    /// Parameter value after the mutation.
    pub after: String,
}

/// A named, parameterized leaf transform with declared input and output
/// shapes.
///
/// The output shape is always a pure function of the input shape and the
/// kind's parameters; it is recomputed at construction, after every
/// mutation, after every repair and whenever the input shape is re-threaded
/// from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    kind: LayerKind,
    input_shape: Shape,
    output_shape: Shape,
}

/// `floor((in - window) / stride) + 1`, zero when the window does not fit.
fn valid_pad_dim(input: usize, window: usize, stride: usize) -> usize {
    if input < window || stride == 0 {
        0
    } else {
        (input - window) / stride + 1
    }
}

/// `ceil(in / stride)` computed as `((in - 1) / stride) + 1`.
fn same_pad_dim(input: usize, stride: usize) -> usize {
    if input == 0 || stride == 0 {
        0
    } else {
        (input - 1) / stride + 1
    }
}

fn pair_positive(pair: (usize, usize)) -> bool {
    pair.0 > 0 && pair.1 > 0
}

fn pair_is_unit(pair: (usize, usize)) -> bool {
    pair.0 == 1 && pair.1 == 1
}

fn clamp_pair_min_one(pair: (usize, usize)) -> (usize, usize) {
    (pair.0.max(1), pair.1.max(1))
}

impl Layer {
    /// Create a layer and immediately validate it with repair.
    ///
    /// # Errors
    ///
    /// Returns [`BlocknasError::RepairDivergence`] when the kind cannot be
    /// made valid for the given input shape by local repair (for example a
    /// dense layer fed a rank-3 tensor: only an upstream flatten can fix
    /// that).
    pub fn new(kind: LayerKind, input_shape: Shape) -> Result<Self> {
        let mut layer = Layer {
            kind,
            output_shape: Shape::new(vec![]),
            input_shape,
        };
        layer.refresh_output_shape();
        layer.validate(true)?;
        Ok(layer)
    }

    /// The layer's kind and parameters.
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Mutable access to the kind, for block-level repairs that must adjust
    /// leaf parameters (e.g. a residual block restoring identity shape).
    /// Callers must follow up with [`Layer::refresh_output_shape`].
    pub fn kind_mut(&mut self) -> &mut LayerKind {
        &mut self.kind
    }

    /// Declared input shape.
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Derived output shape.
    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    /// Re-thread the input shape from upstream and re-derive the output.
    pub fn set_input_shape(&mut self, shape: Shape) {
        self.input_shape = shape;
        self.refresh_output_shape();
    }

    /// Recompute `output_shape` from `(input_shape, kind)`.
    pub fn refresh_output_shape(&mut self) {
        self.output_shape = self.infer_output_shape();
    }

    fn infer_output_shape(&self) -> Shape {
        let input = &self.input_shape;
        match &self.kind {
            LayerKind::Conv2D(p) => {
                if input.rank() != 3 {
                    return Shape::new(vec![]);
                }
                let (x, y) = match p.padding {
                    Padding::Same => (
                        same_pad_dim(input.dim(0), p.strides.0),
                        same_pad_dim(input.dim(1), p.strides.1),
                    ),
                    Padding::Valid => (
                        valid_pad_dim(input.dim(0), p.kernel_size.0, p.strides.0),
                        valid_pad_dim(input.dim(1), p.kernel_size.1, p.strides.1),
                    ),
                };
                Shape::from([x, y, p.filters])
            }
            LayerKind::DepthwiseConv2D(p) => {
                if input.rank() != 3 {
                    return Shape::new(vec![]);
                }
                let (x, y) = match p.padding {
                    Padding::Same => (
                        same_pad_dim(input.dim(0), p.strides.0),
                        same_pad_dim(input.dim(1), p.strides.1),
                    ),
                    Padding::Valid => (
                        valid_pad_dim(input.dim(0), p.kernel_size.0, p.strides.0),
                        valid_pad_dim(input.dim(1), p.kernel_size.1, p.strides.1),
                    ),
                };
                Shape::from([x, y, input.dim(2)])
            }
            LayerKind::MaxPool2D(p) => {
                if input.rank() != 3 {
                    return Shape::new(vec![]);
                }
                let (x, y) = match p.padding {
                    Padding::Same => (
                        same_pad_dim(input.dim(0), p.strides.0),
                        same_pad_dim(input.dim(1), p.strides.1),
                    ),
                    Padding::Valid => (
                        valid_pad_dim(input.dim(0), p.pool_size.0, p.strides.0),
                        valid_pad_dim(input.dim(1), p.pool_size.1, p.strides.1),
                    ),
                };
                Shape::from([x, y, input.dim(2)])
            }
            LayerKind::GlobalAveragePool2D => {
                if input.rank() != 3 {
                    return Shape::new(vec![]);
                }
                Shape::from([input.dim(2)])
            }
            LayerKind::Reshape(p) => p.target_shape.clone(),
            LayerKind::Flatten => Shape::from([input.magnitude()]),
            LayerKind::Dense(p) => Shape::from([p.units]),
            LayerKind::Dropout(_) => input.clone(),
        }
    }

    /// Kind-specific structural legality, with no repair applied.
    fn is_valid(&self) -> bool {
        let input = &self.input_shape;
        match &self.kind {
            LayerKind::Conv2D(p) => {
                input.rank() == 3
                    && input.is_positive()
                    && p.filters > 0
                    && pair_positive(p.kernel_size)
                    && pair_positive(p.strides)
                    && pair_positive(p.dilation_rate)
                    && (pair_is_unit(p.strides) || pair_is_unit(p.dilation_rate))
                    && self.infer_output_shape().is_positive()
            }
            LayerKind::DepthwiseConv2D(p) => {
                input.rank() == 3
                    && input.is_positive()
                    && pair_positive(p.kernel_size)
                    && pair_positive(p.strides)
                    && self.infer_output_shape().is_positive()
            }
            LayerKind::MaxPool2D(p) => {
                input.rank() == 3
                    && input.is_positive()
                    && pair_positive(p.pool_size)
                    && pair_positive(p.strides)
                    && self.infer_output_shape().is_positive()
            }
            LayerKind::GlobalAveragePool2D => input.rank() == 3 && input.is_positive(),
            LayerKind::Reshape(p) => {
                input.is_positive()
                    && p.target_shape.is_positive()
                    && input.magnitude() == p.target_shape.magnitude()
            }
            LayerKind::Flatten => input.is_positive(),
            LayerKind::Dense(p) => input.rank() == 1 && input.is_positive() && p.units > 0,
            LayerKind::Dropout(p) => (0.0..=MAX_DROPOUT_RATE).contains(&p.rate),
        }
    }

    /// Check structural legality; optionally repair until valid.
    ///
    /// With `repair` set, [`Layer::repair`] is applied until the layer
    /// validates, bounded by [`MAX_REPAIR_ITERATIONS`].
    ///
    /// # Errors
    ///
    /// [`BlocknasError::RepairDivergence`] when the bound is exceeded.
    pub fn validate(&mut self, repair: bool) -> Result<bool> {
        if self.is_valid() {
            return Ok(true);
        }
        if !repair {
            return Ok(false);
        }
        for _ in 0..MAX_REPAIR_ITERATIONS {
            self.repair();
            self.refresh_output_shape();
            if self.is_valid() {
                return Ok(true);
            }
        }
        Err(BlocknasError::RepairDivergence {
            node: self.to_string(),
            iterations: MAX_REPAIR_ITERATIONS,
        })
    }

    /// Kind-specific local fix.
    ///
    /// Each call moves the layer strictly closer to validity for every
    /// defect it can address locally. Defects that require sibling context
    /// (a dense layer with rank != 1 input) are deliberately left alone.
    pub fn repair(&mut self) {
        let input = self.input_shape.clone();
        match &mut self.kind {
            LayerKind::Conv2D(p) => {
                p.filters = p.filters.max(1);
                p.kernel_size = clamp_pair_min_one(p.kernel_size);
                p.strides = clamp_pair_min_one(p.strides);
                p.dilation_rate = clamp_pair_min_one(p.dilation_rate);
                if !pair_is_unit(p.strides) && !pair_is_unit(p.dilation_rate) {
                    p.dilation_rate = (1, 1);
                }
                // A valid-padded kernel larger than the input produces an
                // empty output; shrink the window to fit.
                if p.padding == Padding::Valid && input.rank() == 3 {
                    p.kernel_size.0 = p.kernel_size.0.min(input.dim(0).max(1));
                    p.kernel_size.1 = p.kernel_size.1.min(input.dim(1).max(1));
                }
            }
            LayerKind::DepthwiseConv2D(p) => {
                p.kernel_size = clamp_pair_min_one(p.kernel_size);
                p.strides = clamp_pair_min_one(p.strides);
                if p.padding == Padding::Valid && input.rank() == 3 {
                    p.kernel_size.0 = p.kernel_size.0.min(input.dim(0).max(1));
                    p.kernel_size.1 = p.kernel_size.1.min(input.dim(1).max(1));
                }
            }
            LayerKind::MaxPool2D(p) => {
                p.strides = clamp_pair_min_one(p.strides);
                p.pool_size = clamp_pair_min_one(p.pool_size);
                if p.padding == Padding::Valid && input.rank() == 3 {
                    p.pool_size.0 = p.pool_size.0.min(input.dim(0).max(1));
                    p.pool_size.1 = p.pool_size.1.min(input.dim(1).max(1));
                }
            }
            LayerKind::GlobalAveragePool2D => {}
            LayerKind::Reshape(p) => {
                // Pull the target back in line with the upstream magnitude.
                p.target_shape = input;
            }
            LayerKind::Flatten => {}
            LayerKind::Dense(p) => {
                p.units = p.units.max(1);
            }
            LayerKind::Dropout(p) => {
                p.rate = p.rate.clamp(0.0, MAX_DROPOUT_RATE);
            }
        }
    }

    /// Perturb one uniformly chosen mutatable parameter.
    ///
    /// Returns `None` for kinds with no mutatable parameters (flatten,
    /// global average pool). The output shape is re-derived afterwards;
    /// callers are responsible for tree-wide re-validation.
    pub fn mutate<R: Rng>(&mut self, rng: &mut R) -> Option<MutationOutcome> {
        let input = self.input_shape.clone();
        let outcome = match &mut self.kind {
            LayerKind::Conv2D(p) => {
                const FIELDS: [&str; 6] = [
                    "filters",
                    "kernel_size",
                    "strides",
                    "padding",
                    "dilation_rate",
                    "activation",
                ];
                let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                match field {
                    "filters" => {
                        let before = p.filters.to_string();
                        p.filters =
                            mutate_int(p.filters, 1, MAX_FILTER_COUNT, MutationOp::Step, rng);
                        Some(MutationOutcome { field, before, after: p.filters.to_string() })
                    }
                    "kernel_size" => {
                        let before = format!("{:?}", p.kernel_size);
                        p.kernel_size = mutate_tuple(
                            p.kernel_size,
                            1,
                            MAX_KERNEL_DIMENSION,
                            MutationOp::SyncStep,
                            rng,
                        );
                        Some(MutationOutcome { field, before, after: format!("{:?}", p.kernel_size) })
                    }
                    "strides" => {
                        let before = format!("{:?}", p.strides);
                        p.strides =
                            mutate_tuple(p.strides, 1, MAX_STRIDE, MutationOp::SyncStep, rng);
                        Some(MutationOutcome { field, before, after: format!("{:?}", p.strides) })
                    }
                    "padding" => {
                        let before = p.padding.name().to_string();
                        p.padding = mutate_choice(p.padding, &Padding::ALL, rng);
                        Some(MutationOutcome { field, before, after: p.padding.name().to_string() })
                    }
                    "dilation_rate" => {
                        let before = format!("{:?}", p.dilation_rate);
                        p.dilation_rate = mutate_tuple(
                            p.dilation_rate,
                            1,
                            MAX_DILATION,
                            MutationOp::SyncStep,
                            rng,
                        );
                        Some(MutationOutcome {
                            field,
                            before,
                            after: format!("{:?}", p.dilation_rate),
                        })
                    }
                    _ => {
                        let before = p.activation.name().to_string();
                        p.activation = mutate_choice(p.activation, &Activation::ALL, rng);
                        Some(MutationOutcome {
                            field: "activation",
                            before,
                            after: p.activation.name().to_string(),
                        })
                    }
                }
            }
            LayerKind::DepthwiseConv2D(p) => {
                const FIELDS: [&str; 4] = ["kernel_size", "strides", "padding", "activation"];
                let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                match field {
                    "kernel_size" => {
                        let before = format!("{:?}", p.kernel_size);
                        p.kernel_size = mutate_tuple(
                            p.kernel_size,
                            1,
                            MAX_KERNEL_DIMENSION,
                            MutationOp::SyncStep,
                            rng,
                        );
                        Some(MutationOutcome { field, before, after: format!("{:?}", p.kernel_size) })
                    }
                    "strides" => {
                        let before = format!("{:?}", p.strides);
                        p.strides =
                            mutate_tuple(p.strides, 1, MAX_STRIDE, MutationOp::SyncStep, rng);
                        Some(MutationOutcome { field, before, after: format!("{:?}", p.strides) })
                    }
                    "padding" => {
                        let before = p.padding.name().to_string();
                        p.padding = mutate_choice(p.padding, &Padding::ALL, rng);
                        Some(MutationOutcome { field, before, after: p.padding.name().to_string() })
                    }
                    _ => {
                        let before = p.activation.name().to_string();
                        p.activation = mutate_choice(p.activation, &Activation::ALL, rng);
                        Some(MutationOutcome {
                            field: "activation",
                            before,
                            after: p.activation.name().to_string(),
                        })
                    }
                }
            }
            LayerKind::MaxPool2D(p) => {
                const FIELDS: [&str; 2] = ["pool_size", "strides"];
                let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                match field {
                    "pool_size" => {
                        let before = format!("{:?}", p.pool_size);
                        p.pool_size =
                            mutate_tuple(p.pool_size, 1, MAX_POOL_SIZE, MutationOp::SyncStep, rng);
                        Some(MutationOutcome { field, before, after: format!("{:?}", p.pool_size) })
                    }
                    _ => {
                        let before = format!("{:?}", p.strides);
                        p.strides =
                            mutate_tuple(p.strides, 1, MAX_STRIDE, MutationOp::SyncStep, rng);
                        Some(MutationOutcome {
                            field: "strides",
                            before,
                            after: format!("{:?}", p.strides),
                        })
                    }
                }
            }
            LayerKind::GlobalAveragePool2D => None,
            LayerKind::Reshape(p) => {
                let before = p.target_shape.to_string();
                p.target_shape = input.random_refactor(rng);
                Some(MutationOutcome {
                    field: "target_shape",
                    before,
                    after: p.target_shape.to_string(),
                })
            }
            LayerKind::Flatten => None,
            LayerKind::Dense(p) => match p.role {
                DenseRole::Hidden => {
                    const FIELDS: [&str; 2] = ["units", "activation"];
                    let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                    match field {
                        "units" => {
                            let before = p.units.to_string();
                            p.units =
                                mutate_int(p.units, 1, MAX_DENSE_UNITS, MutationOp::Step, rng);
                            Some(MutationOutcome { field, before, after: p.units.to_string() })
                        }
                        _ => {
                            let before = p.activation.name().to_string();
                            p.activation = mutate_choice(p.activation, &Activation::ALL, rng);
                            Some(MutationOutcome {
                                field: "activation",
                                before,
                                after: p.activation.name().to_string(),
                            })
                        }
                    }
                }
                // Class count is owned by the architecture; only the
                // activation of the head may move.
                DenseRole::Output => {
                    let before = p.activation.name().to_string();
                    p.activation = mutate_choice(p.activation, &Activation::ALL, rng);
                    Some(MutationOutcome {
                        field: "activation",
                        before,
                        after: p.activation.name().to_string(),
                    })
                }
            },
            LayerKind::Dropout(p) => {
                let before = format!("{:.3}", p.rate);
                p.rate = mutate_unit_interval(p.rate, 0.0, MAX_DROPOUT_RATE, rng);
                Some(MutationOutcome { field: "rate", before, after: format!("{:.3}", p.rate) })
            }
        };
        self.refresh_output_shape();
        outcome
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.kind.name(), self.input_shape, self.output_shape)
    }
}
