//! Backend-neutral executable model description and persistence.
//!
//! The core never talks to a training backend directly. Instead each
//! architecture tree flattens into a [`ModelGraph`]: an ordered sequence of
//! [`GraphUnit`]s, each a [`LayerSpec`] plus the shapes it consumes and
//! produces. An external model-building collaborator turns the graph into a
//! compiled model; this module only describes it, counts its parameters and
//! persists it.
//!
//! Backend-specific vocabulary (optimizer, loss, activation and padding
//! names) is carried as opaque strings and passed through unchanged.
//!
//! # Examples
//!
//! ```
//! use blocknas::architectures::ClassificationArchitecture;
//! use blocknas::{BlockArchitecture, Shape};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
//! let graph = arch.model_graph();
//! assert_eq!(graph.output_shape(), Shape::from([10]));
//! assert!(graph.parameter_count() > 0);
//! ```

use crate::layer::{Layer, LayerKind};
use crate::shape::Shape;
use crate::{BlocknasError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One executable unit in backend-neutral form.
///
/// Mirrors [`LayerKind`](crate::layer::LayerKind) with enum parameters
/// lowered to their backend-facing string names. `AddSkip` composes a
/// nested unit sequence whose output is added to its input (residual
/// connection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerSpec {
    Conv2D {
        filters: usize,
        kernel_size: (usize, usize),
        strides: (usize, usize),
        padding: String,
        dilation_rate: (usize, usize),
        activation: String,
    },
    DepthwiseConv2D {
        kernel_size: (usize, usize),
        strides: (usize, usize),
        padding: String,
        activation: String,
    },
    MaxPool2D {
        pool_size: (usize, usize),
        strides: (usize, usize),
        padding: String,
    },
    GlobalAveragePool2D,
    Reshape {
        target_shape: Vec<usize>,
    },
    Flatten,
    Dense {
        units: usize,
        activation: String,
    },
    Dropout {
        rate: f64,
    },
    AddSkip {
        units: Vec<GraphUnit>,
    },
}

impl LayerSpec {
    /// Human-readable unit tag.
    pub fn name(&self) -> &'static str {
        match self {
            LayerSpec::Conv2D { .. } => "Conv2D",
            LayerSpec::DepthwiseConv2D { .. } => "DepthwiseConv2D",
            LayerSpec::MaxPool2D { .. } => "MaxPool2D",
            LayerSpec::GlobalAveragePool2D => "GlobalAveragePool2D",
            LayerSpec::Reshape { .. } => "Reshape",
            LayerSpec::Flatten => "Flatten",
            LayerSpec::Dense { .. } => "Dense",
            LayerSpec::Dropout { .. } => "Dropout",
            LayerSpec::AddSkip { .. } => "AddSkip",
        }
    }
}

/// A [`LayerSpec`] with the shapes it consumes and produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUnit {
    pub spec: LayerSpec,
    pub input_shape: Shape,
    pub output_shape: Shape,
}

impl GraphUnit {
    /// Trainable parameter count of this unit.
    ///
    /// Weight and bias counts follow the standard formulas:
    /// convolution `(kh * kw * c_in + 1) * filters`, depthwise convolution
    /// `(kh * kw + 1) * c_in`, dense `(in + 1) * units`. Shape-only units
    /// carry no parameters.
    pub fn parameter_count(&self) -> u64 {
        match &self.spec {
            LayerSpec::Conv2D { filters, kernel_size, .. } => {
                let c_in = self.input_shape.channels() as u64;
                ((kernel_size.0 * kernel_size.1) as u64 * c_in + 1) * *filters as u64
            }
            LayerSpec::DepthwiseConv2D { kernel_size, .. } => {
                let c_in = self.input_shape.channels() as u64;
                ((kernel_size.0 * kernel_size.1) as u64 + 1) * c_in
            }
            LayerSpec::Dense { units, .. } => {
                (self.input_shape.dim(0) as u64 + 1) * *units as u64
            }
            LayerSpec::AddSkip { units } => units.iter().map(GraphUnit::parameter_count).sum(),
            LayerSpec::MaxPool2D { .. }
            | LayerSpec::GlobalAveragePool2D
            | LayerSpec::Reshape { .. }
            | LayerSpec::Flatten
            | LayerSpec::Dropout { .. } => 0,
        }
    }
}

impl Layer {
    /// Lower this layer to its backend-neutral executable unit.
    pub fn to_spec(&self) -> LayerSpec {
        match self.kind() {
            LayerKind::Conv2D(p) => LayerSpec::Conv2D {
                filters: p.filters,
                kernel_size: p.kernel_size,
                strides: p.strides,
                padding: p.padding.name().to_string(),
                dilation_rate: p.dilation_rate,
                activation: p.activation.name().to_string(),
            },
            LayerKind::DepthwiseConv2D(p) => LayerSpec::DepthwiseConv2D {
                kernel_size: p.kernel_size,
                strides: p.strides,
                padding: p.padding.name().to_string(),
                activation: p.activation.name().to_string(),
            },
            LayerKind::MaxPool2D(p) => LayerSpec::MaxPool2D {
                pool_size: p.pool_size,
                strides: p.strides,
                padding: p.padding.name().to_string(),
            },
            LayerKind::GlobalAveragePool2D => LayerSpec::GlobalAveragePool2D,
            LayerKind::Reshape(p) => LayerSpec::Reshape {
                target_shape: p.target_shape.dims().to_vec(),
            },
            LayerKind::Flatten => LayerSpec::Flatten,
            LayerKind::Dense(p) => LayerSpec::Dense {
                units: p.units,
                activation: p.activation.name().to_string(),
            },
            LayerKind::Dropout(p) => LayerSpec::Dropout { rate: p.rate },
        }
    }

    /// Lower this layer to a [`GraphUnit`] carrying its current shapes.
    pub fn to_graph_unit(&self) -> GraphUnit {
        GraphUnit {
            spec: self.to_spec(),
            input_shape: self.input_shape().clone(),
            output_shape: self.output_shape().clone(),
        }
    }
}

/// An ordered, backend-neutral description of one candidate model.
///
/// Units appear in construction order (depth-first, left-to-right over the
/// originating tree); the external builder applies each unit to the
/// previous unit's output, seeding the first with `input_shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGraph {
    pub input_shape: Shape,
    pub units: Vec<GraphUnit>,
}

impl ModelGraph {
    /// Create a graph from an input shape and unit sequence.
    pub fn new(input_shape: Shape, units: Vec<GraphUnit>) -> Self {
        ModelGraph { input_shape, units }
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when the graph has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Output shape of the final unit, or the input shape for an empty
    /// graph.
    pub fn output_shape(&self) -> Shape {
        self.units
            .last()
            .map(|u| u.output_shape.clone())
            .unwrap_or_else(|| self.input_shape.clone())
    }

    /// Total trainable parameter count across all units.
    pub fn parameter_count(&self) -> u64 {
        self.units.iter().map(GraphUnit::parameter_count).sum()
    }

    /// Persist the graph to a file with bincode.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a graph previously written by [`ModelGraph::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let graph = bincode::deserialize_from(BufReader::new(file))?;
        Ok(graph)
    }

    /// Serialize to a JSON string (for inspection or portable exchange).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| BlocknasError::Other(e.to_string()))
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BlocknasError::Other(e.to_string()))
    }
}

impl fmt::Display for ModelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "input {}", self.input_shape)?;
        for unit in &self.units {
            writeln!(
                f,
                "{:<20} {} -> {}  params={}",
                unit.spec.name(),
                unit.input_shape,
                unit.output_shape,
                unit.parameter_count()
            )?;
        }
        write!(f, "total params={}", self.parameter_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Activation, Conv2DParams, DenseParams, DenseRole, Padding};

    fn conv_unit() -> GraphUnit {
        let layer = Layer::new(
            LayerKind::Conv2D(Conv2DParams {
                filters: 16,
                kernel_size: (3, 3),
                strides: (1, 1),
                padding: Padding::Same,
                dilation_rate: (1, 1),
                activation: Activation::ReLU,
            }),
            Shape::from([28, 28, 1]),
        )
        .unwrap();
        layer.to_graph_unit()
    }

    #[test]
    fn test_conv_parameter_count() {
        // (3 * 3 * 1 + 1) * 16 = 160
        assert_eq!(conv_unit().parameter_count(), 160);
    }

    #[test]
    fn test_dense_parameter_count() {
        let layer = Layer::new(
            LayerKind::Dense(DenseParams {
                units: 10,
                activation: Activation::Softmax,
                role: DenseRole::Output,
            }),
            Shape::from([128]),
        )
        .unwrap();
        // (128 + 1) * 10 = 1290
        assert_eq!(layer.to_graph_unit().parameter_count(), 1290);
    }

    #[test]
    fn test_shape_only_units_have_no_parameters() {
        let flatten = Layer::new(LayerKind::Flatten, Shape::from([4, 4, 2])).unwrap();
        assert_eq!(flatten.to_graph_unit().parameter_count(), 0);
    }

    #[test]
    fn test_add_skip_sums_inner_parameters() {
        let inner = vec![conv_unit(), conv_unit()];
        let unit = GraphUnit {
            spec: LayerSpec::AddSkip { units: inner },
            input_shape: Shape::from([28, 28, 1]),
            output_shape: Shape::from([28, 28, 1]),
        };
        assert_eq!(unit.parameter_count(), 320);
    }

    #[test]
    fn test_graph_output_shape() {
        let graph = ModelGraph::new(Shape::from([28, 28, 1]), vec![conv_unit()]);
        assert_eq!(graph.output_shape(), Shape::from([28, 28, 16]));

        let empty = ModelGraph::new(Shape::from([28, 28, 1]), vec![]);
        assert_eq!(empty.output_shape(), Shape::from([28, 28, 1]));
    }

    #[test]
    fn test_json_round_trip() {
        let graph = ModelGraph::new(Shape::from([28, 28, 1]), vec![conv_unit()]);
        let json = graph.to_json().unwrap();
        let restored = ModelGraph::from_json(&json).unwrap();
        assert_eq!(graph, restored);
    }

    #[test]
    fn test_display_lists_units() {
        let graph = ModelGraph::new(Shape::from([28, 28, 1]), vec![conv_unit()]);
        let text = graph.to_string();
        assert!(text.contains("Conv2D"));
        assert!(text.contains("total params=160"));
    }
}
