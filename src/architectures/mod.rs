//! Concrete block templates and ready-to-search architectures.
//!
//! Each template fixes a closed sub-block vocabulary and the constrained
//! input/output structure of one family; generation randomizes everything
//! inside those bounds.

pub mod classification;
pub mod effnet;
pub mod residual;
pub mod shufflenet;
pub mod squeeze_expansion;
pub mod zfnet;

pub use classification::{
    ClassificationArchitecture, ClassificationBlock, ClassificationStage, ClassificationSubBlock,
    FeatureExtractionBlock, FeatureSubBlock,
};
pub use effnet::{EffNetArchitecture, EffNetBlock, EffNetSubBlock};
pub use residual::{ResidualBlock, ResidualSubBlock};
pub use shufflenet::{ShuffleNetBlock, ShuffleNetSubBlock};
pub use squeeze_expansion::{SqueezeExpansionArchitecture, SqueezeExpansionBlock};
pub use zfnet::{ZFNetArchitecture, ZFNetBlock, ZFNetSubBlock};
