//! Pass configuration.
//!
//! Configuration is an explicit value handed to a pass at construction.
//! Passes never consult ambient global state; a build that wants to isolate
//! one pattern family's performance effect constructs the pass with a mask
//! containing only that family's bit.

use bitflags::bitflags;

/// Shader stage of the function being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Compute,
    Pixel,
}

bitflags! {
    /// Per-family enable bits for the early-out pattern matchers.
    ///
    /// Each bit toggles one pattern family on or off. Some families only
    /// apply to one shader stage; [`EarlyOutConfig::effective_patterns`]
    /// intersects the mask with the stage's supported set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatternMask: u8 {
        /// Texture-sample-extract family.
        const SAMPLE = 1 << 0;
        /// Dot product feeding a max-to-zero reduction.
        const DOT_MAX = 1 << 1;
        /// Dot product feeding a saturating clamp.
        const DOT_SATURATE = 1 << 2;
        /// N-dot-L lighting chain.
        const NDOTL = 1 << 3;
        /// Direct render-target output (pixel shaders only).
        const DIRECT_OUTPUT = 1 << 4;
        /// Squared-multiply feeding per-channel max-to-zero (pixel only).
        const MUL_MAX = 1 << 5;
        /// Select guarded by a compare against zero (compute only).
        const SELECT_CMP = 1 << 6;
    }
}

/// Configuration for the early-out pass.
#[derive(Debug, Clone, Copy)]
pub struct EarlyOutConfig {
    /// Shader stage of the functions this pass instance will process.
    pub stage: ShaderStage,
    /// Requested pattern families.
    pub patterns: PatternMask,
}

impl EarlyOutConfig {
    /// Configuration with every family the stage supports enabled.
    pub fn new(stage: ShaderStage) -> Self {
        EarlyOutConfig { stage, patterns: PatternMask::all() }
    }

    /// The requested mask restricted to families valid for the stage.
    pub fn effective_patterns(&self) -> PatternMask {
        let supported = match self.stage {
            ShaderStage::Compute => {
                PatternMask::SAMPLE
                    | PatternMask::DOT_MAX
                    | PatternMask::DOT_SATURATE
                    | PatternMask::NDOTL
                    | PatternMask::SELECT_CMP
            }
            ShaderStage::Pixel => {
                PatternMask::SAMPLE
                    | PatternMask::DOT_MAX
                    | PatternMask::DOT_SATURATE
                    | PatternMask::NDOTL
                    | PatternMask::DIRECT_OUTPUT
                    | PatternMask::MUL_MAX
            }
        };
        self.patterns & supported
    }
}
