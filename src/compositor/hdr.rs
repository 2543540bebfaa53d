//! Per-frame HDR mode decision

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{
    config::{HdrConfig, HdrPolicy},
    layer::LayerHandle,
    utils::{Buffer as BufferCoords, Physical, Size},
};

/// Color space of layer content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    /// Standard dynamic range sRGB
    #[default]
    Srgb,
    /// Wide gamut, standard dynamic range
    DisplayP3,
    /// BT.2020 primaries with the perceptual quantizer transfer function
    Bt2020Pq,
    /// BT.2020 primaries with the hybrid log-gamma transfer function
    Bt2020Hlg,
}

impl ColorSpace {
    /// Returns true if content in this color space is high dynamic range
    pub fn is_hdr(&self) -> bool {
        matches!(self, ColorSpace::Bt2020Pq | ColorSpace::Bt2020Hlg)
    }

    /// Transfer function needed to show this color space without tone-mapping
    pub fn eotf(&self) -> Option<Eotf> {
        match self {
            ColorSpace::Bt2020Pq => Some(Eotf::PQ),
            ColorSpace::Bt2020Hlg => Some(Eotf::HLG),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Electro-optical transfer functions
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Eotf: u8 {
        /// SMPTE ST 2084
        const PQ  = 0b01;
        /// Hybrid log-gamma
        const HLG = 0b10;
    }
}

/// Static HDR metadata of content
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HdrMetadata {
    /// Maximum mastering display luminance in nits
    pub max_luminance: f32,
    /// Minimum mastering display luminance in nits
    pub min_luminance: f32,
    /// Maximum content light level in nits
    pub max_cll: f32,
    /// Maximum frame-average light level in nits
    pub max_fall: f32,
}

/// HDR support advertised by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HdrCapabilities {
    /// Supported transfer functions
    pub eotfs: Eotf,
    /// Whether the sink accepts dynamic metadata
    pub metadata: bool,
}

impl HdrCapabilities {
    /// Returns true if the sink advertises any HDR support
    pub fn is_supported(&self) -> bool {
        !self.eotfs.is_empty()
    }
}

/// Output mode of a frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum HdrMode {
    /// Standard dynamic range
    #[default]
    Sdr,
    /// HDR with a fixed transfer function
    FixedEotf(Eotf),
    /// HDR driven by content metadata
    Metadata(Eotf, HdrMetadata),
}

/// An HDR video layer considered for the decision
#[derive(Debug, Clone, Copy)]
pub struct HdrCandidate {
    /// The layer
    pub layer: LayerHandle,
    /// Color space of its content
    pub color_space: ColorSpace,
    /// Static metadata of its content
    pub metadata: Option<HdrMetadata>,
    /// Source size in buffer coordinates
    pub src: Size<f64, BufferCoords>,
    /// Visible destination size
    pub dst: Size<i32, Physical>,
}

/// Result of [`decide`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HdrDecision {
    /// Mode of the output
    pub mode: HdrMode,
    /// HDR layers that have to be tone-mapped by the software renderer
    pub demoted: SmallVec<[LayerHandle; 2]>,
}

/// Returns true if the candidate covers too little to be worth switching modes for
fn is_negligible(candidate: &HdrCandidate, output: Size<i32, Physical>, config: &HdrConfig) -> bool {
    let dst_area = candidate.dst.area();
    let src_area = candidate.src.area();
    let screen_area = output.area();
    if dst_area <= 0.0 || src_area <= 0.0 || screen_area <= 0.0 {
        return true;
    }

    let screen_ratio = dst_area / screen_area;
    let source_ratio = dst_area / src_area;
    let downscale = f64::max(
        candidate.src.w / candidate.dst.w as f64,
        candidate.src.h / candidate.dst.h as f64,
    );
    trace!(
        layer = ?candidate.layer,
        screen_ratio,
        source_ratio,
        downscale,
        "HDR layer geometry"
    );

    (screen_ratio < config.min_screen_ratio as f64 || source_ratio < config.min_source_ratio as f64)
        && downscale >= config.min_downscale as f64
}

/// Decide the HDR mode of a frame
///
/// `parser_available` tells whether the external metadata parser can be used; without
/// it metadata-driven mode falls back to a fixed transfer function.
#[profiling::function]
pub fn decide(
    caps: &HdrCapabilities,
    config: &HdrConfig,
    parser_available: bool,
    candidates: &[HdrCandidate],
    output: Size<i32, Physical>,
) -> HdrDecision {
    let mut decision = HdrDecision::default();
    let hdr_layers = candidates.iter().filter(|c| c.color_space.is_hdr());

    let mut chosen: Option<&HdrCandidate> = None;
    for candidate in hdr_layers {
        let keep = match config.policy {
            HdrPolicy::ForceSdr => false,
            HdrPolicy::ForceHdr => caps.is_supported(),
            HdrPolicy::Auto => caps.is_supported() && !is_negligible(candidate, output, config),
        };
        let supported = candidate
            .color_space
            .eotf()
            .map(|eotf| caps.eotfs.contains(eotf))
            .unwrap_or(false);

        if keep && supported && chosen.map(|c| c.color_space == candidate.color_space).unwrap_or(true) {
            chosen = Some(candidate);
        } else {
            debug!(layer = ?candidate.layer, policy = ?config.policy, "Demoting HDR layer to SDR composition");
            decision.demoted.push(candidate.layer);
        }
    }

    if let Some(candidate) = chosen {
        // checked above
        let eotf = candidate.color_space.eotf().unwrap_or(Eotf::PQ);
        decision.mode = match candidate.metadata {
            Some(metadata) if caps.metadata && config.metadata_parser && parser_available => {
                HdrMode::Metadata(eotf, metadata)
            }
            _ => HdrMode::FixedEotf(eotf),
        };
    }

    decision
}
