//! Hardware scan-out planes
//!
//! A [`Plane`] scans out one rectangular image directly. Planes are organized in
//! [`PlaneGroup`]s, which are claimed as a whole by one timing engine at a time through
//! the [`PlaneClaimStorage`].

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    backend::{allocator::Format, driver::CrtcId},
    utils::{Buffer as BufferCoords, Physical, Size, Transform},
};

/// Handle of a hardware plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneId(pub u32);

/// Handle of a group of planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneGroupId(pub u32);

/// Restriction on what a plane may scan out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneType {
    /// Only carries the frame-buffer-target
    Primary,
    /// Carries client layers, never the frame-buffer-target
    Overlay,
    /// Carries cursor layers
    Cursor,
}

bitflags::bitflags! {
    /// Rotations and reflections a plane supports
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Rotations: u8 {
        /// No rotation
        const ROTATE_0      =   0b00000001;
        /// Rotation by 90 degrees
        const ROTATE_90     =   0b00000010;
        /// Rotation by 180 degrees
        const ROTATE_180    =   0b00000100;
        /// Rotation by 270 degrees
        const ROTATE_270    =   0b00001000;
        /// Reflection along the x axis
        const REFLECT_X     =   0b00010000;
        /// Reflection along the y axis
        const REFLECT_Y     =   0b00100000;
    }
}

impl From<Transform> for Rotations {
    fn from(transform: Transform) -> Self {
        match transform {
            Transform::Normal => Rotations::ROTATE_0,
            Transform::_90 => Rotations::ROTATE_90,
            Transform::_180 => Rotations::ROTATE_180,
            Transform::_270 => Rotations::ROTATE_270,
            Transform::Flipped => Rotations::REFLECT_Y,
            Transform::Flipped90 => Rotations::REFLECT_Y | Rotations::ROTATE_90,
            Transform::Flipped180 => Rotations::REFLECT_Y | Rotations::ROTATE_180,
            Transform::Flipped270 => Rotations::REFLECT_Y | Rotations::ROTATE_270,
        }
    }
}

/// Range of scaling factors (`dst / src`) a plane supports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingLimits {
    /// Smallest factor, e.g. `0.25` for 4x down-scaling
    pub min: f64,
    /// Largest factor, e.g. `8.0` for 8x up-scaling
    pub max: f64,
}

impl ScalingLimits {
    fn contains(&self, factor: f64) -> bool {
        self.min <= factor && factor <= self.max
    }
}

/// Reason a plane rejected a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneMismatch {
    /// Source or destination is empty
    Unscalable,
    /// The pixel format or modifier is not supported
    Format,
    /// The destination exceeds the plane's maximum size
    Size,
    /// The plane cannot scale by the required factor
    Scaling,
    /// The plane cannot apply the required transform
    Rotation,
}

/// What a plane is able to scan out
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneCapabilities {
    /// Largest destination the plane can cover
    pub max_size: Size<i32, Physical>,
    /// Supported formats and compression layouts
    pub formats: IndexSet<Format>,
    /// Supported scaling factors, `None` if the plane cannot scale
    pub scaling: Option<ScalingLimits>,
    /// Supported transforms
    pub rotations: Rotations,
}

impl PlaneCapabilities {
    /// Check whether an image with the given properties can be scanned out
    ///
    /// The scaling factor is computed per axis as `dst / src`, after swapping the
    /// source axes for 90 and 270 degree rotations. A `None` format skips the format
    /// check, which is used for side-channel streams.
    pub fn check(
        &self,
        format: Option<&Format>,
        src: Size<f64, BufferCoords>,
        dst: Size<i32, Physical>,
        transform: Transform,
    ) -> Result<(), PlaneMismatch> {
        if src.is_empty() || dst.is_empty() {
            return Err(PlaneMismatch::Unscalable);
        }
        if let Some(format) = format {
            if !self.formats.contains(format) {
                return Err(PlaneMismatch::Format);
            }
        }
        if !dst.fits_into(self.max_size) {
            return Err(PlaneMismatch::Size);
        }

        let src = transform.transform_size(src);
        let factor_x = dst.w as f64 / src.w;
        let factor_y = dst.h as f64 / src.h;
        let unscaled = (factor_x - 1.0).abs() < f64::EPSILON && (factor_y - 1.0).abs() < f64::EPSILON;
        if !unscaled {
            match self.scaling {
                Some(limits) if limits.contains(factor_x) && limits.contains(factor_y) => {}
                _ => return Err(PlaneMismatch::Scaling),
            }
        }

        if !self.rotations.contains(Rotations::from(transform)) {
            return Err(PlaneMismatch::Rotation);
        }

        Ok(())
    }
}

/// A hardware plane
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    /// Handle of the plane
    pub id: PlaneId,
    /// Group owning this plane
    pub group: PlaneGroupId,
    /// Restriction of the plane
    pub kind: PlaneType,
    /// Capabilities of the plane
    pub caps: PlaneCapabilities,
}

/// Set of planes claimed as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneGroup {
    /// Handle of the group
    pub id: PlaneGroupId,
    /// Timing engines able to use this group
    pub possible_crtcs: SmallVec<[CrtcId; 4]>,
}

/// Catalogue of all planes of a device, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Planes {
    groups: Vec<PlaneGroup>,
    planes: Vec<Plane>,
}

impl Planes {
    /// Create a new catalogue
    ///
    /// Planes referencing an unknown group are dropped.
    pub fn new(groups: Vec<PlaneGroup>, planes: Vec<Plane>) -> Self {
        let planes = planes
            .into_iter()
            .filter(|plane| {
                let known = groups.iter().any(|g| g.id == plane.group);
                if !known {
                    trace!(plane = ?plane.id, group = ?plane.group, "Dropping plane of unknown group");
                }
                known
            })
            .collect();
        Planes { groups, planes }
    }

    /// All planes in declaration order
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// All groups in declaration order
    pub fn groups(&self) -> &[PlaneGroup] {
        &self.groups
    }

    /// Look up a plane
    pub fn plane(&self, id: PlaneId) -> Option<&Plane> {
        self.planes.iter().find(|p| p.id == id)
    }

    /// Groups usable by a given timing engine
    pub fn groups_for(&self, crtc: CrtcId) -> impl Iterator<Item = &PlaneGroup> + '_ {
        self.groups
            .iter()
            .filter(move |g| g.possible_crtcs.contains(&crtc))
    }

    /// Planes belonging to any of the given groups, in declaration order
    pub fn planes_in<'a>(&'a self, groups: &'a [PlaneGroupId]) -> impl Iterator<Item = &'a Plane> + 'a {
        self.planes.iter().filter(move |p| groups.contains(&p.group))
    }
}

/// Book-keeping of which timing engine holds which [`PlaneGroup`]
#[derive(Debug, Clone, Default)]
pub struct PlaneClaimStorage {
    claimed: Arc<Mutex<HashMap<PlaneGroupId, CrtcId>>>,
}

impl PlaneClaimStorage {
    /// Try to claim a group for a timing engine
    ///
    /// Returns `None` if the group is held by another timing engine or by a claim of the same
    /// timing engine that is still alive.
    pub fn claim(&self, group: PlaneGroupId, crtc: CrtcId) -> Option<PlaneGroupClaim> {
        let mut claimed = self.claimed.lock().unwrap();
        if claimed.contains_key(&group) {
            return None;
        }
        claimed.insert(group, crtc);
        Some(PlaneGroupClaim {
            group,
            crtc,
            storage: self.clone(),
        })
    }

    /// Returns the timing engine currently holding `group`
    pub fn holder(&self, group: PlaneGroupId) -> Option<CrtcId> {
        self.claimed.lock().unwrap().get(&group).copied()
    }

    fn release(&self, group: PlaneGroupId, crtc: CrtcId) {
        let mut claimed = self.claimed.lock().unwrap();
        if claimed.get(&group) == Some(&crtc) {
            claimed.remove(&group);
        }
    }
}

/// An exclusive claim of a [`PlaneGroup`], released on drop
pub struct PlaneGroupClaim {
    group: PlaneGroupId,
    crtc: CrtcId,
    storage: PlaneClaimStorage,
}

impl PlaneGroupClaim {
    /// The claimed group
    pub fn group(&self) -> PlaneGroupId {
        self.group
    }

    /// The timing engine holding the claim
    pub fn crtc(&self) -> CrtcId {
        self.crtc
    }
}

impl fmt::Debug for PlaneGroupClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneGroupClaim")
            .field("group", &self.group)
            .field("crtc", &self.crtc)
            .finish_non_exhaustive()
    }
}

impl Drop for PlaneGroupClaim {
    fn drop(&mut self) {
        self.storage.release(self.group, self.crtc);
    }
}
