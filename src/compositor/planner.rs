//! Plane assignment
//!
//! The [`Planner`] walks the layers of a frame bottom to top and hands each one the first
//! still unclaimed plane able to scan it out. Layers left without a plane are composed in
//! software into the frame-buffer-target, which is then matched the same way.

use tracing::trace;

use crate::{
    backend::allocator::Format,
    layer::{CompositionKind, LayerHandle},
    plane::{Plane, PlaneGroupId, PlaneId, PlaneType, Planes},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform},
};

/// A layer as seen by the planner
#[derive(Debug, Clone)]
pub struct PlanCandidate {
    /// The layer
    pub layer: LayerHandle,
    /// Composition kind requested by the client
    pub requested: CompositionKind,
    /// Engine policy forbids a plane for this layer in this frame
    pub force_software: bool,
    /// Format of the content, `None` for side-channel streams
    pub format: Option<Format>,
    /// Source size in buffer coordinates
    pub src: Size<f64, BufferCoords>,
    /// Destination on the output
    pub dst: Rectangle<i32, Physical>,
    /// Transform applied during scan-out
    pub transform: Transform,
}

impl PlanCandidate {
    /// Candidate for a layer without usable content, which can only be composed in software
    pub fn software(layer: LayerHandle, requested: CompositionKind, dst: Rectangle<i32, Physical>) -> Self {
        PlanCandidate {
            layer,
            requested,
            force_software: true,
            format: None,
            src: Size::default(),
            dst,
            transform: Transform::Normal,
        }
    }
}

/// A layer scanned out by a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// The layer
    pub layer: LayerHandle,
    /// The plane
    pub plane: PlaneId,
    /// Resulting composition kind
    pub kind: CompositionKind,
}

/// Result of planning a frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionPlan {
    /// Layers scanned out directly, in paint order
    pub assignments: Vec<Assignment>,
    /// Layers composed in software, in paint order
    pub software: Vec<LayerHandle>,
    /// Plane carrying the frame-buffer-target, present iff `software` is not empty
    pub target: Option<PlaneId>,
}

impl CompositionPlan {
    /// A plan composing every layer in software, without a target plane
    pub fn all_software(layers: impl IntoIterator<Item = LayerHandle>) -> Self {
        CompositionPlan {
            assignments: Vec::new(),
            software: layers.into_iter().collect(),
            target: None,
        }
    }

    /// Composition kind the plan gives a layer, `None` if the layer is not part of the plan
    pub fn kind_of(&self, layer: LayerHandle) -> Option<CompositionKind> {
        self.assignments
            .iter()
            .find(|a| a.layer == layer)
            .map(|a| a.kind)
            .or_else(|| self.software.contains(&layer).then_some(CompositionKind::Software))
    }

    /// Plane assigned to a layer
    pub fn plane_for(&self, layer: LayerHandle) -> Option<PlaneId> {
        self.assignments.iter().find(|a| a.layer == layer).map(|a| a.plane)
    }

    /// Returns true if the frame needs the software renderer but it has no plane to land on
    pub fn is_fallback(&self) -> bool {
        !self.software.is_empty() && self.target.is_none()
    }
}

/// Errors thrown by the [`Planner`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The frame-buffer-target could not be matched to any plane
    #[error("No plane is able to scan out the frame-buffer-target")]
    NoTargetPlane {
        /// Layers that were composed in software
        software: Vec<LayerHandle>,
    },
}

/// Stateless plane assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Planner {
    /// Whether cursor layers may use cursor planes
    pub cursor_planes: bool,
    /// Compose every layer in software
    pub disabled: bool,
}

impl Default for Planner {
    fn default() -> Self {
        Planner {
            cursor_planes: true,
            disabled: false,
        }
    }
}

fn accepts(plane: &Plane, candidate: &PlanCandidate) -> bool {
    match plane
        .caps
        .check(candidate.format.as_ref(), candidate.src, candidate.dst.size, candidate.transform)
    {
        Ok(()) => true,
        Err(reason) => {
            trace!(layer = ?candidate.layer, plane = ?plane.id, ?reason, "Plane rejected layer");
            false
        }
    }
}

fn claim(
    available: &[&Plane],
    claimed: &mut [bool],
    candidate: &PlanCandidate,
    allowed: impl Fn(PlaneType) -> bool,
) -> Option<usize> {
    let idx = available
        .iter()
        .enumerate()
        .filter(|(idx, plane)| !claimed[*idx] && allowed(plane.kind))
        .find(|(_, plane)| accepts(plane, candidate))
        .map(|(idx, _)| idx)?;
    claimed[idx] = true;
    Some(idx)
}

impl Planner {
    /// Assign planes to the layers of a frame
    ///
    /// `layers` have to be in paint order. Only planes of `groups` are considered, in
    /// declaration order.
    ///
    /// The frame-buffer-target is scanned out at the position of the lowest software
    /// layer. A plane layer painted between two software layers is composed in software
    /// as well if it overlaps any software layer above it, so the target never ends up
    /// below content it has to cover.
    #[profiling::function]
    pub fn plan(
        &self,
        layers: &[PlanCandidate],
        target: &PlanCandidate,
        planes: &Planes,
        groups: &[PlaneGroupId],
    ) -> Result<CompositionPlan, PlanError> {
        let available: Vec<&Plane> = planes.planes_in(groups).collect();
        let mut claimed = vec![false; available.len()];
        let mut assigned: Vec<Option<(usize, CompositionKind)>> = Vec::with_capacity(layers.len());

        for candidate in layers {
            let wants_plane = !self.disabled
                && !candidate.force_software
                && candidate.requested != CompositionKind::Software;
            if !wants_plane {
                assigned.push(None);
                continue;
            }

            let cursor = candidate.requested == CompositionKind::Cursor && self.cursor_planes;
            let outcome = if cursor {
                claim(&available, &mut claimed, candidate, |kind| kind == PlaneType::Cursor)
                    .map(|plane| (plane, CompositionKind::Cursor))
                    .or_else(|| {
                        claim(&available, &mut claimed, candidate, |kind| kind == PlaneType::Overlay)
                            .map(|plane| (plane, CompositionKind::Plane))
                    })
            } else {
                let kind = match candidate.requested {
                    CompositionKind::Sideband => CompositionKind::Sideband,
                    _ => CompositionKind::Plane,
                };
                claim(&available, &mut claimed, candidate, |kind| kind == PlaneType::Overlay)
                    .map(|plane| (plane, kind))
            };
            match outcome {
                Some((plane, kind)) => {
                    trace!(layer = ?candidate.layer, plane = ?available[plane].id, ?kind, "Assigned plane")
                }
                None => trace!(layer = ?candidate.layer, "No plane left, composing in software"),
            }
            assigned.push(outcome);
        }

        let lowest = assigned.iter().position(Option::is_none);
        let highest = assigned.iter().rposition(Option::is_none);
        if let (Some(lowest), Some(highest)) = (lowest, highest) {
            for idx in (lowest + 1..highest).rev() {
                let Some((plane, _)) = assigned[idx] else {
                    continue;
                };
                let covered = (idx + 1..=highest)
                    .any(|above| assigned[above].is_none() && layers[idx].dst.overlaps(layers[above].dst));
                if covered {
                    trace!(layer = ?layers[idx].layer, "Plane layer overlaps software content above it");
                    claimed[plane] = false;
                    assigned[idx] = None;
                }
            }
        }

        let mut plan = CompositionPlan::default();
        for (candidate, outcome) in layers.iter().zip(&assigned) {
            match outcome {
                Some((plane, kind)) => plan.assignments.push(Assignment {
                    layer: candidate.layer,
                    plane: available[*plane].id,
                    kind: *kind,
                }),
                None => plan.software.push(candidate.layer),
            }
        }

        if !plan.software.is_empty() {
            match claim(&available, &mut claimed, target, |kind| kind != PlaneType::Cursor) {
                Some(plane) => plan.target = Some(available[plane].id),
                None => {
                    return Err(PlanError::NoTargetPlane {
                        software: layers.iter().map(|c| c.layer).collect(),
                    })
                }
            }
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;
    use smallvec::SmallVec;

    use super::*;
    use crate::{
        backend::{
            allocator::{Fourcc, Modifier},
            driver::CrtcId,
        },
        plane::{PlaneCapabilities, PlaneGroup, Rotations},
    };

    const F: Format = Format {
        code: Fourcc::Argb8888,
        modifier: Modifier::Linear,
    };
    const OTHER: Format = Format {
        code: Fourcc::Nv12,
        modifier: Modifier::Linear,
    };

    fn plane(id: u32, kind: PlaneType) -> Plane {
        Plane {
            id: PlaneId(id),
            group: PlaneGroupId(0),
            kind,
            caps: PlaneCapabilities {
                max_size: (4096, 4096).into(),
                formats: IndexSet::from([F]),
                scaling: None,
                rotations: Rotations::ROTATE_0,
            },
        }
    }

    fn catalogue(planes: Vec<Plane>) -> Planes {
        Planes::new(
            vec![PlaneGroup {
                id: PlaneGroupId(0),
                possible_crtcs: SmallVec::from_slice(&[CrtcId(0)]),
            }],
            planes,
        )
    }

    fn layer(id: u32, format: Format) -> PlanCandidate {
        PlanCandidate {
            layer: LayerHandle::from_raw(id),
            requested: CompositionKind::Plane,
            force_software: false,
            format: Some(format),
            src: (100.0, 100.0).into(),
            dst: Rectangle::from_loc_and_size((id as i32 * 10, 0), (100, 100)),
            transform: Transform::Normal,
        }
    }

    fn target() -> PlanCandidate {
        PlanCandidate {
            layer: LayerHandle::CLIENT_TARGET,
            requested: CompositionKind::Plane,
            force_software: false,
            format: Some(F),
            src: (1920.0, 1080.0).into(),
            dst: Rectangle::from_loc_and_size((0, 0), (1920, 1080)),
            transform: Transform::Normal,
        }
    }

    const GROUPS: &[PlaneGroupId] = &[PlaneGroupId(0)];

    #[test]
    fn two_overlays_three_layers_without_target_plane() {
        let planes = catalogue(vec![plane(0, PlaneType::Overlay), plane(1, PlaneType::Overlay)]);
        let layers = [layer(0, F), layer(1, OTHER), layer(2, F)];

        let err = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::NoTargetPlane {
                software: layers.iter().map(|l| l.layer).collect()
            }
        );
    }

    #[test]
    fn two_overlays_three_layers_with_primary() {
        let planes = catalogue(vec![
            plane(0, PlaneType::Primary),
            plane(1, PlaneType::Overlay),
            plane(2, PlaneType::Overlay),
        ]);
        let layers = [layer(0, F), layer(1, OTHER), layer(2, F)];

        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert_eq!(plan.plane_for(layers[0].layer), Some(PlaneId(1)));
        assert_eq!(plan.plane_for(layers[2].layer), Some(PlaneId(2)));
        assert_eq!(plan.software, vec![layers[1].layer]);
        assert_eq!(plan.target, Some(PlaneId(0)));
        assert_eq!(plan.kind_of(layers[1].layer), Some(CompositionKind::Software));
    }

    #[test]
    fn no_target_without_software_layers() {
        let planes = catalogue(vec![plane(0, PlaneType::Primary), plane(1, PlaneType::Overlay)]);
        let layers = [layer(0, F)];
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert_eq!(plan.target, None);
        assert!(plan.software.is_empty());
    }

    #[test]
    fn primary_planes_only_carry_the_target() {
        let planes = catalogue(vec![plane(0, PlaneType::Primary)]);
        let layers = [layer(0, F)];
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.target, Some(PlaneId(0)));
    }

    #[test]
    fn unclaimed_groups_are_ignored() {
        let planes = catalogue(vec![plane(0, PlaneType::Overlay)]);
        let err = Planner::default().plan(&[layer(0, F)], &target(), &planes, &[]);
        assert!(err.is_err());
    }

    #[test]
    fn cursor_layers_prefer_cursor_planes() {
        let planes = catalogue(vec![
            plane(0, PlaneType::Primary),
            plane(1, PlaneType::Overlay),
            plane(2, PlaneType::Cursor),
        ]);
        let mut cursor = layer(0, F);
        cursor.requested = CompositionKind::Cursor;

        let plan = Planner::default()
            .plan(&[cursor.clone()], &target(), &planes, GROUPS)
            .unwrap();
        assert_eq!(plan.assignments[0].plane, PlaneId(2));
        assert_eq!(plan.assignments[0].kind, CompositionKind::Cursor);

        let planner = Planner {
            cursor_planes: false,
            ..Planner::default()
        };
        let plan = planner.plan(&[cursor], &target(), &planes, GROUPS).unwrap();
        assert_eq!(plan.assignments[0].plane, PlaneId(1));
        assert_eq!(plan.assignments[0].kind, CompositionKind::Plane);
    }

    #[test]
    fn requested_software_and_disabled_planner() {
        let planes = catalogue(vec![plane(0, PlaneType::Primary), plane(1, PlaneType::Overlay)]);
        let mut software = layer(0, F);
        software.requested = CompositionKind::Software;
        let plan = Planner::default()
            .plan(&[software], &target(), &planes, GROUPS)
            .unwrap();
        assert!(plan.assignments.is_empty());

        let planner = Planner {
            disabled: true,
            ..Planner::default()
        };
        let plan = planner.plan(&[layer(0, F)], &target(), &planes, GROUPS).unwrap();
        assert_eq!(plan.software.len(), 1);
        assert_eq!(plan.target, Some(PlaneId(0)));
    }

    #[test]
    fn plane_layers_below_overlapping_software_content_are_demoted() {
        let planes = catalogue(vec![
            plane(0, PlaneType::Primary),
            plane(1, PlaneType::Overlay),
            plane(2, PlaneType::Overlay),
        ]);
        let at = |id: u32, format: Format, x: i32| PlanCandidate {
            dst: Rectangle::from_loc_and_size((x, 0), (100, 100)),
            ..layer(id, format)
        };

        let layers = [at(0, OTHER, 0), at(1, F, 50), at(2, OTHER, 120)];
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.software, layers.iter().map(|l| l.layer).collect::<Vec<_>>());
        assert_eq!(plan.target, Some(PlaneId(0)));

        // nothing above covers the middle layer, it keeps its plane
        let layers = [at(0, OTHER, 0), at(1, F, 50), at(2, OTHER, 400)];
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert_eq!(plan.plane_for(layers[1].layer), Some(PlaneId(1)));
        assert_eq!(plan.software, vec![layers[0].layer, layers[2].layer]);
    }

    #[test]
    fn demotions_cascade_downwards() {
        let planes = catalogue(vec![
            plane(0, PlaneType::Primary),
            plane(1, PlaneType::Overlay),
            plane(2, PlaneType::Overlay),
        ]);
        let at = |id: u32, format: Format, x: i32| PlanCandidate {
            dst: Rectangle::from_loc_and_size((x, 0), (100, 100)),
            ..layer(id, format)
        };
        // the second layer only overlaps the third, which only overlaps the software top
        let layers = [at(0, OTHER, 0), at(1, F, 150), at(2, F, 220), at(3, OTHER, 300)];
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.software.len(), 4);
        assert_eq!(plan.target, Some(PlaneId(0)));
    }

    #[test]
    fn planes_are_never_shared() {
        let planes = catalogue((0..3).map(|i| plane(i, PlaneType::Overlay)).collect());
        let layers: Vec<_> = (0..3).map(|i| layer(i, F)).collect();
        let plan = Planner::default()
            .plan(&layers, &target(), &planes, GROUPS)
            .unwrap();
        let mut used: Vec<_> = plan.assignments.iter().map(|a| a.plane).collect();
        used.dedup();
        assert_eq!(used.len(), 3);
        assert!(plan.software.is_empty());
    }
}
