use dab_protocol::{DabRequest, DabShape};

use crate::job::DabJobKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabClassification {
    pub kind: DabJobKind,
    pub needs_postprocessing: bool,
}

impl DabClassification {
    pub const fn full(needs_postprocessing: bool) -> Self {
        Self {
            kind: DabJobKind::Full,
            needs_postprocessing,
        }
    }

    pub const fn derived() -> Self {
        Self {
            kind: DabJobKind::Derived,
            needs_postprocessing: true,
        }
    }

    pub const fn identical() -> Self {
        Self {
            kind: DabJobKind::Identical,
            needs_postprocessing: false,
        }
    }
}

/// Decides how much work a new dab needs relative to the nearest preceding full dab.
///
/// Implementations must not assume anything about the ledger beyond `has_full_dab`:
/// returning [`DabJobKind::Derived`] or [`DabJobKind::Identical`] while it is `false`
/// is rejected by the queue.
pub trait DabCachePolicy<R>: Send {
    fn classify_dab(
        &mut self,
        has_full_dab: bool,
        resources: &R,
        request: &DabRequest,
    ) -> DabClassification;
}

/// Renders every dab from scratch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFullPolicy;

impl<R> DabCachePolicy<R> for AlwaysFullPolicy {
    fn classify_dab(&mut self, _: bool, _: &R, _: &DabRequest) -> DabClassification {
        DabClassification::full(false)
    }
}

/// Reuses the last full dab while the brush shape and sub-pixel phase stay put.
///
/// Full dabs keep their raw mask as the original buffer and apply opacity in
/// post-processing, so a later dab that only changes opacity can be derived from it.
#[derive(Debug, Clone, Copy)]
pub struct ParameterCachePolicy {
    last_full: Option<DabRequest>,
    tolerance: f32,
}

impl ParameterCachePolicy {
    pub const DEFAULT_TOLERANCE: f32 = 1e-3;

    pub fn new(tolerance: f32) -> Self {
        Self {
            last_full: None,
            tolerance,
        }
    }

    fn remember_full(&mut self, request: &DabRequest) -> DabClassification {
        self.last_full = Some(*request);
        DabClassification::full(true)
    }

    fn same_shape(&self, lhs: &DabShape, rhs: &DabShape) -> bool {
        self.close(lhs.diameter, rhs.diameter)
            && self.close(lhs.aspect_ratio, rhs.aspect_ratio)
            && self.close(lhs.angle_radians, rhs.angle_radians)
            && self.close(lhs.hardness, rhs.hardness)
    }

    fn same_phase(&self, lhs: &DabRequest, rhs: &DabRequest) -> bool {
        let (lhs_x, lhs_y) = lhs.subpixel_phase();
        let (rhs_x, rhs_y) = rhs.subpixel_phase();
        self.close(lhs_x, rhs_x) && self.close(lhs_y, rhs_y)
    }

    fn close(&self, lhs: f32, rhs: f32) -> bool {
        (lhs - rhs).abs() <= self.tolerance
    }
}

impl Default for ParameterCachePolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOLERANCE)
    }
}

impl<R> DabCachePolicy<R> for ParameterCachePolicy {
    fn classify_dab(
        &mut self,
        has_full_dab: bool,
        _: &R,
        request: &DabRequest,
    ) -> DabClassification {
        let Some(last_full) = self.last_full.filter(|_| has_full_dab) else {
            return self.remember_full(request);
        };
        if !self.same_shape(&last_full.shape, &request.shape) || !self.same_phase(&last_full, request)
        {
            return self.remember_full(request);
        }
        if self.close(last_full.opacity, request.opacity) {
            DabClassification::identical()
        } else {
            DabClassification::derived()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(canvas_x: f32, diameter: f32, opacity: f32) -> DabRequest {
        DabRequest::new(
            canvas_x,
            0.0,
            DabShape {
                diameter,
                ..DabShape::default()
            },
            opacity,
        )
    }

    fn classify(policy: &mut ParameterCachePolicy, has_full: bool, dab: DabRequest) -> DabJobKind {
        DabCachePolicy::<()>::classify_dab(policy, has_full, &(), &dab).kind
    }

    #[test]
    fn always_full_never_reuses() {
        let mut policy = AlwaysFullPolicy;
        let classification = DabCachePolicy::<()>::classify_dab(
            &mut policy,
            true,
            &(),
            &request(0.0, 4.0, 1.0),
        );
        assert_eq!(classification, DabClassification::full(false));
    }

    #[test]
    fn first_dab_is_full_even_when_ledger_claims_a_full_dab() {
        let mut policy = ParameterCachePolicy::default();
        assert_eq!(
            classify(&mut policy, true, request(0.0, 4.0, 1.0)),
            DabJobKind::Full
        );
    }

    #[test]
    fn whole_pixel_moves_are_identical_and_opacity_changes_are_derived() {
        let mut policy = ParameterCachePolicy::default();
        assert_eq!(
            classify(&mut policy, false, request(0.0, 4.0, 1.0)),
            DabJobKind::Full
        );
        assert_eq!(
            classify(&mut policy, true, request(3.0, 4.0, 1.0)),
            DabJobKind::Identical
        );
        assert_eq!(
            classify(&mut policy, true, request(5.0, 4.0, 0.5)),
            DabJobKind::Derived
        );
    }

    #[test]
    fn shape_or_phase_change_forces_full() {
        let mut policy = ParameterCachePolicy::default();
        classify(&mut policy, false, request(0.0, 4.0, 1.0));

        assert_eq!(
            classify(&mut policy, true, request(0.5, 4.0, 1.0)),
            DabJobKind::Full
        );
        assert_eq!(
            classify(&mut policy, true, request(0.5, 6.0, 1.0)),
            DabJobKind::Full
        );
        assert_eq!(
            classify(&mut policy, true, request(1.5, 6.0, 1.0)),
            DabJobKind::Identical
        );
    }

    #[test]
    fn forgets_cached_dab_when_ledger_has_no_full_dab() {
        let mut policy = ParameterCachePolicy::default();
        classify(&mut policy, false, request(0.0, 4.0, 1.0));

        assert_eq!(
            classify(&mut policy, false, request(1.0, 4.0, 1.0)),
            DabJobKind::Full
        );
    }
}
