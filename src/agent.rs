use crate::vec3::{Scalar, Vec3};

pub trait Agent<T, N, S: Scalar> {
    /// True iff item should be considered present in the cell's cube.
    fn overlaps(&self, item: &T, cell_center: Vec3<S>, cell_radius: S) -> bool;

    fn max_for_adjust(&self, _item: &T, current_max: Vec3<S>) -> Vec3<S> {
        log::warn!("Agent::max_for_adjust not overridden; auto-adjust bound left unchanged");
        current_max
    }

    fn min_for_adjust(&self, _item: &T, current_min: Vec3<S>) -> Vec3<S> {
        log::warn!("Agent::min_for_adjust not overridden; auto-adjust bound left unchanged");
        current_min
    }
}
