use crate::cell::Cell;
use crate::vec3::Scalar;

pub trait Visitor<T, N, S: Scalar> {
    fn visit_root(&self, cell: &Cell<'_, T, N, S>) {
        self.continue_visit(cell);
    }

    fn visit_pre_root(&self, _cell: &Cell<'_, T, N, S>) {}

    fn visit_post_root(&self, _cell: &Cell<'_, T, N, S>) {}

    fn visit_branch(&self, _cell: &Cell<'_, T, N, S>, children: &[Cell<'_, T, N, S>; 8]) {
        for child in children {
            self.continue_visit(child);
        }
    }

    // skip_mask[i] = false skips subtree i in the parallel fan-out.
    fn visit_pre_branch(
        &self,
        _cell: &Cell<'_, T, N, S>,
        _children: &[Cell<'_, T, N, S>; 8],
        _skip_mask: &mut [bool; 8],
    ) {
    }

    fn visit_post_branch(&self, _cell: &Cell<'_, T, N, S>, _children: &[Cell<'_, T, N, S>; 8]) {}

    fn visit_leaf(&self, cell: &Cell<'_, T, N, S>, items: &[&T]);

    fn continue_visit(&self, cell: &Cell<'_, T, N, S>) {
        cell.continue_visit(self);
    }
}
