// A Cell is either a Leaf (bounded item list) or a Branch (eight children).
// Promotion from Leaf to Branch is an in-place slot replacement.

use std::sync::{Mutex, MutexGuard, RwLock};

use crate::agent::Agent;
use crate::octree::OctreeConfig;
use crate::vec3::{Scalar, Vec3};
use crate::visitor::Visitor;

pub(crate) enum CellBody<'a, T, N, S> {
    Leaf(Vec<&'a T>),
    Branch(Box<[Cell<'a, T, N, S>; 8]>),
}

pub struct Cell<'a, T, N, S> {
    center: Vec3<S>,
    radius: S,
    node_data: Mutex<N>,
    body: RwLock<CellBody<'a, T, N, S>>,
}

// up = i < 4 (+y), right = i & 1 (+x), front = i & 2 (+z)
fn child_geometry<S: Scalar>(center: Vec3<S>, half: S, i: usize) -> Vec3<S> {
    let up = i < 4;
    let right = (i & 1) != 0;
    let front = (i & 2) != 0;
    let dx = if right { half } else { -half };
    let dy = if up { half } else { -half };
    let dz = if front { half } else { -half };
    center + Vec3::new(dx, dy, dz)
}

fn promotion_stop<S: Scalar>(depth: u32, radius: S, config: &OctreeConfig<S>) -> bool {
    if config.max_level_count > 0 && depth + 1 >= config.max_level_count {
        return true;
    }
    if config.max_cell_size > S::from_i32(0) {
        let child_radius = radius / S::from_i32(2);
        if child_radius < config.max_cell_size {
            return true;
        }
    }
    false
}

impl<'a, T, N: Default, S: Scalar> Cell<'a, T, N, S> {
    pub(crate) fn new_leaf(center: Vec3<S>, radius: S) -> Self {
        Cell {
            center,
            radius,
            node_data: Mutex::new(N::default()),
            body: RwLock::new(CellBody::Leaf(Vec::new())),
        }
    }

    fn new_branch(center: Vec3<S>, radius: S) -> Self {
        let half = radius / S::from_i32(2);
        let children: [Cell<'a, T, N, S>; 8] =
            std::array::from_fn(|i| Cell::new_leaf(child_geometry(center, half, i), half));
        Cell {
            center,
            radius,
            node_data: Mutex::new(N::default()),
            body: RwLock::new(CellBody::Branch(Box::new(children))),
        }
    }

    // Routes each item into the first accepting child, in index order.
    fn populate_new_branch<A: Agent<T, N, S>>(
        children: &mut [Cell<'a, T, N, S>; 8],
        items: Vec<&'a T>,
        agent: &A,
        depth: u32,
        config: &OctreeConfig<S>,
    ) {
        for item in items {
            for child in children.iter_mut() {
                if agent.overlaps(item, child.center, child.radius) {
                    child.insert_seq(item, agent, depth, config);
                    break;
                }
            }
        }
    }

    // depth of the root is 0; a Branch routes into its children at depth + 1
    pub(crate) fn insert_seq<A: Agent<T, N, S>>(
        &mut self,
        item: &'a T,
        agent: &A,
        depth: u32,
        config: &OctreeConfig<S>,
    ) {
        let center = self.center;
        let radius = self.radius;
        let body = self.body.get_mut().expect("node mutex poisoned");
        match body {
            CellBody::Leaf(items) => {
                if items.iter().any(|existing| std::ptr::eq(*existing, item)) {
                    return;
                }
                if items.len() < config.max_items_per_cell || promotion_stop(depth, radius, config)
                {
                    items.push(item);
                    return;
                }
                let mut existing = std::mem::take(items);
                let promoted_count = existing.len();
                existing.push(item);
                let mut branch = Self::new_branch(center, radius);
                if let CellBody::Branch(children) =
                    branch.body.get_mut().expect("node mutex poisoned")
                {
                    Self::populate_new_branch(children, existing, agent, depth + 1, config);
                }
                *body = branch.body.into_inner().expect("node mutex poisoned");
                log::trace!(
                    "promoted leaf at depth {depth} (radius {radius:?}) to branch, re-routing {} items",
                    promoted_count + 1
                );
            }
            CellBody::Branch(children) => {
                for child in children.iter_mut() {
                    if agent.overlaps(item, child.center, child.radius) {
                        child.insert_seq(item, agent, depth + 1, config);
                        return;
                    }
                }
            }
        }
    }

    // Returns false only when the leaf under mutation is contended; the
    // caller retries. Branch routing just needs the read-lock to see
    // whether a cell is currently a Leaf or a Branch.
    pub(crate) fn try_insert<A: Agent<T, N, S>>(
        &self,
        item: &'a T,
        agent: &A,
        depth: u32,
        config: &OctreeConfig<S>,
    ) -> bool {
        {
            let body = self.body.read().expect("node mutex poisoned");
            if let CellBody::Branch(children) = &*body {
                for child in children.iter() {
                    if agent.overlaps(item, child.center, child.radius) {
                        drop(body);
                        while !child.try_insert(item, agent, depth + 1, config) {
                            // Contention is confined to this specific child;
                            // the root is never re-entered from here.
                        }
                        return true;
                    }
                }
                return true;
            }
        }

        let mut body = match self.body.try_write() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        match &mut *body {
            CellBody::Branch(_) => {
                // Promoted by another thread between our read check and
                // acquiring the write lock; ask the caller to retry, which
                // will take the lock-free Branch path above.
                false
            }
            CellBody::Leaf(items) => {
                if items.iter().any(|existing| std::ptr::eq(*existing, item)) {
                    return true;
                }
                if items.len() < config.max_items_per_cell
                    || promotion_stop(depth, self.radius, config)
                {
                    items.push(item);
                    return true;
                }
                let mut existing = std::mem::take(items);
                let promoted_count = existing.len();
                existing.push(item);
                let mut branch = Self::new_branch(self.center, self.radius);
                if let CellBody::Branch(children) =
                    branch.body.get_mut().expect("node mutex poisoned")
                {
                    Self::populate_new_branch(children, existing, agent, depth + 1, config);
                }
                *body = branch.body.into_inner().expect("node mutex poisoned");
                log::trace!(
                    "promoted leaf at depth {depth} (radius {:?}) to branch under contention, re-routing {} items",
                    self.radius,
                    promoted_count + 1
                );
                true
            }
        }
    }

    pub(crate) fn move_cell(&mut self, center: Vec3<S>, radius: S) {
        self.center = center;
        self.radius = radius;
    }

    pub(crate) fn is_empty_leaf(&self) -> bool {
        matches!(&*self.body.read().expect("node mutex poisoned"), CellBody::Leaf(items) if items.is_empty())
    }

    pub(crate) fn force_count_items(&self) -> usize {
        match &*self.body.read().expect("node mutex poisoned") {
            CellBody::Leaf(items) => items.len(),
            CellBody::Branch(children) => children.iter().map(|c| c.force_count_items()).sum(),
        }
    }

    pub(crate) fn find_path(&self, item: &T) -> Option<String> {
        match &*self.body.read().expect("node mutex poisoned") {
            CellBody::Leaf(items) => {
                if items.iter().any(|it| std::ptr::eq(*it, item)) {
                    Some(String::new())
                } else {
                    None
                }
            }
            CellBody::Branch(children) => {
                for (i, child) in children.iter().enumerate() {
                    if let Some(rest) = child.find_path(item) {
                        return Some(format!("{i}{rest}"));
                    }
                }
                None
            }
        }
    }

    pub(crate) fn equal(&self, other: &Self) -> bool {
        let a = self.body.read().expect("node mutex poisoned");
        let b = other.body.read().expect("node mutex poisoned");
        match (&*a, &*b) {
            (CellBody::Leaf(a_items), CellBody::Leaf(b_items)) => {
                if a_items.len() != b_items.len() {
                    return false;
                }
                let mut matched = vec![false; b_items.len()];
                a_items.iter().all(|ai| {
                    b_items.iter().enumerate().any(|(j, bj)| {
                        if !matched[j] && std::ptr::eq(*ai, *bj) {
                            matched[j] = true;
                            true
                        } else {
                            false
                        }
                    })
                })
            }
            (CellBody::Branch(a_children), CellBody::Branch(b_children)) => a_children
                .iter()
                .zip(b_children.iter())
                .all(|(ca, cb)| ca.equal(cb)),
            _ => false,
        }
    }

    pub(crate) fn dump(&self, level: usize) -> String {
        match &*self.body.read().expect("node mutex poisoned") {
            CellBody::Leaf(items) => {
                let ids: Vec<String> =
                    items.iter().map(|it| format!("{:p}", *it as *const T)).collect();
                format!("Leaf, items:{} {}", items.len(), ids.join(" "))
            }
            CellBody::Branch(children) => {
                let indent = " ".repeat(7 + 2 * level);
                let mut out = String::from("Branch ");
                for (i, child) in children.iter().enumerate() {
                    if i != 0 {
                        out.push('\n');
                        out.push_str(&indent);
                    }
                    out.push_str(&format!("{} {}", i, child.dump(level + 1)));
                }
                out
            }
        }
    }

    pub fn continue_visit<V>(&self, visitor: &V)
    where
        V: Visitor<T, N, S> + ?Sized,
    {
        match &*self.body.read().expect("node mutex poisoned") {
            CellBody::Leaf(items) => visitor.visit_leaf(self, items),
            CellBody::Branch(children) => visitor.visit_branch(self, children),
        }
    }

    // worker_count workers each take a contiguous slice of the eight
    // children; requires self to currently be a Branch.
    pub(crate) fn continue_visit_branch_threaded<V>(
        &self,
        visitor: &V,
        worker_count: usize,
        skip_mask: &mut [bool; 8],
    ) where
        V: Visitor<T, N, S> + Sync,
        T: Sync,
        N: Send,
    {
        let body = self.body.read().expect("node mutex poisoned");
        if let CellBody::Branch(children) = &*body {
            let children: &[Cell<'a, T, N, S>; 8] = children;
            visitor.visit_pre_branch(self, children, skip_mask);
            let mask = *skip_mask;
            std::thread::scope(|scope| {
                for t in 0..worker_count {
                    let lo = t * 8 / worker_count;
                    let hi = (t + 1) * 8 / worker_count;
                    scope.spawn(move || {
                        for i in lo..hi {
                            if mask[i] {
                                children[i].continue_visit(visitor);
                            }
                        }
                    });
                }
            });
            visitor.visit_post_branch(self, children);
        }
    }

    pub fn center(&self) -> Vec3<S> {
        self.center
    }

    pub fn radius(&self) -> S {
        self.radius
    }

    pub fn is_leaf(&self) -> bool {
        matches!(&*self.body.read().expect("node mutex poisoned"), CellBody::Leaf(_))
    }

    pub fn node_data(&self) -> MutexGuard<'_, N> {
        self.node_data.lock().expect("node mutex poisoned")
    }
}
