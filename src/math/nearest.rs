//! Nearest-point lookup over a static set of 3D keys
//!
//! A kd-tree stored implicitly in a single vector: each subrange is split at
//! its median along axis `depth % 3`, so the element at the middle of a range
//! is that subtree's root. Built once, queried many times.

use glam::Vec3;

/// Maps 3D points to values and answers "closest stored point" queries
/// in O(log n) expected time.
pub struct NearestMap<T> {
    entries: Vec<(Vec3, T)>,
}

/// Result of a nearest query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest<'a, T> {
    /// Position of the entry in the map's internal order (stable after build)
    pub index: usize,
    /// The stored key point
    pub point: Vec3,
    /// The stored value
    pub value: &'a T,
    /// Squared distance from the query point
    pub distance_squared: f32,
}

impl<T> NearestMap<T> {
    /// Build a map from `(point, value)` pairs
    pub fn new(mut entries: Vec<(Vec3, T)>) -> Self {
        build(&mut entries, 0);
        Self { entries }
    }

    /// Number of stored points
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no points
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the stored point closest to `query`
    pub fn nearest(&self, query: Vec3) -> Option<Nearest<'_, T>> {
        if self.entries.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        search(&self.entries, 0, 0, query, &mut best);

        best.map(|(index, distance_squared)| {
            let (point, value) = &self.entries[index];
            Nearest {
                index,
                point: *point,
                value,
                distance_squared,
            }
        })
    }

    /// Value stored for the point closest to `query`
    pub fn query(&self, query: Vec3) -> Option<&T> {
        self.nearest(query).map(|n| n.value)
    }

    /// Entry at an index previously returned by [`NearestMap::nearest`]
    pub fn get(&self, index: usize) -> Option<(Vec3, &T)> {
        self.entries.get(index).map(|(p, v)| (*p, v))
    }

    /// Iterate over all stored entries
    pub fn iter(&self) -> impl Iterator<Item = (Vec3, &T)> {
        self.entries.iter().map(|(p, v)| (*p, v))
    }
}

impl<T> FromIterator<(Vec3, T)> for NearestMap<T> {
    fn from_iter<I: IntoIterator<Item = (Vec3, T)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn build<T>(entries: &mut [(Vec3, T)], depth: usize) {
    if entries.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    let mid = entries.len() / 2;
    entries.select_nth_unstable_by(mid, |a, b| a.0[axis].total_cmp(&b.0[axis]));

    let (left, rest) = entries.split_at_mut(mid);
    build(left, depth + 1);
    build(&mut rest[1..], depth + 1);
}

fn search<T>(
    entries: &[(Vec3, T)],
    offset: usize,
    depth: usize,
    query: Vec3,
    best: &mut Option<(usize, f32)>,
) {
    if entries.is_empty() {
        return;
    }

    let axis = depth % 3;
    let mid = entries.len() / 2;
    let point = entries[mid].0;

    let d2 = point.distance_squared(query);
    if best.is_none_or(|(_, b)| d2 < b) {
        *best = Some((offset + mid, d2));
    }

    let delta = query[axis] - point[axis];
    let (near, near_offset, far, far_offset) = if delta < 0.0 {
        (&entries[..mid], offset, &entries[mid + 1..], offset + mid + 1)
    } else {
        (&entries[mid + 1..], offset + mid + 1, &entries[..mid], offset)
    };

    search(near, near_offset, depth + 1, query, best);
    if best.is_none_or(|(_, b)| delta * delta < b) {
        search(far, far_offset, depth + 1, query, best);
    }
}
