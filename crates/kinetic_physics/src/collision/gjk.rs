//! The Gilbert–Johnson–Keerthi intersection test.

use super::{MinkowskiSupport, SupportPoint};
use crate::fph;
use nalgebra::Vector3;

const MAX_ITERATIONS: usize = 64;

/// The outcome of a GJK run.
pub(crate) enum GjkResult {
    /// The shapes overlap; the simplex is a tetrahedron enclosing the origin
    /// in Minkowski-difference space.
    Intersecting([SupportPoint; 4]),
    /// A separating direction was found.
    Disjoint,
    /// The iteration cap was reached without a verdict.
    OutOfIterations,
}

/// A simplex of up to four Minkowski support points. The most recently added
/// point is always last.
struct Simplex {
    points: [SupportPoint; 4],
    len: usize,
}

impl Simplex {
    fn new() -> Self {
        Self {
            points: [SupportPoint::default(); 4],
            len: 0,
        }
    }

    fn push(&mut self, point: SupportPoint) {
        self.points[self.len] = point;
        self.len += 1;
    }

    fn set(&mut self, points: &[SupportPoint]) {
        self.points[..points.len()].copy_from_slice(points);
        self.len = points.len();
    }
}

/// Runs GJK on the given Minkowski support function, seeding the search with
/// the given direction.
pub(crate) fn run_gjk(support: &MinkowskiSupport<'_>, initial_direction: Vector3<fph>) -> GjkResult {
    let mut direction = initial_direction;
    let mut simplex = Simplex::new();

    let first = support.support(&direction);
    simplex.push(first);
    direction = -first.minkowski;

    for _ in 0..MAX_ITERATIONS {
        if direction.norm_squared() < 1e-24 {
            // The origin lies on the current simplex; nudge the search so a
            // full tetrahedron can still be built
            direction = Vector3::x();
        }

        let point = support.support(&direction);
        if point.minkowski.dot(&direction) < 0.0 {
            return GjkResult::Disjoint;
        }
        simplex.push(point);

        if update_simplex(&mut simplex, &mut direction) {
            return GjkResult::Intersecting(simplex.points);
        }
    }

    GjkResult::OutOfIterations
}

/// Reduces the simplex to the feature nearest the origin and sets the next
/// search direction. Returns whether the origin is enclosed.
fn update_simplex(simplex: &mut Simplex, direction: &mut Vector3<fph>) -> bool {
    match simplex.len {
        2 => {
            update_line(simplex, direction);
            false
        }
        3 => {
            update_triangle(simplex, direction);
            false
        }
        4 => update_tetrahedron(simplex, direction),
        _ => unreachable!("Simplex with invalid point count"),
    }
}

fn update_line(simplex: &mut Simplex, direction: &mut Vector3<fph>) {
    let a = simplex.points[1];
    let b = simplex.points[0];
    let ab = b.minkowski - a.minkowski;
    let ao = -a.minkowski;

    if ab.dot(&ao) > 0.0 {
        *direction = ab.cross(&ao).cross(&ab);
    } else {
        simplex.set(&[a]);
        *direction = ao;
    }
}

fn update_triangle(simplex: &mut Simplex, direction: &mut Vector3<fph>) {
    let a = simplex.points[2];
    let b = simplex.points[1];
    let c = simplex.points[0];

    let ab = b.minkowski - a.minkowski;
    let ac = c.minkowski - a.minkowski;
    let ao = -a.minkowski;
    let abc = ab.cross(&ac);

    if abc.cross(&ac).dot(&ao) > 0.0 {
        if ac.dot(&ao) > 0.0 {
            simplex.set(&[c, a]);
            *direction = ac.cross(&ao).cross(&ac);
        } else {
            simplex.set(&[b, a]);
            update_line(simplex, direction);
        }
    } else if ab.cross(&abc).dot(&ao) > 0.0 {
        simplex.set(&[b, a]);
        update_line(simplex, direction);
    } else if abc.dot(&ao) > 0.0 {
        *direction = abc;
    } else {
        // Origin below the triangle: flip the winding so the normal faces it
        simplex.set(&[b, c, a]);
        *direction = -abc;
    }
}

fn update_tetrahedron(simplex: &mut Simplex, direction: &mut Vector3<fph>) -> bool {
    let a = simplex.points[3];
    let b = simplex.points[2];
    let c = simplex.points[1];
    let d = simplex.points[0];

    let ab = b.minkowski - a.minkowski;
    let ac = c.minkowski - a.minkowski;
    let ad = d.minkowski - a.minkowski;
    let ao = -a.minkowski;

    // Face normals oriented away from the excluded vertex
    let abc = oriented_away(ab.cross(&ac), &ad);
    let acd = oriented_away(ac.cross(&ad), &ab);
    let adb = oriented_away(ad.cross(&ab), &ac);

    if abc.dot(&ao) > 0.0 {
        simplex.set(&[c, b, a]);
        update_triangle(simplex, direction);
        return false;
    }
    if acd.dot(&ao) > 0.0 {
        simplex.set(&[d, c, a]);
        update_triangle(simplex, direction);
        return false;
    }
    if adb.dot(&ao) > 0.0 {
        simplex.set(&[b, d, a]);
        update_triangle(simplex, direction);
        return false;
    }

    true
}

fn oriented_away(normal: Vector3<fph>, excluded_direction: &Vector3<fph>) -> Vector3<fph> {
    if normal.dot(excluded_direction) > 0.0 {
        -normal
    } else {
        normal
    }
}
