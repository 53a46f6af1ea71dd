//! The expanding polytope algorithm for penetration depth.

use super::{MinkowskiSupport, SupportPoint};
use crate::fph;
use nalgebra::Vector3;

// Smooth shapes expand the polytope in many small steps, so the cap is more
// generous than GJK's
const MAX_ITERATIONS: usize = 128;
const CONVERGENCE_TOLERANCE: fph = 1e-7;

/// The penetration found by expanding the polytope: the outward hull normal
/// at the feature nearest the origin, the penetration depth, and the witness
/// points on both shapes (in A's local frame).
pub(crate) struct Penetration {
    pub hull_normal: Vector3<fph>,
    pub depth: fph,
    pub on_a: Vector3<fph>,
    pub on_b: Vector3<fph>,
}

#[derive(Clone, Copy, Debug)]
struct Face {
    vertices: [usize; 3],
    normal: Vector3<fph>,
    distance: fph,
}

/// Expands the given origin-enclosing tetrahedron on the hull of the
/// Minkowski difference until the face nearest the origin stops moving
/// outward, recovering depth and witness points.
///
/// Returns [`None`] if the expansion does not converge within the iteration
/// cap.
pub(crate) fn run_epa(
    support: &MinkowskiSupport<'_>,
    simplex: [SupportPoint; 4],
) -> Option<Penetration> {
    let mut vertices: Vec<SupportPoint> = simplex.to_vec();
    let interior = (vertices[0].minkowski
        + vertices[1].minkowski
        + vertices[2].minkowski
        + vertices[3].minkowski)
        / 4.0;

    let mut faces = Vec::with_capacity(4 + 2 * MAX_ITERATIONS);
    for indices in [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]] {
        faces.push(make_face(&vertices, indices, &interior)?);
    }

    for _ in 0..MAX_ITERATIONS {
        let nearest = *faces
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))?;

        let expansion = support.support(&nearest.normal);
        let expansion_distance = expansion.minkowski.dot(&nearest.normal);

        if expansion_distance - nearest.distance < CONVERGENCE_TOLERANCE {
            return Some(penetration_from_face(&vertices, &nearest));
        }

        // Remove every face visible from the new point and re-triangulate
        // the horizon against it
        let new_vertex_idx = vertices.len();
        vertices.push(expansion);

        let mut horizon: Vec<[usize; 2]> = Vec::new();
        let mut face_idx = 0;
        while face_idx < faces.len() {
            let face = faces[face_idx];
            if face.normal.dot(&(expansion.minkowski - vertices[face.vertices[0]].minkowski))
                > 0.0
            {
                for edge in [
                    [face.vertices[0], face.vertices[1]],
                    [face.vertices[1], face.vertices[2]],
                    [face.vertices[2], face.vertices[0]],
                ] {
                    if let Some(reverse_idx) = horizon
                        .iter()
                        .position(|other| other[0] == edge[1] && other[1] == edge[0])
                    {
                        horizon.swap_remove(reverse_idx);
                    } else {
                        horizon.push(edge);
                    }
                }
                faces.swap_remove(face_idx);
            } else {
                face_idx += 1;
            }
        }

        if horizon.is_empty() {
            return None;
        }
        for edge in horizon {
            faces.push(make_face(
                &vertices,
                [edge[0], edge[1], new_vertex_idx],
                &interior,
            )?);
        }
    }

    None
}

fn make_face(
    vertices: &[SupportPoint],
    indices: [usize; 3],
    interior: &Vector3<fph>,
) -> Option<Face> {
    let [a, b, c] = indices.map(|idx| vertices[idx].minkowski);
    let mut normal = (b - a).cross(&(c - a));
    let norm = normal.norm();
    if norm < 1e-12 {
        // Degenerate sliver face; the polytope cannot be expanded reliably
        return None;
    }
    normal /= norm;
    if normal.dot(&(a - interior)) < 0.0 {
        normal = -normal;
    }
    Some(Face {
        vertices: indices,
        normal,
        distance: normal.dot(&a),
    })
}

fn penetration_from_face(vertices: &[SupportPoint], face: &Face) -> Penetration {
    let [a, b, c] = face.vertices.map(|idx| vertices[idx]);

    // Barycentric coordinates of the origin's projection onto the face plane
    let projection = face.normal * face.distance;
    let weights = barycentric_weights(
        &a.minkowski,
        &b.minkowski,
        &c.minkowski,
        &projection,
    );

    let on_a = weights[0] * a.on_a + weights[1] * b.on_a + weights[2] * c.on_a;
    let on_b = weights[0] * a.on_b + weights[1] * b.on_b + weights[2] * c.on_b;

    Penetration {
        hull_normal: face.normal,
        depth: face.distance,
        on_a,
        on_b,
    }
}

fn barycentric_weights(
    a: &Vector3<fph>,
    b: &Vector3<fph>,
    c: &Vector3<fph>,
    point: &Vector3<fph>,
) -> [fph; 3] {
    let v_0 = b - a;
    let v_1 = c - a;
    let v_2 = point - a;

    let d_00 = v_0.dot(&v_0);
    let d_01 = v_0.dot(&v_1);
    let d_11 = v_1.dot(&v_1);
    let d_20 = v_2.dot(&v_0);
    let d_21 = v_2.dot(&v_1);

    let denom = d_00 * d_11 - d_01 * d_01;
    if denom.abs() < 1e-18 {
        return [1.0, 0.0, 0.0];
    }

    let v = (d_11 * d_20 - d_01 * d_21) / denom;
    let w = (d_00 * d_21 - d_01 * d_20) / denom;
    [1.0 - v - w, v, w]
}
