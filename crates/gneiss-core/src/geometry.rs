use crate::glam::{DMat4, DVec3, IVec3};

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: DVec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        self.center.distance_squared(p) <= self.radius * self.radius
    }

    pub fn contains(&self, other: &Self) -> bool {
        let dist = self.center.distance(other.center);
        dist + other.radius < self.radius
    }

    pub fn intersects(&self, other: &Self) -> bool {
        let dist = self.center.distance(other.center);
        dist - other.radius < self.radius
    }

    /// `[min, max]` corners of the bounding box.
    pub fn aabb(&self) -> [DVec3; 2] {
        [
            self.center - DVec3::splat(self.radius),
            self.center + DVec3::splat(self.radius),
        ]
    }
}

/// A convex polyhedron given by its vertices and the vertex indices of each face.
///
/// Faces may be wound either way; the outward direction of every face plane is derived from the vertex centroid.
#[derive(Clone, Debug)]
pub struct Polyhedron {
    vertices: Vec<DVec3>,
    faces: Vec<[usize; 3]>,
}

/// Outward facing plane `normal · p + offset = 0`.
#[derive(Clone, Copy, Debug)]
struct FacePlane {
    normal: DVec3,
    offset: f64,
}

impl Polyhedron {
    /// Each face is described by any three of its (non-collinear) vertices.
    pub fn new(vertices: Vec<DVec3>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// A frustum along +Z with a rectangular cross section. Widths and heights are half extents around the Z axis.
    pub fn square_frustum(
        near_half_width: f64,
        near_half_height: f64,
        near_z: f64,
        far_half_width: f64,
        far_half_height: f64,
        far_z: f64,
    ) -> Self {
        let (nw, nh, fw, fh) = (near_half_width, near_half_height, far_half_width, far_half_height);
        let vertices = vec![
            DVec3::new(-nw, -nh, near_z),
            DVec3::new(nw, -nh, near_z),
            DVec3::new(nw, nh, near_z),
            DVec3::new(-nw, nh, near_z),
            DVec3::new(-fw, -fh, far_z),
            DVec3::new(fw, -fh, far_z),
            DVec3::new(fw, fh, far_z),
            DVec3::new(-fw, fh, far_z),
        ];
        let faces = vec![
            [0, 1, 2], // near
            [4, 5, 6], // far
            [0, 1, 5], // bottom
            [3, 2, 6], // top
            [0, 3, 7], // left
            [1, 2, 6], // right
        ];
        Self::new(vertices, faces)
    }

    pub fn cuboid(min: DVec3, max: DVec3) -> Self {
        let half = 0.5 * (max - min);
        let center = 0.5 * (max + min);
        Self::square_frustum(half.x, half.y, -half.z, half.x, half.y, half.z)
            .transform_affine(&DMat4::from_translation(center))
    }

    pub fn vertices(&self) -> &[DVec3] {
        &self.vertices
    }

    pub fn transform_affine(&self, transform: &DMat4) -> Self {
        Self {
            vertices: self.vertices.iter().map(|&v| transform.transform_point3(v)).collect(),
            faces: self.faces.clone(),
        }
    }

    pub fn centroid(&self) -> DVec3 {
        if self.vertices.is_empty() {
            return DVec3::ZERO;
        }
        self.vertices.iter().copied().sum::<DVec3>() / self.vertices.len() as f64
    }

    /// `[min, max]` corners of the bounding box.
    pub fn aabb(&self) -> [DVec3; 2] {
        let min = self.vertices.iter().copied().fold(DVec3::splat(f64::INFINITY), DVec3::min);
        let max = self.vertices.iter().copied().fold(DVec3::splat(f64::NEG_INFINITY), DVec3::max);
        [min, max]
    }

    fn face_planes(&self) -> Vec<FacePlane> {
        let centroid = self.centroid();
        self.faces
            .iter()
            .filter_map(|&[a, b, c]| {
                let (a, b, c) = (self.vertices[a], self.vertices[b], self.vertices[c]);
                let mut normal = (b - a).cross(c - a);
                if normal.length_squared() == 0.0 {
                    return None;
                }
                if normal.dot(centroid - a) > 0.0 {
                    normal = -normal;
                }
                Some(FacePlane {
                    normal,
                    offset: -normal.dot(a),
                })
            })
            .collect()
    }

    /// Every integer cell `[p, p + 1)³` that overlaps the polyhedron, ordered in shells of growing Chebyshev distance from
    /// the cell containing `center`.
    ///
    /// The overlap test is conservative per face plane, so cells near an edge of the polyhedron may be included even if
    /// they only touch its bounding planes.
    pub fn collect_points_onion(&self, center: DVec3) -> Vec<IVec3> {
        if self.vertices.is_empty() {
            return Vec::new();
        }

        let planes = self.face_planes();
        let [min, max] = self.aabb();
        let min = min.floor().as_ivec3();
        let max = max.ceil().as_ivec3();

        let mut points = Vec::new();
        for z in min.z..max.z {
            for y in min.y..max.y {
                for x in min.x..max.x {
                    let p = IVec3::new(x, y, z);
                    let cell_center = p.as_dvec3() + DVec3::splat(0.5);
                    let overlaps = planes.iter().all(|plane| {
                        let reach = 0.5 * plane.normal.abs().element_sum();
                        plane.normal.dot(cell_center) + plane.offset < reach
                    });
                    if overlaps {
                        points.push(p);
                    }
                }
            }
        }

        let center = center.floor().as_ivec3();
        // Stable, so each shell keeps the scan order.
        points.sort_by_key(|p| (*p - center).abs().max_element());
        points
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
