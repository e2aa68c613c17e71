//! Geometric foundation for the guiding structure: points, vectors,
//! and axis-aligned bounding boxes in 2D and 3D.
//!
//! Directions on the sphere are handled as unit **Vector3f**s;
//! positions inside the directional quadtree live on the unit square
//! as **Point2f**s. The bounding boxes carry the intersection and
//! volume queries the spatial and directional splatting filters rely
//! on.

// pbrt
use crate::core::gpt::Float;

// see geometry.h

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Point2f {
    pub x: Float,
    pub y: Float,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vector2f {
    pub x: Float,
    pub y: Float,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Point3f {
    pub x: Float,
    pub y: Float,
    pub z: Float,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vector3f {
    pub x: Float,
    pub y: Float,
    pub z: Float,
}

impl Point2f {
    pub fn new(x: Float, y: Float) -> Self {
        Point2f { x, y }
    }
}

impl std::ops::Add<Vector2f> for Point2f {
    type Output = Point2f;
    fn add(self, rhs: Vector2f) -> Point2f {
        Point2f {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Point2f {
    type Output = Vector2f;
    fn sub(self, rhs: Point2f) -> Vector2f {
        Vector2f {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Sub<Vector2f> for Point2f {
    type Output = Point2f;
    fn sub(self, rhs: Vector2f) -> Point2f {
        Point2f {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<Float> for Point2f {
    type Output = Point2f;
    fn mul(self, rhs: Float) -> Point2f {
        Point2f {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl std::ops::Index<u8> for Point2f {
    type Output = Float;
    fn index(&self, index: u8) -> &Float {
        match index {
            0 => &self.x,
            1 => &self.y,
            _ => panic!("Check failed: i >= 0 && i <= 1"),
        }
    }
}

impl Vector2f {
    pub fn new(x: Float, y: Float) -> Self {
        Vector2f { x, y }
    }
}

impl std::ops::Mul<Float> for Vector2f {
    type Output = Vector2f;
    fn mul(self, rhs: Float) -> Vector2f {
        Vector2f {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl std::ops::Index<u8> for Vector2f {
    type Output = Float;
    fn index(&self, index: u8) -> &Float {
        match index {
            0 => &self.x,
            1 => &self.y,
            _ => panic!("Check failed: i >= 0 && i <= 1"),
        }
    }
}

impl Point3f {
    pub fn new(x: Float, y: Float, z: Float) -> Self {
        Point3f { x, y, z }
    }
}

impl std::ops::Add<Vector3f> for Point3f {
    type Output = Point3f;
    fn add(self, rhs: Vector3f) -> Point3f {
        Point3f {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl std::ops::Sub for Point3f {
    type Output = Vector3f;
    fn sub(self, rhs: Point3f) -> Vector3f {
        Vector3f {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Sub<Vector3f> for Point3f {
    type Output = Point3f;
    fn sub(self, rhs: Vector3f) -> Point3f {
        Point3f {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Index<u8> for Point3f {
    type Output = Float;
    fn index(&self, index: u8) -> &Float {
        match index {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Check failed: i >= 0 && i <= 2"),
        }
    }
}

impl std::ops::IndexMut<u8> for Point3f {
    fn index_mut(&mut self, index: u8) -> &mut Float {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("Check failed: i >= 0 && i <= 2"),
        }
    }
}

impl Vector3f {
    pub fn new(x: Float, y: Float, z: Float) -> Self {
        Vector3f { x, y, z }
    }
    pub fn length_squared(&self) -> Float {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
    pub fn length(&self) -> Float {
        self.length_squared().sqrt()
    }
}

impl std::ops::Add for Vector3f {
    type Output = Vector3f;
    fn add(self, rhs: Vector3f) -> Vector3f {
        Vector3f {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl std::ops::Sub for Vector3f {
    type Output = Vector3f;
    fn sub(self, rhs: Vector3f) -> Vector3f {
        Vector3f {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Mul<Float> for Vector3f {
    type Output = Vector3f;
    fn mul(self, rhs: Float) -> Vector3f {
        Vector3f {
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

impl std::ops::Neg for Vector3f {
    type Output = Vector3f;
    fn neg(self) -> Vector3f {
        Vector3f {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

impl std::ops::Index<u8> for Vector3f {
    type Output = Float;
    fn index(&self, index: u8) -> &Float {
        match index {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Check failed: i >= 0 && i <= 2"),
        }
    }
}

impl std::ops::IndexMut<u8> for Vector3f {
    fn index_mut(&mut self, index: u8) -> &mut Float {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("Check failed: i >= 0 && i <= 2"),
        }
    }
}

/// Product of the Cartesian components of two vectors.
pub fn vec3_dot_vec3(v1: &Vector3f, v2: &Vector3f) -> Float {
    v1.x * v2.x + v1.y * v2.y + v1.z * v2.z
}

/// Compute a new vector pointing in the same direction but with unit
/// length.
pub fn vec3_normalize(v: &Vector3f) -> Vector3f {
    *v * (1.0 as Float / v.length())
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Bounds2f {
    pub p_min: Point2f,
    pub p_max: Point2f,
}

impl Bounds2f {
    pub fn new(p1: Point2f, p2: Point2f) -> Self {
        Bounds2f {
            p_min: Point2f {
                x: p1.x.min(p2.x),
                y: p1.y.min(p2.y),
            },
            p_max: Point2f {
                x: p1.x.max(p2.x),
                y: p1.y.max(p2.y),
            },
        }
    }
    pub fn diagonal(&self) -> Vector2f {
        self.p_max - self.p_min
    }
    pub fn area(&self) -> Float {
        let d: Vector2f = self.p_max - self.p_min;
        d.x * d.y
    }
    /// An intersection of disjoint boxes produces an inverted box;
    /// such boxes must be rejected before their area is used.
    pub fn is_valid(&self) -> bool {
        self.p_min.x <= self.p_max.x && self.p_min.y <= self.p_max.y
    }
}

/// The intersection of two bounding boxes can be found by computing
/// the maximum of their two respective minimum coordinates and the
/// minimum of their maximum coordinates.
pub fn bnd2_intersect_bnd2f(b1: &Bounds2f, b2: &Bounds2f) -> Bounds2f {
    Bounds2f {
        p_min: Point2f {
            x: b1.p_min.x.max(b2.p_min.x),
            y: b1.p_min.y.max(b2.p_min.y),
        },
        p_max: Point2f {
            x: b1.p_max.x.min(b2.p_max.x),
            y: b1.p_max.y.min(b2.p_max.y),
        },
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Bounds3f {
    pub p_min: Point3f,
    pub p_max: Point3f,
}

// work around bug
// https://github.com/rust-lang/rust/issues/40395
impl Default for Bounds3f {
    fn default() -> Bounds3f {
        let min_num: Float = std::f32::MIN;
        let max_num: Float = std::f32::MAX;
        Bounds3f {
            p_min: Point3f {
                x: max_num,
                y: max_num,
                z: max_num,
            },
            p_max: Point3f {
                x: min_num,
                y: min_num,
                z: min_num,
            },
        }
    }
}

impl Bounds3f {
    pub fn new(p1: Point3f, p2: Point3f) -> Self {
        Bounds3f {
            p_min: Point3f {
                x: p1.x.min(p2.x),
                y: p1.y.min(p2.y),
                z: p1.z.min(p2.z),
            },
            p_max: Point3f {
                x: p1.x.max(p2.x),
                y: p1.y.max(p2.y),
                z: p1.z.max(p2.z),
            },
        }
    }
    pub fn diagonal(&self) -> Vector3f {
        self.p_max - self.p_min
    }
    pub fn offset(&self, p: &Point3f) -> Vector3f {
        let mut o: Vector3f = *p - self.p_min;
        if self.p_max.x > self.p_min.x {
            o.x /= self.p_max.x - self.p_min.x;
        }
        if self.p_max.y > self.p_min.y {
            o.y /= self.p_max.y - self.p_min.y;
        }
        if self.p_max.z > self.p_min.z {
            o.z /= self.p_max.z - self.p_min.z;
        }
        o
    }
    pub fn volume(&self) -> Float {
        let d: Vector3f = self.diagonal();
        d.x * d.y * d.z
    }
    pub fn is_valid(&self) -> bool {
        self.p_min.x <= self.p_max.x
            && self.p_min.y <= self.p_max.y
            && self.p_min.z <= self.p_max.z
    }
}

/// The intersection of two bounding boxes can be found by computing
/// the maximum of their two respective minimum coordinates and the
/// minimum of their maximum coordinates.
pub fn bnd3_intersect_bnd3f(b1: &Bounds3f, b2: &Bounds3f) -> Bounds3f {
    Bounds3f {
        p_min: Point3f {
            x: b1.p_min.x.max(b2.p_min.x),
            y: b1.p_min.y.max(b2.p_min.y),
            z: b1.p_min.z.max(b2.p_min.z),
        },
        p_max: Point3f {
            x: b1.p_max.x.min(b2.p_max.x),
            y: b1.p_max.y.min(b2.p_max.y),
            z: b1.p_max.z.min(b2.p_max.z),
        },
    }
}
