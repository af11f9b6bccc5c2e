// q_shared.rs -- foundational types and functions shared by all modules

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// angle indexes
pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

// ============================================================
// Contents
//
// Leaf contents are stored as negative clip-node children.
// ============================================================

pub const CONTENTS_EMPTY: i32 = -1;
pub const CONTENTS_SOLID: i32 = -2;
pub const CONTENTS_WATER: i32 = -3;
pub const CONTENTS_SLIME: i32 = -4;
pub const CONTENTS_LAVA: i32 = -5;
pub const CONTENTS_SKY: i32 = -6;

pub const CONTENTS_CURRENT_0: i32 = -9;
pub const CONTENTS_CURRENT_90: i32 = -10;
pub const CONTENTS_CURRENT_180: i32 = -11;
pub const CONTENTS_CURRENT_270: i32 = -12;
pub const CONTENTS_CURRENT_UP: i32 = -13;
pub const CONTENTS_CURRENT_DOWN: i32 = -14;

/// Water, slime, lava and currents all classify as liquid.
#[inline]
pub fn contents_is_liquid(contents: i32) -> bool {
    contents <= CONTENTS_WATER
}

// ============================================================
// Plane
// ============================================================

/// Plane types 0-2 are axial (normal along x, y or z).
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANYX: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
    pub signbits: u8,
}

impl Default for CPlane {
    fn default() -> Self {
        Self {
            normal: [0.0; 3],
            dist: 0.0,
            plane_type: PLANE_ANYX,
            signbits: 0,
        }
    }
}

impl CPlane {
    /// Build a plane and fill in its type and sign bits.
    pub fn new(normal: Vec3, dist: f32) -> Self {
        let plane_type = if normal[0] == 1.0 {
            PLANE_X
        } else if normal[1] == 1.0 {
            PLANE_Y
        } else if normal[2] == 1.0 {
            PLANE_Z
        } else {
            PLANE_ANYX
        };
        let mut p = Self {
            normal,
            dist,
            plane_type,
            signbits: 0,
        };
        p.signbits = signbits_for_plane(&p);
        p
    }

    /// An axial plane with a positive normal along `axis`.
    pub fn axial(axis: usize, dist: f32) -> Self {
        let mut normal = [0.0; 3];
        normal[axis] = 1.0;
        Self::new(normal, dist)
    }

    /// Signed distance from the plane, using the axial fast path when possible.
    #[inline]
    pub fn distance_to(&self, p: &Vec3) -> f32 {
        if self.plane_type < 3 {
            p[self.plane_type as usize] - self.dist
        } else {
            dot_product(&self.normal, p) - self.dist
        }
    }
}

/// For fast box-on-plane-side tests.
pub fn signbits_for_plane(p: &CPlane) -> u8 {
    let mut bits = 0u8;
    for j in 0..3 {
        if p.normal[j] < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if p.plane_type < 3 {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // general case: pick the nearest and farthest corners from the sign bits
    let mut near = [0.0f32; 3];
    let mut far = [0.0f32; 3];
    for j in 0..3 {
        if p.signbits & (1 << j) != 0 {
            far[j] = emins[j];
            near[j] = emaxs[j];
        } else {
            far[j] = emaxs[j];
            near[j] = emins[j];
        }
    }
    let dist1 = dot_product(&p.normal, &far);
    let dist2 = dot_product(&p.normal, &near);

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Trace
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trace {
    /// if true, plane is not valid
    pub allsolid: bool,
    /// if true, the initial point was in a solid area
    pub startsolid: bool,
    pub inopen: bool,
    pub inwater: bool,
    /// time completed, 1.0 = didn't hit anything
    pub fraction: f32,
    pub endpos: Vec3,
    pub plane: CPlane,
    /// entity (or physent) the surface is on, -1 = none
    pub ent: i32,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            inopen: false,
            inwater: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: CPlane::default(),
            ent: -1,
        }
    }
}

impl Trace {
    /// The starting state for a clip: nothing hit yet, but assumed to be
    /// entirely in solid until a non-solid leaf is reached.
    pub fn unclipped(end: &Vec3) -> Self {
        Self {
            allsolid: true,
            endpos: *end,
            ..Self::default()
        }
    }
}

// ============================================================
// Button bits
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Buttons: u8 {
        const ATTACK = 1;
        const JUMP   = 2;
    }
}
pub const BUTTON_ATTACK: Buttons = Buttons::ATTACK;
pub const BUTTON_JUMP: Buttons = Buttons::JUMP;

// ============================================================
// Usercmd
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserCmd {
    pub msec: u8,
    pub angles: Vec3,
    pub forwardmove: i16,
    pub sidemove: i16,
    pub upmove: i16,
    pub buttons: Buttons,
}

impl UserCmd {
    /// Serialize the fields that must agree between endpoints, for checksums.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 12 + 6 + 1);
        out.push(self.msec);
        for a in &self.angles {
            out.extend_from_slice(&a.to_le_bytes());
        }
        out.extend_from_slice(&self.forwardmove.to_le_bytes());
        out.extend_from_slice(&self.sidemove.to_le_bytes());
        out.extend_from_slice(&self.upmove.to_le_bytes());
        out.push(self.buttons.bits());
        out
    }
}

// ============================================================
// MATHLIB -- Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// veca + scale * vecb
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

// ============================================================
// Angle functions
// ============================================================

/// Returns (forward, right, up) for the given pitch/yaw/roll in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let angle_yaw = angles[YAW].to_radians();
    let sy = angle_yaw.sin();
    let cy = angle_yaw.cos();

    let angle_pitch = angles[PITCH].to_radians();
    let sp = angle_pitch.sin();
    let cp = angle_pitch.cos();

    let angle_roll = angles[ROLL].to_radians();
    let sr = angle_roll.sin();
    let cr = angle_roll.cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + -cr * -sy,
        -sr * sp * sy + -cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + -sr * -sy,
        cr * sp * sy + -sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_vectors_identity() {
        let (f, r, u) = angle_vectors(&[0.0, 0.0, 0.0]);
        assert!((f[0] - 1.0).abs() < 1e-6 && f[1].abs() < 1e-6 && f[2].abs() < 1e-6);
        // right points down -y for a zero yaw
        assert!((r[1] + 1.0).abs() < 1e-6, "right={:?}", r);
        assert!((u[2] - 1.0).abs() < 1e-6, "up={:?}", u);
    }

    #[test]
    fn test_angle_vectors_yaw_90() {
        let (f, _, _) = angle_vectors(&[0.0, 90.0, 0.0]);
        assert!(f[0].abs() < 1e-6, "forward.x={}", f[0]);
        assert!((f[1] - 1.0).abs() < 1e-6, "forward.y={}", f[1]);
    }

    #[test]
    fn test_plane_type_classification() {
        assert_eq!(CPlane::new([1.0, 0.0, 0.0], 4.0).plane_type, PLANE_X);
        assert_eq!(CPlane::new([0.0, 0.0, 1.0], 4.0).plane_type, PLANE_Z);
        let n = 1.0 / 2.0f32.sqrt();
        let p = CPlane::new([-n, 0.0, n], 0.0);
        assert_eq!(p.plane_type, PLANE_ANYX);
        assert_eq!(p.signbits, 1);
    }

    #[test]
    fn test_distance_to_matches_dot_product() {
        let n = 1.0 / 2.0f32.sqrt();
        let p = CPlane::new([n, n, 0.0], 10.0);
        let pt = [10.0, 10.0, 3.0];
        let expected = dot_product(&p.normal, &pt) - 10.0;
        assert!((p.distance_to(&pt) - expected).abs() < 1e-6);

        let axial = CPlane::axial(2, 24.0);
        assert_eq!(axial.distance_to(&[0.0, 0.0, 30.0]), 6.0);
    }

    #[test]
    fn test_box_on_plane_side_axial() {
        let p = CPlane::axial(0, 0.0);
        assert_eq!(box_on_plane_side(&[1.0, -1.0, -1.0], &[2.0, 1.0, 1.0], &p), 1);
        assert_eq!(box_on_plane_side(&[-2.0, -1.0, -1.0], &[-1.0, 1.0, 1.0], &p), 2);
        assert_eq!(box_on_plane_side(&[-1.0, -1.0, -1.0], &[1.0, 1.0, 1.0], &p), 3);
    }

    #[test]
    fn test_box_on_plane_side_general() {
        let n = 1.0 / 2.0f32.sqrt();
        let p = CPlane::new([n, n, 0.0], 0.0);
        assert_eq!(box_on_plane_side(&[1.0, 1.0, 0.0], &[2.0, 2.0, 1.0], &p), 1);
        assert_eq!(box_on_plane_side(&[-2.0, -2.0, 0.0], &[-1.0, -1.0, 1.0], &p), 2);
        assert_eq!(box_on_plane_side(&[-1.0, -1.0, 0.0], &[1.0, 1.0, 1.0], &p), 3);
    }

    #[test]
    fn test_liquid_classification() {
        assert!(!contents_is_liquid(CONTENTS_EMPTY));
        assert!(!contents_is_liquid(CONTENTS_SOLID));
        assert!(contents_is_liquid(CONTENTS_WATER));
        assert!(contents_is_liquid(CONTENTS_LAVA));
        assert!(contents_is_liquid(CONTENTS_CURRENT_DOWN));
    }

    #[test]
    fn test_trace_unclipped() {
        let t = Trace::unclipped(&[1.0, 2.0, 3.0]);
        assert!(t.allsolid);
        assert!(!t.startsolid);
        assert_eq!(t.fraction, 1.0);
        assert_eq!(t.endpos, [1.0, 2.0, 3.0]);
        assert_eq!(t.ent, -1);
    }

    #[test]
    fn test_usercmd_bytes_differ_on_buttons() {
        let a = UserCmd { msec: 16, ..Default::default() };
        let mut b = a;
        b.buttons = BUTTON_JUMP;
        assert_ne!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.to_bytes().len(), 20);
    }
}
