// cmodel.rs -- clip hulls and swept-point tracing
//
// A hull is a binary tree of clip-nodes; each leaf is a contents value stored
// as a negative child. Hulls are pre-expanded by a bounding box, so a box
// sweep becomes a point sweep through the matching hull.

use rayon::prelude::*;

use crate::common::com_dprintf;
use crate::q_shared::{
    CPlane, Trace, Vec3, CONTENTS_CURRENT_DOWN, CONTENTS_EMPTY, CONTENTS_SOLID,
};

// ============================================================
// Constants
// ============================================================

/// 1/32 epsilon to keep floating point happy
pub const DIST_EPSILON: f32 = 0.03125;

pub const MAX_MAP_HULLS: usize = 3;

/// Clip sizes for hulls 0 (point), 1 (player) and 2 (large monster).
pub const HULL_SIZES: [(Vec3, Vec3); MAX_MAP_HULLS] = [
    ([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]),
    ([-16.0, -16.0, -24.0], [16.0, 16.0, 32.0]),
    ([-32.0, -32.0, -24.0], [32.0, 32.0, 64.0]),
];

// ============================================================
// Errors
// ============================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("bad node number {0}")]
    BadNodeNumber(i32),
    #[error("malformed hull: {0}")]
    MalformedHull(String),
    #[error("entity {0} is SOLID_BSP without a brush model")]
    NonBspModel(usize),
    #[error("trigger entity {0} in a clipping list")]
    TriggerInClipList(usize),
}

// ============================================================
// Hull
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipNode {
    pub planenum: usize,
    /// negative numbers are contents
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Default)]
pub struct Hull {
    pub clipnodes: Vec<ClipNode>,
    pub planes: Vec<CPlane>,
    /// head of the tree; negative when the whole hull is a single leaf
    pub firstclipnode: i32,
    pub lastclipnode: i32,
    pub clip_mins: Vec3,
    pub clip_maxs: Vec3,
}

impl Hull {
    /// Build a hull, checking that every child and plane reference is in range.
    pub fn new(
        clipnodes: Vec<ClipNode>,
        planes: Vec<CPlane>,
        firstclipnode: i32,
        lastclipnode: i32,
        clip_mins: Vec3,
        clip_maxs: Vec3,
    ) -> Result<Self, GeometryError> {
        if firstclipnode >= 0
            && (firstclipnode > lastclipnode || lastclipnode as usize >= clipnodes.len())
        {
            return Err(GeometryError::MalformedHull(format!(
                "clip node range {}..={} with {} nodes",
                firstclipnode,
                lastclipnode,
                clipnodes.len()
            )));
        }
        if firstclipnode < 0 && firstclipnode < CONTENTS_CURRENT_DOWN {
            return Err(GeometryError::MalformedHull(format!(
                "bad head contents {}",
                firstclipnode
            )));
        }

        if firstclipnode >= 0 {
            for num in firstclipnode..=lastclipnode {
                let node = &clipnodes[num as usize];
                if node.planenum >= planes.len() {
                    return Err(GeometryError::MalformedHull(format!(
                        "node {} references plane {} of {}",
                        num,
                        node.planenum,
                        planes.len()
                    )));
                }
                for &child in &node.children {
                    let ok = if child >= 0 {
                        child >= firstclipnode && child <= lastclipnode
                    } else {
                        child >= CONTENTS_CURRENT_DOWN
                    };
                    if !ok {
                        return Err(GeometryError::MalformedHull(format!(
                            "node {} has bad child {}",
                            num, child
                        )));
                    }
                }
            }
        }

        Ok(Self {
            clipnodes,
            planes,
            firstclipnode,
            lastclipnode,
            clip_mins,
            clip_maxs,
        })
    }

    #[inline]
    fn node(&self, num: i32) -> Result<&ClipNode, GeometryError> {
        if num < self.firstclipnode || num > self.lastclipnode {
            return Err(GeometryError::BadNodeNumber(num));
        }
        self.clipnodes
            .get(num as usize)
            .ok_or(GeometryError::BadNodeNumber(num))
    }

    #[inline]
    fn plane(&self, node: &ClipNode) -> Result<&CPlane, GeometryError> {
        self.planes.get(node.planenum).ok_or_else(|| {
            GeometryError::MalformedHull(format!("plane {} out of range", node.planenum))
        })
    }
}

// ============================================================
// HullPointContents
// ============================================================

pub fn hull_point_contents(hull: &Hull, mut num: i32, p: &Vec3) -> Result<i32, GeometryError> {
    while num >= 0 {
        let node = hull.node(num)?;
        let plane = hull.plane(node)?;
        let d = plane.distance_to(p);
        num = if d < 0.0 {
            node.children[1]
        } else {
            node.children[0]
        };
    }
    Ok(num)
}

// ============================================================
// RecursiveHullCheck
// ============================================================

#[inline]
fn lerp_point(p1: &Vec3, p2: &Vec3, frac: f32) -> Vec3 {
    [
        p1[0] + frac * (p2[0] - p1[0]),
        p1[1] + frac * (p2[1] - p1[1]),
        p1[2] + frac * (p2[2] - p1[2]),
    ]
}

/// Sweep the segment p1..p2 (covering p1f..p2f of the full move) through the
/// subtree at `num`. Returns Ok(false) once an impact has been recorded in
/// `trace`, Ok(true) to keep going.
pub fn recursive_hull_check(
    hull: &Hull,
    num: i32,
    p1f: f32,
    p2f: f32,
    p1: &Vec3,
    p2: &Vec3,
    trace: &mut Trace,
) -> Result<bool, GeometryError> {
    // check for empty
    if num < 0 {
        if num != CONTENTS_SOLID {
            trace.allsolid = false;
            if num == CONTENTS_EMPTY {
                trace.inopen = true;
            } else {
                trace.inwater = true;
            }
        } else {
            trace.startsolid = true;
        }
        return Ok(true); // empty
    }

    let node = hull.node(num)?;
    let plane = hull.plane(node)?;

    // find the point distances
    let t1 = plane.distance_to(p1);
    let t2 = plane.distance_to(p2);

    if t1 >= 0.0 && t2 >= 0.0 {
        return recursive_hull_check(hull, node.children[0], p1f, p2f, p1, p2, trace);
    }
    if t1 < 0.0 && t2 < 0.0 {
        return recursive_hull_check(hull, node.children[1], p1f, p2f, p1, p2, trace);
    }

    // put the crosspoint DIST_EPSILON pixels on the near side
    let mut frac = if t1 < 0.0 {
        (t1 + DIST_EPSILON) / (t1 - t2)
    } else {
        (t1 - DIST_EPSILON) / (t1 - t2)
    };
    frac = frac.clamp(0.0, 1.0);

    let mut midf = p1f + (p2f - p1f) * frac;
    let mut mid = lerp_point(p1, p2, frac);

    let side = (t1 < 0.0) as usize;

    // move up to the node
    if !recursive_hull_check(hull, node.children[side], p1f, midf, p1, &mid, trace)? {
        return Ok(false);
    }

    if hull_point_contents(hull, node.children[side ^ 1], &mid)? != CONTENTS_SOLID {
        // go past the node
        return recursive_hull_check(hull, node.children[side ^ 1], midf, p2f, &mid, p2, trace);
    }

    if trace.allsolid {
        return Ok(false); // never got out of the solid area
    }

    // the other side of the node is solid, this is the impact point
    trace.plane = if side == 0 {
        *plane
    } else {
        CPlane::new(
            [-plane.normal[0], -plane.normal[1], -plane.normal[2]],
            -plane.dist,
        )
    };

    while hull_point_contents(hull, hull.firstclipnode, &mid)? == CONTENTS_SOLID {
        // shouldn't really happen, but does occasionally
        frac -= 0.1;
        if frac < 0.0 {
            trace.fraction = midf;
            trace.endpos = mid;
            com_dprintf("backup past 0\n");
            return Ok(false);
        }
        midf = p1f + (p2f - p1f) * frac;
        mid = lerp_point(p1, p2, frac);
    }

    trace.fraction = midf;
    trace.endpos = mid;

    Ok(false)
}

// ============================================================
// Box hull
//
// An axial box expressed as a six-node clip tree, so that bounding boxes can
// be clipped against with the same code as brush models.
// ============================================================

fn box_clip_tree(mins: &Vec3, maxs: &Vec3) -> (Vec<ClipNode>, Vec<CPlane>) {
    let mut clipnodes = Vec::with_capacity(6);
    let mut planes = Vec::with_capacity(6);

    for i in 0..6 {
        let side = i & 1;
        let mut children = [0i32; 2];
        children[side] = CONTENTS_EMPTY;
        children[side ^ 1] = if i != 5 { i as i32 + 1 } else { CONTENTS_SOLID };
        clipnodes.push(ClipNode { planenum: i, children });

        let dist = if side == 0 { maxs[i >> 1] } else { mins[i >> 1] };
        planes.push(CPlane::axial(i >> 1, dist));
    }
    (clipnodes, planes)
}

/// A reusable box hull. Each simulation context owns one, so concurrent
/// simulations never share the mutable plane distances.
#[derive(Debug, Clone)]
pub struct BoxHull {
    hull: Hull,
}

impl Default for BoxHull {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxHull {
    pub fn new() -> Self {
        let (clipnodes, planes) = box_clip_tree(&[0.0; 3], &[0.0; 3]);
        Self {
            hull: Hull {
                clipnodes,
                planes,
                firstclipnode: 0,
                lastclipnode: 5,
                clip_mins: [0.0; 3],
                clip_maxs: [0.0; 3],
            },
        }
    }

    /// To keep everything totally uniform, bounding boxes are turned into
    /// small BSP trees instead of being compared directly.
    pub fn hull_for_box(&mut self, mins: &Vec3, maxs: &Vec3) -> &Hull {
        let p = &mut self.hull.planes;
        p[0].dist = maxs[0];
        p[1].dist = mins[0];
        p[2].dist = maxs[1];
        p[3].dist = mins[1];
        p[4].dist = maxs[2];
        p[5].dist = mins[2];
        &self.hull
    }
}

// ============================================================
// Brush models
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChild {
    Node(usize),
    Leaf(usize),
}

/// Visibility tree node, used only to find which leafs an entity touches.
#[derive(Debug, Clone)]
pub struct MNode {
    pub plane: CPlane,
    pub children: [NodeChild; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct MLeaf {
    pub contents: i32,
}

#[derive(Debug, Clone)]
pub struct BrushModel {
    pub name: String,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub hulls: [Hull; MAX_MAP_HULLS],
    /// leaf 0 is the shared solid leaf
    pub nodes: Vec<MNode>,
    pub leafs: Vec<MLeaf>,
}

impl BrushModel {
    pub fn hull(&self, num: usize) -> &Hull {
        &self.hulls[num.min(MAX_MAP_HULLS - 1)]
    }
}

fn collect_hulls<F>(build: F) -> Result<[Hull; MAX_MAP_HULLS], GeometryError>
where
    F: Fn(usize) -> Result<Hull, GeometryError> + Sync + Send,
{
    let hulls = (0..MAX_MAP_HULLS)
        .into_par_iter()
        .map(build)
        .collect::<Result<Vec<_>, _>>()?;
    hulls
        .try_into()
        .map_err(|_| GeometryError::MalformedHull("wrong hull count".to_string()))
}

// ============================================================
// Headless geometry
//
// Worlds made of axial half-spaces, for simulations that run without a
// compiled map. Each slab fills everything on one side of an axial plane;
// earlier slabs take priority where they overlap.
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slab {
    pub axis: usize,
    pub dist: f32,
    /// true: the region below `dist` is filled, false: the region above
    pub below: bool,
    pub contents: i32,
}

impl Slab {
    pub fn below(axis: usize, dist: f32, contents: i32) -> Self {
        Self { axis, dist, below: true, contents }
    }

    pub fn above(axis: usize, dist: f32, contents: i32) -> Self {
        Self { axis, dist, below: false, contents }
    }

    /// Solid ground whose surface is at height `z`.
    pub fn floor(z: f32) -> Self {
        Self::below(2, z, CONTENTS_SOLID)
    }
}

fn slab_hull(slabs: &[Slab], hullnum: usize) -> Result<Hull, GeometryError> {
    let (clip_mins, clip_maxs) = HULL_SIZES[hullnum];

    // liquids only matter to point contents checks
    let kept: Vec<&Slab> = slabs
        .iter()
        .filter(|s| hullnum == 0 || s.contents == CONTENTS_SOLID)
        .collect();

    let count = kept.len();
    let mut clipnodes = Vec::with_capacity(count);
    let mut planes = Vec::with_capacity(count);
    for (i, s) in kept.iter().enumerate() {
        let next = if i + 1 < count { i as i32 + 1 } else { CONTENTS_EMPTY };
        let (dist, children) = if s.below {
            (s.dist - clip_mins[s.axis], [next, s.contents])
        } else {
            (s.dist - clip_maxs[s.axis], [s.contents, next])
        };
        planes.push(CPlane::axial(s.axis, dist));
        clipnodes.push(ClipNode { planenum: i, children });
    }

    let (first, last) = if count == 0 {
        (CONTENTS_EMPTY, -1)
    } else {
        (0, count as i32 - 1)
    };
    Hull::new(clipnodes, planes, first, last, clip_mins, clip_maxs)
}

/// Build a world model out of half-space slabs.
pub fn slab_model(
    name: &str,
    slabs: &[Slab],
    mins: Vec3,
    maxs: Vec3,
) -> Result<BrushModel, GeometryError> {
    for s in slabs {
        if s.axis > 2 || s.contents >= 0 || s.contents < CONTENTS_CURRENT_DOWN {
            return Err(GeometryError::MalformedHull(format!("bad slab {:?}", s)));
        }
    }

    let hulls = collect_hulls(|h| slab_hull(slabs, h))?;

    // leaf 0 solid, leaf 1 the open remainder, then one leaf per slab
    let mut leafs = vec![
        MLeaf { contents: CONTENTS_SOLID },
        MLeaf { contents: CONTENTS_EMPTY },
    ];
    let mut nodes = Vec::with_capacity(slabs.len());
    for (i, s) in slabs.iter().enumerate() {
        leafs.push(MLeaf { contents: s.contents });
        let filled = NodeChild::Leaf(leafs.len() - 1);
        let next = if i + 1 < slabs.len() {
            NodeChild::Node(i + 1)
        } else {
            NodeChild::Leaf(1)
        };
        let children = if s.below { [next, filled] } else { [filled, next] };
        nodes.push(MNode { plane: CPlane::axial(s.axis, s.dist), children });
    }

    Ok(BrushModel {
        name: name.to_string(),
        mins,
        maxs,
        hulls,
        nodes,
        leafs,
    })
}

/// A solid axial box as a brush model, such as a door or a platform.
pub fn box_model(name: &str, mins: Vec3, maxs: Vec3) -> Result<BrushModel, GeometryError> {
    let hulls = collect_hulls(|h| {
        let (clip_mins, clip_maxs) = HULL_SIZES[h];
        let emins = [
            mins[0] - clip_maxs[0],
            mins[1] - clip_maxs[1],
            mins[2] - clip_maxs[2],
        ];
        let emaxs = [
            maxs[0] - clip_mins[0],
            maxs[1] - clip_mins[1],
            maxs[2] - clip_mins[2],
        ];
        let (clipnodes, planes) = box_clip_tree(&emins, &emaxs);
        Hull::new(clipnodes, planes, 0, 5, clip_mins, clip_maxs)
    })?;

    let (_, planes) = box_clip_tree(&mins, &maxs);
    let nodes = planes
        .into_iter()
        .enumerate()
        .map(|(i, plane)| {
            let mut children = [NodeChild::Leaf(1); 2];
            children[(i & 1) ^ 1] = if i != 5 {
                NodeChild::Node(i + 1)
            } else {
                NodeChild::Leaf(0)
            };
            MNode { plane, children }
        })
        .collect();

    Ok(BrushModel {
        name: name.to_string(),
        mins,
        maxs,
        hulls,
        nodes,
        leafs: vec![
            MLeaf { contents: CONTENTS_SOLID },
            MLeaf { contents: CONTENTS_EMPTY },
        ],
    })
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_shared::{CONTENTS_WATER, PLANE_X};

    /// Sweep a point from `start` to `end` through a whole hull.
    fn hull_trace(hull: &Hull, start: &Vec3, end: &Vec3) -> Result<Trace, GeometryError> {
        let mut trace = Trace::unclipped(end);
        recursive_hull_check(hull, hull.firstclipnode, 0.0, 1.0, start, end, &mut trace)?;
        Ok(trace)
    }

    fn flat_world() -> BrushModel {
        slab_model(
            "flat",
            &[Slab::floor(0.0), Slab::below(2, 64.0, CONTENTS_WATER)],
            [-4096.0; 3],
            [4096.0; 3],
        )
        .unwrap()
    }

    #[test]
    fn test_box_hull_layout() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-1.0, -2.0, -3.0], &[1.0, 2.0, 3.0]);
        let dists: Vec<f32> = hull.planes.iter().map(|p| p.dist).collect();
        assert_eq!(dists, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        for (i, node) in hull.clipnodes.iter().enumerate() {
            assert_eq!(hull.planes[node.planenum].plane_type as usize, i >> 1);
            assert_eq!(node.children[i & 1], CONTENTS_EMPTY);
        }
        assert_eq!(hull.clipnodes[5].children[0], CONTENTS_SOLID);
        assert_eq!(hull.clipnodes[0].children[1], 1);
    }

    #[test]
    fn test_box_hull_point_contents() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-8.0; 3], &[8.0; 3]);
        assert_eq!(hull_point_contents(hull, 0, &[0.0; 3]).unwrap(), CONTENTS_SOLID);
        assert_eq!(hull_point_contents(hull, 0, &[9.0, 0.0, 0.0]).unwrap(), CONTENTS_EMPTY);
        assert_eq!(hull_point_contents(hull, 0, &[0.0, 0.0, -9.0]).unwrap(), CONTENTS_EMPTY);
    }

    #[test]
    fn test_trace_stops_at_box_face() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-8.0; 3], &[8.0; 3]);
        let tr = hull_trace(hull, &[-40.0, 0.0, 0.0], &[0.0, 0.0, 0.0]).unwrap();
        assert!(!tr.allsolid && !tr.startsolid);
        // the impact point sits DIST_EPSILON short of the face
        assert!((tr.endpos[0] - (-8.0 - DIST_EPSILON)).abs() < 1e-4, "endpos={:?}", tr.endpos);
        assert!((tr.fraction - (32.0 - DIST_EPSILON) / 40.0).abs() < 1e-5);
        assert_eq!(tr.plane.normal, [-1.0, 0.0, 0.0]);
        assert_eq!(tr.plane.dist, 8.0);
    }

    #[test]
    fn test_trace_positive_side_keeps_plane() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-8.0; 3], &[8.0; 3]);
        let tr = hull_trace(hull, &[40.0, 0.0, 0.0], &[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(tr.plane.normal, [1.0, 0.0, 0.0]);
        assert_eq!(tr.plane.plane_type, PLANE_X);
        assert!(tr.endpos[0] > 8.0);
    }

    #[test]
    fn test_trace_miss() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-8.0; 3], &[8.0; 3]);
        let tr = hull_trace(hull, &[-40.0, 20.0, 0.0], &[40.0, 20.0, 0.0]).unwrap();
        assert_eq!(tr.fraction, 1.0);
        assert!(!tr.allsolid);
        assert!(tr.inopen);
        assert_eq!(tr.endpos, [40.0, 20.0, 0.0]);
    }

    #[test]
    fn test_trace_inside_is_allsolid() {
        let mut bh = BoxHull::new();
        let hull = bh.hull_for_box(&[-8.0; 3], &[8.0; 3]);
        let tr = hull_trace(hull, &[-1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]).unwrap();
        assert!(tr.allsolid);
        assert!(tr.startsolid);
    }

    #[test]
    fn test_trace_out_of_solid_is_startsolid_only() {
        let world = flat_world();
        let tr = hull_trace(world.hull(1), &[0.0, 0.0, 10.0], &[0.0, 0.0, 100.0]).unwrap();
        assert!(tr.startsolid);
        assert!(!tr.allsolid);
        assert_eq!(tr.fraction, 1.0);
    }

    #[test]
    fn test_bad_node_number_is_an_error() {
        let hull = Hull {
            clipnodes: vec![ClipNode { planenum: 0, children: [7, CONTENTS_SOLID] }],
            planes: vec![CPlane::axial(2, 0.0)],
            firstclipnode: 0,
            lastclipnode: 0,
            clip_mins: [0.0; 3],
            clip_maxs: [0.0; 3],
        };
        assert_eq!(
            hull_point_contents(&hull, 0, &[0.0, 0.0, 1.0]),
            Err(GeometryError::BadNodeNumber(7))
        );
        let mut tr = Trace::unclipped(&[0.0; 3]);
        let res = recursive_hull_check(&hull, 0, 0.0, 1.0, &[0.0, 0.0, 5.0], &[0.0, 0.0, 6.0], &mut tr);
        assert_eq!(res, Err(GeometryError::BadNodeNumber(7)));
    }

    #[test]
    fn test_hull_new_rejects_bad_children_and_planes() {
        let bad_child = Hull::new(
            vec![ClipNode { planenum: 0, children: [3, CONTENTS_EMPTY] }],
            vec![CPlane::axial(0, 0.0)],
            0,
            0,
            [0.0; 3],
            [0.0; 3],
        );
        assert!(matches!(bad_child, Err(GeometryError::MalformedHull(_))));

        let bad_plane = Hull::new(
            vec![ClipNode { planenum: 2, children: [CONTENTS_SOLID, CONTENTS_EMPTY] }],
            vec![CPlane::axial(0, 0.0)],
            0,
            0,
            [0.0; 3],
            [0.0; 3],
        );
        assert!(matches!(bad_plane, Err(GeometryError::MalformedHull(_))));
    }

    #[test]
    fn test_slab_hulls_are_expanded() {
        let world = flat_world();
        // player hull: origin must stay 24 units above the floor
        assert_eq!(hull_point_contents(world.hull(1), 0, &[0.0, 0.0, 23.0]).unwrap(), CONTENTS_SOLID);
        assert_eq!(hull_point_contents(world.hull(1), 0, &[0.0, 0.0, 24.0]).unwrap(), CONTENTS_EMPTY);
        // point hull sees the real floor and the water
        assert_eq!(hull_point_contents(world.hull(0), 0, &[0.0, 0.0, -1.0]).unwrap(), CONTENTS_SOLID);
        assert_eq!(hull_point_contents(world.hull(0), 0, &[0.0, 0.0, 10.0]).unwrap(), CONTENTS_WATER);
        assert_eq!(hull_point_contents(world.hull(0), 0, &[0.0, 0.0, 70.0]).unwrap(), CONTENTS_EMPTY);
        // liquids never block movement hulls
        assert_eq!(world.hull(1).clipnodes.len(), 1);
        assert_eq!(world.hull(2).clip_maxs, [32.0, 32.0, 64.0]);
    }

    #[test]
    fn test_empty_slab_world_is_open() {
        let world = slab_model("void", &[], [-1.0; 3], [1.0; 3]).unwrap();
        assert_eq!(hull_point_contents(world.hull(1), world.hull(1).firstclipnode, &[5.0; 3]).unwrap(), CONTENTS_EMPTY);
        let tr = hull_trace(world.hull(1), &[0.0; 3], &[100.0, 0.0, 0.0]).unwrap();
        assert_eq!(tr.fraction, 1.0);
        assert!(!tr.allsolid);
    }

    #[test]
    fn test_slab_model_rejects_bad_slab() {
        let res = slab_model("bad", &[Slab::below(3, 0.0, CONTENTS_SOLID)], [0.0; 3], [0.0; 3]);
        assert!(matches!(res, Err(GeometryError::MalformedHull(_))));
    }

    #[test]
    fn test_slab_node_tree_matches_hull0() {
        let world = flat_world();
        assert_eq!(world.nodes.len(), 2);
        assert_eq!(world.nodes[0].children[1], NodeChild::Leaf(2));
        assert_eq!(world.leafs[2].contents, CONTENTS_SOLID);
        assert_eq!(world.nodes[1].children[0], NodeChild::Leaf(1));
        assert_eq!(world.leafs[3].contents, CONTENTS_WATER);
    }

    #[test]
    fn test_box_model_hulls() {
        let door = box_model("*1", [0.0, -64.0, 0.0], [8.0, 64.0, 128.0]).unwrap();
        // a player origin 17 units in front of the door face is clear, 15 is not
        assert_eq!(hull_point_contents(door.hull(1), 0, &[-17.0, 0.0, 64.0]).unwrap(), CONTENTS_EMPTY);
        assert_eq!(hull_point_contents(door.hull(1), 0, &[-15.0, 0.0, 64.0]).unwrap(), CONTENTS_SOLID);
        assert_eq!(hull_point_contents(door.hull(0), 0, &[-1.0, 0.0, 64.0]).unwrap(), CONTENTS_EMPTY);
        assert_eq!(hull_point_contents(door.hull(0), 0, &[4.0, 0.0, 64.0]).unwrap(), CONTENTS_SOLID);
    }
}
