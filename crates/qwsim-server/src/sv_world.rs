// sv_world.rs -- world query functions
//
// Entity area checking: spatial partitioning via area nodes, linking and
// unlinking entities, trigger touches, box queries, point contents and
// swept-box clipping against the world and every linked entity.

use std::sync::Arc;

use qwsim_common::cmodel::{
    hull_point_contents, recursive_hull_check, BoxHull, BrushModel, GeometryError, Hull, NodeChild,
};
use qwsim_common::common::com_dprintf;
use qwsim_common::pmove::{MoveContext, PhysEnt};
use qwsim_common::q_shared::*;

// ===============================================================================
// ENTITY AREA CHECKING
// ===============================================================================

pub const AREA_DEPTH: i32 = 4;
pub const AREA_NODES: usize = 32;
pub const MAX_ENT_LEAFS: usize = 16;

/// Edict links start after the per-node sentinel pairs.
const EDICT_LINK_BASE: usize = AREA_NODES * 2;

// ============================================================
// Edicts
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Solid {
    /// no interaction with other objects
    #[default]
    Not,
    /// touch on edge, but not blocking
    Trigger,
    /// touch on edge, block
    Bbox,
    /// touch on edge, but not an onground
    SlideBox,
    /// bsp clip, touch on edge, block
    Bsp,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EntFlags: u32 {
        const CLIENT    = 8;
        const MONSTER   = 32;
        /// extra wide size for bonus items
        const ITEM      = 256;
        const ONGROUND  = 512;
        const WATERJUMP = 2048;
    }
}

/// How `sv_move` filters what it clips against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MoveType {
    #[default]
    Normal,
    /// only clip against bsp entities
    NoMonsters,
    /// extra size against monsters
    Missile,
}

/// Which of a node's two lists to gather from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaType {
    Solid,
    Trigger,
}

#[derive(Debug, Clone)]
pub struct Edict {
    pub inuse: bool,
    pub origin: Vec3,
    pub angles: Vec3,
    pub velocity: Vec3,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub absmin: Vec3,
    pub absmax: Vec3,
    pub size: Vec3,
    pub solid: Solid,
    pub flags: EntFlags,
    pub owner: Option<usize>,
    /// nonzero when the entity has a visible model
    pub modelindex: i32,
    /// brush model for SOLID_BSP entities
    pub model: Option<Arc<BrushModel>>,
    /// whether game logic wants touch callbacks for this entity
    pub has_touch: bool,
    pub groundentity: Option<usize>,
    pub waterlevel: i32,
    pub watertype: i32,
    pub num_leafs: usize,
    pub leafnums: [usize; MAX_ENT_LEAFS],
}

impl Default for Edict {
    fn default() -> Self {
        Self {
            inuse: false,
            origin: VEC3_ORIGIN,
            angles: VEC3_ORIGIN,
            velocity: VEC3_ORIGIN,
            mins: VEC3_ORIGIN,
            maxs: VEC3_ORIGIN,
            absmin: VEC3_ORIGIN,
            absmax: VEC3_ORIGIN,
            size: VEC3_ORIGIN,
            solid: Solid::Not,
            flags: EntFlags::empty(),
            owner: None,
            modelindex: 0,
            model: None,
            has_touch: false,
            groundentity: None,
            waterlevel: 0,
            watertype: CONTENTS_EMPTY,
            num_leafs: 0,
            leafnums: [0; MAX_ENT_LEAFS],
        }
    }
}

impl Edict {
    pub fn set_size(&mut self, mins: Vec3, maxs: Vec3) {
        self.mins = mins;
        self.maxs = maxs;
        self.size = vector_subtract(&maxs, &mins);
    }

    fn overlaps(&self, mins: &Vec3, maxs: &Vec3) -> bool {
        !(mins[0] > self.absmax[0]
            || mins[1] > self.absmax[1]
            || mins[2] > self.absmax[2]
            || maxs[0] < self.absmin[0]
            || maxs[1] < self.absmin[1]
            || maxs[2] < self.absmin[2])
    }
}

/// Game logic hook for trigger volumes and solver contacts.
pub trait TouchHandler {
    /// `trigger` touched `other`. The handler may relink entities.
    fn touch(&mut self, world: &mut SvWorld, trigger: usize, other: usize);
}

/// A handler that ignores every touch.
pub struct NoTouch;

impl TouchHandler for NoTouch {
    fn touch(&mut self, _world: &mut SvWorld, _trigger: usize, _other: usize) {}
}

// ============================================================
// Area node (spatial partitioning of entities)
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct AreaNode {
    pub axis: i32, // -1 = leaf node
    pub dist: f32,
    pub children: [usize; 2], // indices into SvWorld::areanodes
}

impl Default for AreaNode {
    fn default() -> Self {
        Self {
            axis: -1,
            dist: 0.0,
            children: [usize::MAX; 2],
        }
    }
}

/// One slot of the link arena. Slots `2n` and `2n + 1` are the trigger and
/// solid list heads of node `n`; edict `e` lives at `EDICT_LINK_BASE + e`.
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

impl Link {
    fn unlinked(idx: usize) -> Self {
        Self { prev: idx, next: idx }
    }
}

fn trigger_head(node: usize) -> usize {
    node * 2
}

fn solid_head(node: usize) -> usize {
    node * 2 + 1
}

fn edict_link(e: usize) -> usize {
    EDICT_LINK_BASE + e
}

// ============================================================
// MoveClip -- internal trace structure
// ============================================================

struct MoveClip {
    boxmins: Vec3,
    boxmaxs: Vec3,
    mins: Vec3,
    maxs: Vec3,
    mins2: Vec3,
    maxs2: Vec3,
    start: Vec3,
    end: Vec3,
    trace: Trace,
    move_type: MoveType,
    passedict: Option<usize>,
}

/// Bounding box of an entire swept move, widened by one unit.
fn move_bounds(start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> (Vec3, Vec3) {
    let mut boxmins = [0.0; 3];
    let mut boxmaxs = [0.0; 3];
    for i in 0..3 {
        if end[i] > start[i] {
            boxmins[i] = start[i] + mins[i] - 1.0;
            boxmaxs[i] = end[i] + maxs[i] + 1.0;
        } else {
            boxmins[i] = end[i] + mins[i] - 1.0;
            boxmaxs[i] = start[i] + maxs[i] + 1.0;
        }
    }
    (boxmins, boxmaxs)
}

/// Returns the hull to clip against plus the offset from hull space to world
/// space.
pub fn hull_for_entity<'a>(
    box_hull: &'a mut BoxHull,
    ent: &'a Edict,
    ent_num: usize,
    mins: &Vec3,
    maxs: &Vec3,
) -> Result<(&'a Hull, Vec3), GeometryError> {
    // decide which clipping hull to use, based on the size
    if ent.solid == Solid::Bsp {
        // explicit hulls in the BSP model
        let model = ent
            .model
            .as_ref()
            .ok_or(GeometryError::NonBspModel(ent_num))?;

        let size = vector_subtract(maxs, mins);
        let hull = if size[0] < 3.0 {
            model.hull(0)
        } else if size[0] <= 32.0 {
            model.hull(1)
        } else {
            model.hull(2)
        };

        // calculate an offset value to center the origin
        let offset = vector_add(&vector_subtract(&hull.clip_mins, mins), &ent.origin);
        return Ok((hull, offset));
    }

    // create a temp hull from bounding box sizes
    let hullmins = vector_subtract(&ent.mins, maxs);
    let hullmaxs = vector_subtract(&ent.maxs, mins);
    Ok((box_hull.hull_for_box(&hullmins, &hullmaxs), ent.origin))
}

// ============================================================
// SvWorld -- edicts, the area tree and its link arena
// ============================================================

pub struct SvWorld {
    pub edicts: Vec<Edict>,
    pub areanodes: Vec<AreaNode>,
    links: Vec<Link>,
    box_hull: BoxHull,
}

impl SvWorld {
    /// Create a world whose edict 0 is the given world model.
    pub fn new(worldmodel: Arc<BrushModel>) -> Self {
        let mins = worldmodel.mins;
        let maxs = worldmodel.maxs;
        let world = Edict {
            inuse: true,
            solid: Solid::Bsp,
            modelindex: 1,
            mins,
            maxs,
            size: vector_subtract(&maxs, &mins),
            model: Some(worldmodel),
            ..Default::default()
        };

        let mut sv = Self {
            edicts: vec![world],
            areanodes: Vec::with_capacity(AREA_NODES),
            links: (0..=EDICT_LINK_BASE).map(Link::unlinked).collect(),
            box_hull: BoxHull::new(),
        };
        sv.clear_world(&mins, &maxs);
        sv
    }

    pub fn worldmodel(&self) -> Option<&Arc<BrushModel>> {
        self.edicts[0].model.as_ref()
    }

    /// Allocate an edict, reusing a freed slot when one exists.
    pub fn spawn(&mut self) -> usize {
        let free = self.edicts.iter().skip(1).position(|e| !e.inuse);
        let e = match free {
            Some(i) => i + 1,
            None => {
                self.edicts.push(Edict::default());
                let e = self.edicts.len() - 1;
                self.links.push(Link::unlinked(edict_link(e)));
                e
            }
        };
        self.edicts[e] = Edict {
            inuse: true,
            ..Default::default()
        };
        e
    }

    pub fn free_edict(&mut self, e: usize) {
        self.unlink_edict(e);
        self.edicts[e] = Edict::default();
    }

    // ================================================================
    // SV_CreateAreaNode
    // ================================================================
    fn create_area_node(&mut self, depth: i32, mins: &Vec3, maxs: &Vec3) -> usize {
        let anode_idx = self.areanodes.len();
        self.areanodes.push(AreaNode::default());

        if depth == AREA_DEPTH {
            return anode_idx;
        }

        let size = vector_subtract(maxs, mins);
        let axis = if size[0] > size[1] { 0 } else { 1 };
        let dist = 0.5 * (maxs[axis] + mins[axis]);

        let mut mins2 = *mins;
        let mut maxs1 = *maxs;
        maxs1[axis] = dist;
        mins2[axis] = dist;

        let child0 = self.create_area_node(depth + 1, &mins2, maxs);
        let child1 = self.create_area_node(depth + 1, mins, &maxs1);

        let node = &mut self.areanodes[anode_idx];
        node.axis = axis as i32;
        node.dist = dist;
        node.children = [child0, child1];
        anode_idx
    }

    // ================================================================
    // SV_ClearWorld
    // ================================================================
    pub fn clear_world(&mut self, world_mins: &Vec3, world_maxs: &Vec3) {
        for (i, link) in self.links.iter_mut().enumerate() {
            *link = Link::unlinked(i);
        }
        self.areanodes.clear();
        self.create_area_node(0, world_mins, world_maxs);
    }

    fn insert_link_before(&mut self, l: usize, before: usize) {
        let prev = self.links[before].prev;
        self.links[l] = Link { prev, next: before };
        self.links[prev].next = l;
        self.links[before].prev = l;
    }

    fn remove_link(&mut self, l: usize) {
        let Link { prev, next } = self.links[l];
        self.links[next].prev = prev;
        self.links[prev].next = next;
        self.links[l] = Link::unlinked(l);
    }

    /// Edicts on one list, in link order.
    fn list_edicts(&self, head: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut l = self.links[head].next;
        while l != head {
            out.push(l - EDICT_LINK_BASE);
            l = self.links[l].next;
        }
        out
    }

    pub fn is_linked(&self, e: usize) -> bool {
        let l = edict_link(e);
        self.links[l].next != l
    }

    /// The area node an edict is currently linked into.
    pub fn linked_node(&self, e: usize) -> Option<usize> {
        if !self.is_linked(e) {
            return None;
        }
        let mut l = self.links[edict_link(e)].next;
        while l >= EDICT_LINK_BASE {
            l = self.links[l].next;
        }
        Some(l / 2)
    }

    // ================================================================
    // SV_UnlinkEdict
    // ================================================================
    pub fn unlink_edict(&mut self, e: usize) {
        if !self.is_linked(e) {
            return; // not linked in anywhere
        }
        self.remove_link(edict_link(e));
    }

    // ================================================================
    // SV_FindTouchedLeafs
    // ================================================================
    fn find_touched_leafs(
        world: &BrushModel,
        ent: &mut Edict,
        node: NodeChild,
    ) -> Result<(), GeometryError> {
        match node {
            NodeChild::Leaf(leafnum) => {
                let leaf = world
                    .leafs
                    .get(leafnum)
                    .ok_or(GeometryError::BadNodeNumber(leafnum as i32))?;
                if leaf.contents == CONTENTS_SOLID {
                    return Ok(());
                }
                if ent.num_leafs == MAX_ENT_LEAFS {
                    return Ok(());
                }
                ent.leafnums[ent.num_leafs] = leafnum;
                ent.num_leafs += 1;
                Ok(())
            }
            NodeChild::Node(n) => {
                let node = world
                    .nodes
                    .get(n)
                    .ok_or(GeometryError::BadNodeNumber(n as i32))?;
                let sides = box_on_plane_side(&ent.absmin, &ent.absmax, &node.plane);

                // recurse down the contacted sides
                if sides & 1 != 0 {
                    Self::find_touched_leafs(world, ent, node.children[0])?;
                }
                if sides & 2 != 0 {
                    Self::find_touched_leafs(world, ent, node.children[1])?;
                }
                Ok(())
            }
        }
    }

    // ================================================================
    // SV_LinkEdict
    // ================================================================
    pub fn link_edict(
        &mut self,
        e: usize,
        touch: Option<&mut dyn TouchHandler>,
    ) -> Result<(), GeometryError> {
        self.unlink_edict(e); // unlink from old position

        if e == 0 {
            return Ok(()); // don't add the world
        }
        if !self.edicts[e].inuse {
            return Ok(());
        }

        let worldmodel = self.edicts[0].model.clone();
        let ent = &mut self.edicts[e];
        ent.size = vector_subtract(&ent.maxs, &ent.mins);

        // set the abs box
        ent.absmin = vector_add(&ent.origin, &ent.mins);
        ent.absmax = vector_add(&ent.origin, &ent.maxs);

        // to make items easier to pick up and allow them to be grabbed off
        // of shelves, the abs sizes are expanded
        if ent.flags.contains(EntFlags::ITEM) {
            for i in 0..2 {
                ent.absmin[i] -= 15.0;
                ent.absmax[i] += 15.0;
            }
        } else {
            // because movement is clipped an epsilon away from an actual edge,
            // we must fully check even when bounding boxes don't quite touch
            for i in 0..3 {
                ent.absmin[i] -= 1.0;
                ent.absmax[i] += 1.0;
            }
        }

        // link to PVS leafs
        ent.num_leafs = 0;
        if ent.modelindex != 0 {
            if let Some(world) = worldmodel.as_deref() {
                if !world.nodes.is_empty() {
                    Self::find_touched_leafs(world, ent, NodeChild::Node(0))?;
                }
            }
        }

        if ent.solid == Solid::Not {
            return Ok(());
        }

        // find the first node that the ent's box crosses
        let absmin = ent.absmin;
        let absmax = ent.absmax;
        let is_trigger = ent.solid == Solid::Trigger;
        let mut node_idx = 0;
        loop {
            let node = &self.areanodes[node_idx];
            if node.axis == -1 {
                break;
            }
            let axis = node.axis as usize;
            if absmin[axis] > node.dist {
                node_idx = node.children[0];
            } else if absmax[axis] < node.dist {
                node_idx = node.children[1];
            } else {
                break; // crosses the node
            }
        }

        // link it in
        let head = if is_trigger {
            trigger_head(node_idx)
        } else {
            solid_head(node_idx)
        };
        self.insert_link_before(edict_link(e), head);

        // if touch_triggers, touch all entities at this node and descend for more
        if let Some(handler) = touch {
            self.touch_links(e, handler);
        }
        Ok(())
    }

    // ================================================================
    // SV_TouchLinks
    // ================================================================
    fn collect_touch_links(&self, e: usize, node_idx: usize, out: &mut Vec<usize>) {
        let ent = &self.edicts[e];

        for touch_idx in self.list_edicts(trigger_head(node_idx)) {
            if touch_idx == e {
                continue;
            }
            let touch = &self.edicts[touch_idx];
            if !touch.has_touch || touch.solid != Solid::Trigger {
                continue;
            }
            if !touch.overlaps(&ent.absmin, &ent.absmax) {
                continue;
            }
            out.push(touch_idx);
        }

        let node = &self.areanodes[node_idx];
        if node.axis == -1 {
            return;
        }

        // recurse down both sides
        let axis = node.axis as usize;
        if ent.absmax[axis] > node.dist {
            self.collect_touch_links(e, node.children[0], out);
        }
        if ent.absmin[axis] < node.dist {
            self.collect_touch_links(e, node.children[1], out);
        }
    }

    /// Fire every trigger the entity's abs box overlaps. Triggers are
    /// collected before any handler runs, so handlers may relink freely.
    pub fn touch_links(&mut self, e: usize, handler: &mut dyn TouchHandler) {
        let mut touched = Vec::new();
        self.collect_touch_links(e, 0, &mut touched);

        for trigger in touched {
            // an earlier handler may have removed either side
            if !self.edicts[trigger].inuse || !self.edicts[e].inuse {
                continue;
            }
            handler.touch(self, trigger, e);
        }
    }

    // ================================================================
    // SV_AreaEdicts
    // ================================================================
    fn area_edicts_r(
        &self,
        node_idx: usize,
        area_mins: &Vec3,
        area_maxs: &Vec3,
        area_type: AreaType,
        area_list: &mut Vec<usize>,
        area_maxcount: usize,
    ) {
        let head = match area_type {
            AreaType::Solid => solid_head(node_idx),
            AreaType::Trigger => trigger_head(node_idx),
        };

        for check_idx in self.list_edicts(head) {
            let check = &self.edicts[check_idx];
            if check.solid == Solid::Not {
                continue; // deactivated
            }
            if !check.overlaps(area_mins, area_maxs) {
                continue; // not touching
            }
            if area_list.len() == area_maxcount {
                com_dprintf("SV_AreaEdicts: MAXCOUNT\n");
                return;
            }
            area_list.push(check_idx);
        }

        let node = &self.areanodes[node_idx];
        if node.axis == -1 {
            return; // terminal node
        }

        let axis = node.axis as usize;
        if area_maxs[axis] > node.dist {
            self.area_edicts_r(node.children[0], area_mins, area_maxs, area_type, area_list, area_maxcount);
        }
        if area_mins[axis] < node.dist {
            self.area_edicts_r(node.children[1], area_mins, area_maxs, area_type, area_list, area_maxcount);
        }
    }

    pub fn area_edicts(
        &self,
        mins: &Vec3,
        maxs: &Vec3,
        area_type: AreaType,
        maxcount: usize,
    ) -> Vec<usize> {
        let mut list = Vec::new();
        if !self.areanodes.is_empty() {
            self.area_edicts_r(0, mins, maxs, area_type, &mut list, maxcount);
        }
        list
    }

    // ================================================================
    // POINT TESTING IN HULLS
    // ================================================================

    /// Raw contents of the world's point hull.
    pub fn true_point_contents(&self, p: &Vec3) -> Result<i32, GeometryError> {
        match self.worldmodel() {
            Some(world) => {
                let hull = world.hull(0);
                hull_point_contents(hull, hull.firstclipnode, p)
            }
            None => Ok(CONTENTS_EMPTY),
        }
    }

    /// World contents with currents folded into water.
    pub fn point_contents(&self, p: &Vec3) -> Result<i32, GeometryError> {
        let cont = self.true_point_contents(p)?;
        if (CONTENTS_CURRENT_DOWN..=CONTENTS_CURRENT_0).contains(&cont) {
            return Ok(CONTENTS_WATER);
        }
        Ok(cont)
    }

    /// Returns the world edict when the entity is stuck in something solid.
    pub fn test_entity_position(&mut self, e: usize) -> Result<Option<usize>, GeometryError> {
        let ent = &self.edicts[e];
        let (origin, mins, maxs) = (ent.origin, ent.mins, ent.maxs);
        let trace = self.sv_move(&origin, &mins, &maxs, &origin, MoveType::Normal, Some(e))?;
        if trace.startsolid {
            return Ok(Some(0));
        }
        Ok(None)
    }

    // ================================================================
    // LINE TESTING IN HULLS
    // ================================================================

    /// Handles selection or creation of a clipping hull, and offsetting (and
    /// eventually rotation) of the end points.
    pub fn clip_move_to_entity(
        &mut self,
        e: usize,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
    ) -> Result<Trace, GeometryError> {
        // fill in a default trace
        let mut trace = Trace::unclipped(end);

        // get the clipping hull
        let (hull, offset) = hull_for_entity(&mut self.box_hull, &self.edicts[e], e, mins, maxs)?;

        let start_l = vector_subtract(start, &offset);
        let end_l = vector_subtract(end, &offset);

        // trace a line through the apropriate clipping hull
        recursive_hull_check(hull, hull.firstclipnode, 0.0, 1.0, &start_l, &end_l, &mut trace)?;

        // fix trace up by the offset
        if trace.fraction != 1.0 {
            trace.endpos = vector_add(&trace.endpos, &offset);
        }

        // did we clip the move?
        if trace.fraction < 1.0 || trace.startsolid {
            trace.ent = e as i32;
        }

        Ok(trace)
    }

    // ================================================================
    // SV_ClipToLinks
    // ================================================================
    fn clip_to_links(&mut self, node_idx: usize, clip: &mut MoveClip) -> Result<(), GeometryError> {
        // touch linked edicts
        for touch_idx in self.list_edicts(solid_head(node_idx)) {
            let touch = &self.edicts[touch_idx];

            if touch.solid == Solid::Not {
                continue;
            }
            if Some(touch_idx) == clip.passedict {
                continue;
            }
            if touch.solid == Solid::Trigger {
                return Err(GeometryError::TriggerInClipList(touch_idx));
            }
            if clip.move_type == MoveType::NoMonsters && touch.solid != Solid::Bsp {
                continue;
            }
            if !touch.overlaps(&clip.boxmins, &clip.boxmaxs) {
                continue;
            }

            if let Some(pass) = clip.passedict {
                // points never interact
                if self.edicts[pass].size[0] != 0.0 && touch.size[0] == 0.0 {
                    continue;
                }
            }

            // might intersect, so do an exact clip
            if clip.trace.allsolid {
                return Ok(());
            }
            if let Some(pass) = clip.passedict {
                if touch.owner == Some(pass) {
                    continue; // don't clip against own missiles
                }
                if self.edicts[pass].owner == Some(touch_idx) {
                    continue; // don't clip against owner
                }
            }

            let mut trace = if touch.flags.contains(EntFlags::MONSTER) {
                self.clip_move_to_entity(touch_idx, &clip.start, &clip.mins2, &clip.maxs2, &clip.end)?
            } else {
                self.clip_move_to_entity(touch_idx, &clip.start, &clip.mins, &clip.maxs, &clip.end)?
            };

            if trace.allsolid || trace.startsolid || trace.fraction < clip.trace.fraction {
                trace.ent = touch_idx as i32;
                if clip.trace.startsolid {
                    clip.trace = trace;
                    clip.trace.startsolid = true;
                } else {
                    clip.trace = trace;
                }
            } else if trace.startsolid {
                clip.trace.startsolid = true;
            }
        }

        let node = self.areanodes[node_idx];
        if node.axis == -1 {
            return Ok(()); // terminal node
        }

        // recurse down both sides
        let axis = node.axis as usize;
        if clip.boxmaxs[axis] > node.dist {
            self.clip_to_links(node.children[0], clip)?;
        }
        if clip.boxmins[axis] < node.dist {
            self.clip_to_links(node.children[1], clip)?;
        }
        Ok(())
    }

    // ================================================================
    // SV_Move
    //
    // Moves the given mins/maxs volume through the world from start to end.
    // Passedict and edicts owned by passedict are explicitly not checked.
    // ================================================================
    pub fn sv_move(
        &mut self,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
        move_type: MoveType,
        passedict: Option<usize>,
    ) -> Result<Trace, GeometryError> {
        // clip to world
        let trace = self.clip_move_to_entity(0, start, mins, maxs, end)?;

        let (mins2, maxs2) = if move_type == MoveType::Missile {
            ([-15.0; 3], [15.0; 3])
        } else {
            (*mins, *maxs)
        };

        // create the bounding box of the entire move
        let (boxmins, boxmaxs) = move_bounds(start, &mins2, &maxs2, end);

        let mut clip = MoveClip {
            boxmins,
            boxmaxs,
            mins: *mins,
            maxs: *maxs,
            mins2,
            maxs2,
            start: *start,
            end: *end,
            trace,
            move_type,
            passedict,
        };

        // clip to entities
        self.clip_to_links(0, &mut clip)?;

        Ok(clip.trace)
    }

    // ================================================================
    // AddLinksToPmove
    // ================================================================
    fn add_links_to_pmove_r(
        &self,
        node_idx: usize,
        player: usize,
        pmove_mins: &Vec3,
        pmove_maxs: &Vec3,
        ctx: &mut MoveContext,
    ) -> Result<bool, GeometryError> {
        for check_idx in self.list_edicts(solid_head(node_idx)) {
            let check = &self.edicts[check_idx];

            if check.owner == Some(player) {
                continue; // player's own missile
            }
            if !matches!(check.solid, Solid::Bsp | Solid::Bbox | Solid::SlideBox) {
                continue;
            }
            if check_idx == player {
                continue;
            }
            if !check.overlaps(pmove_mins, pmove_maxs) {
                continue;
            }

            let pe = if check.solid == Solid::Bsp {
                let model = check
                    .model
                    .clone()
                    .ok_or(GeometryError::NonBspModel(check_idx))?;
                PhysEnt {
                    origin: check.origin,
                    model: Some(model),
                    info: check_idx as i32,
                    ..Default::default()
                }
            } else {
                PhysEnt {
                    origin: check.origin,
                    model: None,
                    mins: check.mins,
                    maxs: check.maxs,
                    info: check_idx as i32,
                }
            };
            if !ctx.add_physent(pe) {
                return Ok(false);
            }
        }

        let node = &self.areanodes[node_idx];
        if node.axis == -1 {
            return Ok(true);
        }

        let axis = node.axis as usize;
        if pmove_maxs[axis] > node.dist
            && !self.add_links_to_pmove_r(node.children[0], player, pmove_mins, pmove_maxs, ctx)?
        {
            return Ok(false);
        }
        if pmove_mins[axis] < node.dist
            && !self.add_links_to_pmove_r(node.children[1], player, pmove_mins, pmove_maxs, ctx)?
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// Rebuild `ctx` as the world plus every solid entity within 256 units of
    /// the player. Without a world there is nothing to collide with.
    pub fn add_links_to_pmove(&self, player: usize, ctx: &mut MoveContext) -> Result<(), GeometryError> {
        match self.worldmodel() {
            Some(world) => ctx.set_world(world.clone()),
            None => {
                ctx.physents.clear();
                return Ok(());
            }
        }

        let origin = self.edicts[player].origin;
        let pmove_mins = [origin[0] - 256.0, origin[1] - 256.0, origin[2] - 256.0];
        let pmove_maxs = [origin[0] + 256.0, origin[1] + 256.0, origin[2] + 256.0];

        self.add_links_to_pmove_r(0, player, &pmove_mins, &pmove_maxs, ctx)?;
        Ok(())
    }
}

// ============================================================
// Tests
// ============================================================
