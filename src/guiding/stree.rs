//! The spatial half of the SD-tree: a binary tree over the scene
//! bounding box (grown to a cube) whose leaves own the directional
//! distributions. Splitting axes cycle x, y, z with depth
//! (Algorithm 3 of the practical path guiding supplement).
//!
//! During a pass the tree is shared immutably: records and lookups
//! take `&self` and touch only atomics. `build` runs behind the pass
//! barrier with exclusive access, subdividing the spatial tree and
//! restructuring every directional tree on a worker pool.

// std
use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
// others
use byteorder::{LittleEndian, WriteBytesExt};
use log::{info, warn};
// pbrt
use crate::core::camera::Camera;
use crate::core::geometry::{bnd3_intersect_bnd3f, Bounds3f, Point3f, Vector3f};
use crate::core::gpt::{clamp_t, Float};
use crate::core::sampler::SamplingContext;
use crate::core::transform::Matrix4x4;
use crate::guiding::dtree::{DTree, DTreeRecord};
use crate::guiding::params::{GPTParameters, SpatialFilter};
use crate::guiding::{DTREE_THRESHOLD, SPATIAL_SUBDIVISION_THRESHOLD};
use crate::jobqueue::JobQueue;

#[derive(Debug, Clone)]
enum STreeNodeContent {
    Leaf(Box<DTree>),
    Interior(Box<[STreeNode; 2]>),
}

#[derive(Debug, Clone)]
pub struct STreeNode {
    axis: u8,
    content: STreeNodeContent,
}

impl STreeNode {
    fn new(parameters: Arc<GPTParameters>) -> Self {
        STreeNode {
            axis: 0,
            content: STreeNodeContent::Leaf(Box::new(DTree::new(parameters))),
        }
    }
    /// A child created on subdivision: the split axis advances and
    /// the inherited statistics are halved so the two copies together
    /// carry the parent's mass once instead of twice.
    fn from_parent(parent_axis: u8, parent_d_tree: &DTree) -> Self {
        let d_tree: DTree = parent_d_tree.clone();
        d_tree.halve_sample_weight();
        STreeNode {
            axis: (parent_axis + 1) % 3,
            content: STreeNodeContent::Leaf(Box::new(d_tree)),
        }
    }
    fn is_leaf(&self) -> bool {
        matches!(self.content, STreeNodeContent::Leaf(_))
    }
    /// Pick the half containing `point` and renormalise the
    /// coordinate along the split axis.
    fn choose_child(point: &mut Point3f, axis: u8) -> usize {
        if point[axis] < 0.5 as Float {
            point[axis] *= 2.0 as Float;
            0
        } else {
            point[axis] = (point[axis] - 0.5 as Float) * 2.0 as Float;
            1
        }
    }
    fn get_d_tree(&self, point: &mut Point3f, size: &mut Vector3f) -> &DTree {
        match &self.content {
            STreeNodeContent::Leaf(d_tree) => d_tree,
            STreeNodeContent::Interior(children) => {
                size[self.axis] *= 0.5 as Float;
                let child: usize = STreeNode::choose_child(point, self.axis);
                children[child].get_d_tree(point, size)
            }
        }
    }
    fn subdivide(&mut self, required_samples: usize) {
        if self.is_leaf() {
            let sample_weight: Float = match &self.content {
                STreeNodeContent::Leaf(d_tree) => d_tree.sample_weight(),
                STreeNodeContent::Interior(_) => unreachable!(),
            };
            if sample_weight > required_samples as Float {
                self.split();
            } else {
                return;
            }
        }
        if let STreeNodeContent::Interior(children) = &mut self.content {
            for child in children.iter_mut() {
                child.subdivide(required_samples);
            }
        }
    }
    fn split(&mut self) {
        let (first, second) = match &self.content {
            STreeNodeContent::Leaf(d_tree) => (
                STreeNode::from_parent(self.axis, d_tree),
                STreeNode::from_parent(self.axis, d_tree),
            ),
            STreeNodeContent::Interior(_) => return,
        };
        self.content = STreeNodeContent::Interior(Box::new([first, second]));
    }
    /// Box-filter record: every overlapped leaf receives the record
    /// weighted by the intersected volume.
    fn record(&self, splat_aabb: &Bounds3f, node_aabb: &Bounds3f, d_tree_record: &DTreeRecord) {
        let intersection_aabb: Bounds3f = bnd3_intersect_bnd3f(splat_aabb, node_aabb);
        if !intersection_aabb.is_valid() {
            return;
        }
        let intersection_volume: Float = intersection_aabb.volume();
        if intersection_volume <= 0.0 as Float {
            return;
        }
        match &self.content {
            STreeNodeContent::Leaf(d_tree) => {
                let mut weighted: DTreeRecord = *d_tree_record;
                weighted.sample_weight *= intersection_volume;
                d_tree.record(&weighted);
            }
            STreeNodeContent::Interior(children) => {
                let node_size: Vector3f = node_aabb.diagonal();
                let mut offset: Vector3f = Vector3f::default();
                offset[self.axis] = node_size[self.axis] * 0.5 as Float;
                children[0].record(
                    splat_aabb,
                    &Bounds3f {
                        p_min: node_aabb.p_min,
                        p_max: node_aabb.p_max - offset,
                    },
                    d_tree_record,
                );
                children[1].record(
                    splat_aabb,
                    &Bounds3f {
                        p_min: node_aabb.p_min + offset,
                        p_max: node_aabb.p_max,
                    },
                    d_tree_record,
                );
            }
        }
    }
    fn build(&mut self) {
        match &mut self.content {
            STreeNodeContent::Leaf(d_tree) => d_tree.build(),
            STreeNodeContent::Interior(children) => {
                for child in children.iter_mut() {
                    child.build();
                }
            }
        }
    }
    fn collect_d_trees<'a>(&'a mut self, out: &mut Vec<&'a mut DTree>) {
        match &mut self.content {
            STreeNodeContent::Leaf(d_tree) => out.push(d_tree),
            STreeNodeContent::Interior(children) => {
                for child in children.iter_mut() {
                    child.collect_d_trees(out);
                }
            }
        }
    }
    fn gather_statistics(&self, statistics: &mut DTreeStatistics, depth: usize) {
        statistics.num_s_tree_nodes += 1;
        match &self.content {
            STreeNodeContent::Leaf(d_tree) => {
                statistics.num_d_trees += 1;
                let d_tree_depth: usize = d_tree.max_depth();
                statistics.max_d_tree_depth = statistics.max_d_tree_depth.max(d_tree_depth);
                statistics.min_d_tree_depth = statistics.min_d_tree_depth.min(d_tree_depth);
                statistics.average_d_tree_depth += d_tree_depth as Float;

                let mean_radiance: Float = d_tree.mean();
                statistics.max_mean_radiance = statistics.max_mean_radiance.max(mean_radiance);
                statistics.min_mean_radiance = statistics.min_mean_radiance.min(mean_radiance);
                statistics.average_mean_radiance += mean_radiance;

                let node_count: usize = d_tree.node_count();
                statistics.max_d_tree_nodes = statistics.max_d_tree_nodes.max(node_count);
                statistics.min_d_tree_nodes = statistics.min_d_tree_nodes.min(node_count);
                statistics.average_d_tree_nodes += node_count as Float;

                let sample_weight: Float = d_tree.sample_weight();
                statistics.max_sample_weight = statistics.max_sample_weight.max(sample_weight);
                statistics.min_sample_weight = statistics.min_sample_weight.min(sample_weight);
                statistics.average_sample_weight += sample_weight;

                if d_tree.scattering_mode() == crate::core::bsdf::ScatteringMode::Glossy {
                    statistics.glossy_d_tree_fraction += 1.0;
                }

                let bsdf_sampling_fraction: Float = d_tree.bsdf_sampling_fraction();
                statistics.min_sampling_fraction =
                    statistics.min_sampling_fraction.min(bsdf_sampling_fraction);
                statistics.max_sampling_fraction =
                    statistics.max_sampling_fraction.max(bsdf_sampling_fraction);
                statistics.average_sampling_fraction += bsdf_sampling_fraction;

                statistics.max_s_tree_depth = statistics.max_s_tree_depth.max(depth);
                statistics.min_s_tree_depth = statistics.min_s_tree_depth.min(depth);
                statistics.average_s_tree_depth += depth as Float;
            }
            STreeNodeContent::Interior(children) => {
                children[0].gather_statistics(statistics, depth + 1);
                children[1].gather_statistics(statistics, depth + 1);
            }
        }
    }
    fn write_to_disk<W: Write>(&self, os: &mut W, aabb: &Bounds3f) -> std::io::Result<()> {
        match &self.content {
            STreeNodeContent::Leaf(d_tree) => {
                if d_tree.sample_weight() > 0.0 as Float {
                    let extent: Vector3f = aabb.diagonal();
                    os.write_f32::<LittleEndian>(aabb.p_min.x)?;
                    os.write_f32::<LittleEndian>(aabb.p_min.y)?;
                    os.write_f32::<LittleEndian>(aabb.p_min.z)?;
                    os.write_f32::<LittleEndian>(extent.x)?;
                    os.write_f32::<LittleEndian>(extent.y)?;
                    os.write_f32::<LittleEndian>(extent.z)?;
                    d_tree.write_to_disk(os)?;
                }
                Ok(())
            }
            STreeNodeContent::Interior(children) => {
                let half_extent: Float = 0.5 as Float * aabb.diagonal()[self.axis];
                let mut child_aabb: Bounds3f = *aabb;
                child_aabb.p_max[self.axis] -= half_extent;
                children[0].write_to_disk(os, &child_aabb)?;
                child_aabb.p_min[self.axis] += half_extent;
                child_aabb.p_max[self.axis] += half_extent;
                children[1].write_to_disk(os, &child_aabb)
            }
        }
    }
}

/// Aggregate SD-tree statistics logged after every build.
#[derive(Debug)]
pub struct DTreeStatistics {
    pub num_d_trees: usize,
    pub min_d_tree_depth: usize,
    pub max_d_tree_depth: usize,
    pub average_d_tree_depth: Float,
    pub min_d_tree_nodes: usize,
    pub max_d_tree_nodes: usize,
    pub average_d_tree_nodes: Float,
    pub min_sample_weight: Float,
    pub max_sample_weight: Float,
    pub average_sample_weight: Float,
    pub min_sampling_fraction: Float,
    pub max_sampling_fraction: Float,
    pub average_sampling_fraction: Float,
    pub min_mean_radiance: Float,
    pub max_mean_radiance: Float,
    pub average_mean_radiance: Float,
    pub glossy_d_tree_fraction: Float,
    pub num_s_tree_nodes: usize,
    pub min_s_tree_depth: usize,
    pub max_s_tree_depth: usize,
    pub average_s_tree_depth: Float,
}

impl Default for DTreeStatistics {
    fn default() -> Self {
        DTreeStatistics {
            num_d_trees: 0,
            min_d_tree_depth: usize::max_value(),
            max_d_tree_depth: 0,
            average_d_tree_depth: 0.0,
            min_d_tree_nodes: usize::max_value(),
            max_d_tree_nodes: 0,
            average_d_tree_nodes: 0.0,
            min_sample_weight: Float::MAX,
            max_sample_weight: 0.0,
            average_sample_weight: 0.0,
            min_sampling_fraction: Float::MAX,
            max_sampling_fraction: 0.0,
            average_sampling_fraction: 0.0,
            min_mean_radiance: Float::MAX,
            max_mean_radiance: 0.0,
            average_mean_radiance: 0.0,
            glossy_d_tree_fraction: 0.0,
            num_s_tree_nodes: 0,
            min_s_tree_depth: usize::max_value(),
            max_s_tree_depth: 0,
            average_s_tree_depth: 0.0,
        }
    }
}

impl DTreeStatistics {
    fn build(&mut self) {
        if self.num_d_trees == 0 {
            return;
        }
        let n: Float = self.num_d_trees as Float;
        self.average_d_tree_depth /= n;
        self.average_s_tree_depth /= n;
        self.average_d_tree_nodes /= n;
        self.average_mean_radiance /= n;
        self.average_sample_weight /= n;
        self.glossy_d_tree_fraction /= n;
        self.average_sampling_fraction /= n;
    }
}

pub struct STree {
    parameters: Arc<GPTParameters>,
    root_node: STreeNode,
    scene_aabb: Bounds3f,
    is_built: bool,
    is_final_iteration: bool,
}

impl STree {
    pub fn new(scene_aabb: Bounds3f, parameters: Arc<GPTParameters>) -> Self {
        // grow the box into a cube for even hierarchical subdivisions
        let size: Vector3f = scene_aabb.diagonal();
        let max_size: Float = size.x.max(size.y).max(size.z);
        let cube: Bounds3f = Bounds3f {
            p_min: scene_aabb.p_min,
            p_max: scene_aabb.p_min + Vector3f::new(max_size, max_size, max_size),
        };
        STree {
            parameters: parameters.clone(),
            root_node: STreeNode::new(parameters),
            scene_aabb: cube,
            is_built: false,
            is_final_iteration: false,
        }
    }
    pub fn parameters(&self) -> &Arc<GPTParameters> {
        &self.parameters
    }
    pub fn aabb(&self) -> &Bounds3f {
        &self.scene_aabb
    }
    /// The directional distribution covering `point`, with the leaf's
    /// world-space voxel size written to `d_tree_voxel_size`.
    pub fn get_d_tree_and_size(
        &self,
        point: &Point3f,
        d_tree_voxel_size: &mut Vector3f,
    ) -> &DTree {
        *d_tree_voxel_size = self.scene_aabb.diagonal();
        let mut transformed_point: Point3f = Point3f::default();
        let offset: Vector3f = self.scene_aabb.offset(point);
        transformed_point.x = offset.x;
        transformed_point.y = offset.y;
        transformed_point.z = offset.z;
        self.root_node
            .get_d_tree(&mut transformed_point, d_tree_voxel_size)
    }
    pub fn get_d_tree(&self, point: &Point3f) -> &DTree {
        let mut d_tree_voxel_size: Vector3f = Vector3f::default();
        self.get_d_tree_and_size(point, &mut d_tree_voxel_size)
    }
    /// Forward a record to the tree under the configured spatial
    /// filter. `d_tree` must be the leaf returned by `get_d_tree` for
    /// `point`.
    pub fn record(
        &self,
        d_tree: &DTree,
        point: &Point3f,
        d_tree_node_size: Vector3f,
        d_tree_record: DTreeRecord,
        sampling_context: &mut SamplingContext,
    ) {
        debug_assert!(d_tree_record.radiance.is_finite() && d_tree_record.radiance >= 0.0);
        debug_assert!(d_tree_record.product.is_finite() && d_tree_record.product >= 0.0);
        debug_assert!(
            d_tree_record.sample_weight.is_finite() && d_tree_record.sample_weight >= 0.0
        );
        match self.parameters.spatial_filter {
            SpatialFilter::Nearest => d_tree.record(&d_tree_record),
            SpatialFilter::Stochastic => {
                // jitter the record position inside the leaf voxel
                sampling_context.split_in_place(3, 1);
                let u: Vector3f = sampling_context.next_3d();
                let offset: Vector3f = Vector3f {
                    x: d_tree_node_size.x * (u.x - 0.5 as Float),
                    y: d_tree_node_size.y * (u.y - 0.5 as Float),
                    z: d_tree_node_size.z * (u.z - 0.5 as Float),
                };
                let jittered_point: Point3f = self.clip_point_to_aabb(*point + offset);
                let stochastic_d_tree: &DTree = self.get_d_tree(&jittered_point);
                stochastic_d_tree.record(&d_tree_record);
            }
            SpatialFilter::Box => {
                self.box_filter_splat(point, d_tree_node_size, d_tree_record);
            }
        }
    }
    /// The spatial box filter dilutes the record's statistical mass:
    /// the weight is divided by the splat volume and every leaf gets
    /// the record scaled by its intersected volume. (The directional
    /// box filter dilutes radiance by area instead; the asymmetry is
    /// deliberate, weight is a spatial quantity here.)
    fn box_filter_splat(
        &self,
        point: &Point3f,
        d_tree_node_size: Vector3f,
        mut d_tree_record: DTreeRecord,
    ) {
        let half: Vector3f = d_tree_node_size * 0.5 as Float;
        let splat_aabb: Bounds3f = Bounds3f {
            p_min: *point - half,
            p_max: *point + half,
        };
        if !splat_aabb.is_valid() || splat_aabb.volume() <= 0.0 as Float {
            return;
        }
        d_tree_record.sample_weight /= splat_aabb.volume();
        self.root_node
            .record(&splat_aabb, &self.scene_aabb, &d_tree_record);
    }
    fn clip_point_to_aabb(&self, point: Point3f) -> Point3f {
        Point3f {
            x: clamp_t(point.x, self.scene_aabb.p_min.x, self.scene_aabb.p_max.x),
            y: clamp_t(point.y, self.scene_aabb.p_min.y, self.scene_aabb.p_max.y),
            z: clamp_t(point.z, self.scene_aabb.p_min.z, self.scene_aabb.p_max.z),
        }
    }
    /// Barrier-phase rebuild: publish the directional sums, subdivide
    /// hot spatial leaves, restructure every directional tree on the
    /// worker pool, and log the aggregate statistics.
    pub fn build(&mut self, iteration: usize) {
        self.root_node.build();

        let required_samples: usize = (SPATIAL_SUBDIVISION_THRESHOLD as Float
            * (2.0 as Float).powf(iteration as Float * 0.5))
            as usize;
        self.root_node.subdivide(required_samples);

        {
            let mut d_trees: Vec<&mut DTree> = Vec::new();
            self.root_node.collect_d_trees(&mut d_trees);
            let mut job_queue: JobQueue = JobQueue::new();
            for d_tree in d_trees {
                job_queue.schedule(Box::new(move || d_tree.restructure(DTREE_THRESHOLD)));
            }
            job_queue.run(num_cpus::get());
        }

        let mut statistics: DTreeStatistics = DTreeStatistics::default();
        self.root_node.gather_statistics(&mut statistics, 1);
        statistics.build();
        info!(
            "SD-tree statistics: [min, max, avg]\n\
             S-tree:\n\
             \x20 node count             = {}\n\
             \x20 depth                  = [{}, {}, {:.2}]\n\
             D-tree:\n\
             \x20 tree count             = {}\n\
             \x20 node count             = [{}, {}, {:.1}]\n\
             \x20 depth                  = [{}, {}, {:.2}]\n\
             \x20 mean radiance          = [{:.3}, {:.3}, {:.3}]\n\
             \x20 sample weight          = [{:.3}, {:.3}, {:.3}]\n\
             \x20 BSDF sampling fraction = [{:.3}, {:.3}, {:.3}]\n\
             \x20 glossy D-tree fraction = {:.3}",
            statistics.num_s_tree_nodes,
            statistics.min_s_tree_depth,
            statistics.max_s_tree_depth,
            statistics.average_s_tree_depth,
            statistics.num_d_trees,
            statistics.min_d_tree_nodes,
            statistics.max_d_tree_nodes,
            statistics.average_d_tree_nodes,
            statistics.min_d_tree_depth,
            statistics.max_d_tree_depth,
            statistics.average_d_tree_depth,
            statistics.min_mean_radiance,
            statistics.max_mean_radiance,
            statistics.average_mean_radiance,
            statistics.min_sample_weight,
            statistics.max_sample_weight,
            statistics.average_sample_weight,
            statistics.min_sampling_fraction,
            statistics.max_sampling_fraction,
            statistics.average_sampling_fraction,
            statistics.glossy_d_tree_fraction,
        );

        self.is_built = true;
    }
    pub fn is_built(&self) -> bool {
        self.is_built
    }
    pub fn start_final_iteration(&mut self) {
        self.is_final_iteration = true;
    }
    pub fn is_final_iteration(&self) -> bool {
        self.is_final_iteration
    }
    /// Serialize the SD-tree for the external visualizer: the camera
    /// matrix header followed by every populated spatial leaf in
    /// depth-first order.
    pub fn write_snapshot<W: Write>(&self, os: &mut W, camera: &dyn Camera) -> std::io::Result<()> {
        let camera_matrix: Matrix4x4 = camera.local_to_parent(camera.shutter_middle_time());
        // rotate 180 degrees around y to conform to the visualizer
        // tool's z-axis convention
        let camera_matrix: Matrix4x4 = camera_matrix * Matrix4x4::rotate_y(PI);
        for row in camera_matrix.m.iter() {
            for value in row.iter() {
                os.write_f32::<LittleEndian>(*value)?;
            }
        }
        self.root_node.write_to_disk(os, &self.scene_aabb)
    }
    /// Write a snapshot to the configured save path, optionally
    /// suffixed with the iteration number. Failures are logged and
    /// swallowed; rendering continues.
    pub fn write_to_disk(&self, iteration: usize, append_iteration: bool, camera: &dyn Camera) {
        let save_path: &std::path::PathBuf = match &self.parameters.save_path {
            Some(path) => path,
            None => return,
        };
        let mut file_path: std::path::PathBuf = save_path.clone();
        if append_iteration {
            let stem: String = file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            file_path.set_file_name(format!("{}-{:02}.sdt", stem, iteration));
        }
        let file: File = match File::create(&file_path) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Could not open file {:?} for writing: {}",
                    file_path, e
                );
                return;
            }
        };
        let mut writer: BufWriter<File> = BufWriter::new(file);
        if let Err(e) = self.write_snapshot(&mut writer, camera) {
            warn!("Could not write SD-tree snapshot {:?}: {}", file_path, e);
        }
    }
}
