//! The built-in metric stage chains and their parameter blocks.

use super::StageDesc;
use crate::error::Error;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Threads per workgroup along the reduced axis. The kernels chunk rows into
/// this many lanes, so render dimensions must be multiples of it.
pub const N_LOCAL: u32 = 16;

/// Bucket count of the groups metric.
pub const MAX_GROUPS: u32 = 32;

/// The closed set of reductions a run can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// No kernel: the rendered cube itself is the result, flattened in grid
    /// or unfolded layout.
    Capture { unfolded: bool },
    /// Solid-angle weighted fraction of the sphere covered by geometry.
    Area,
    /// Per-bucket visible solid angle, bucket taken from the red channel,
    /// gated by the observation's field of view.
    Groups,
    /// CIE clear-sky luminance integrated over the visible sky.
    SunV1,
    /// Accepted alias of [`StageKind::SunV1`]; the kernels are identical.
    SunV2,
}

impl StageKind {
    pub fn from_name(name: &str, unfolded: bool) -> Result<Self, Error> {
        match name {
            "capture" | "cubeMap" => Ok(StageKind::Capture { unfolded }),
            "area" => Ok(StageKind::Area),
            "groups" => Ok(StageKind::Groups),
            "sun" => Ok(StageKind::SunV1),
            "sunv2" => Ok(StageKind::SunV2),
            other => Err(Error::config(format!("unknown compute stage type '{other}'"))),
        }
    }

    /// The GPU stage chain implementing this metric for the given render
    /// size. Empty for capture.
    pub fn stage_descs(&self, width: u32, height: u32) -> Vec<StageDesc> {
        let rows_out = height as u64 * 4;
        match self {
            StageKind::Capture { .. } => Vec::new(),
            StageKind::Area => two_pass_chain(
                "area",
                include_str!("../shaders/area.wgsl"),
                height,
                rows_out,
                4,
            ),
            StageKind::Groups => two_pass_chain(
                "groups",
                include_str!("../shaders/groups.wgsl"),
                height,
                rows_out * MAX_GROUPS as u64,
                4 * MAX_GROUPS as u64,
            ),
            StageKind::SunV1 | StageKind::SunV2 => two_pass_chain(
                "sun",
                include_str!("../shaders/sun.wgsl"),
                height,
                rows_out,
                4,
            ),
        }
    }

    /// Size of the push-constant parameter block the chain expects.
    pub fn params_size(&self) -> u32 {
        match self {
            StageKind::Capture { .. } => 0,
            StageKind::Area => std::mem::size_of::<AreaParams>() as u32,
            StageKind::Groups => std::mem::size_of::<GroupsParams>() as u32,
            StageKind::SunV1 | StageKind::SunV2 => std::mem::size_of::<SunParams>() as u32,
        }
    }
}

/// Per-row reduction over the six faces, then a cross-row reduction into the
/// retrieved scalar block.
fn two_pass_chain(
    label: &'static str,
    source: &'static str,
    height: u32,
    per_row_bytes: u64,
    final_bytes: u64,
) -> Vec<StageDesc> {
    vec![
        StageDesc {
            label,
            source,
            entry_point: "reduce_rows",
            dispatch: (1, height, 1),
            input_size: 0,
            output_size: per_row_bytes,
            binds_cube: true,
            has_params: true,
            retrieve_size: 0,
        },
        StageDesc {
            label,
            source,
            entry_point: "reduce_final",
            dispatch: (1, 1, 1),
            input_size: per_row_bytes,
            output_size: final_bytes,
            binds_cube: false,
            has_params: true,
            retrieve_size: final_bytes,
        },
    ]
}

/// Push constants of the area kernels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AreaParams {
    pub width: u32,
    pub height: u32,
    pub r_max: f32,
}

impl AreaParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            r_max: 1.0,
        }
    }
}

/// Push constants of the groups kernels. Field of view in degrees, view
/// direction in world space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GroupsParams {
    pub width: u32,
    pub height: u32,
    pub field_of_view: f32,
    pub view_x: f32,
    pub view_y: f32,
    pub view_z: f32,
}

impl GroupsParams {
    pub fn new(width: u32, height: u32, field_of_view: f32, view_direction: Vec3) -> Self {
        Self {
            width,
            height,
            field_of_view,
            view_x: view_direction.x,
            view_y: view_direction.y,
            view_z: view_direction.z,
        }
    }
}

/// Push constants of the sun kernels. Azimuth 0 is north, pi/2 east;
/// altitude 0 is the horizon, pi/2 the zenith.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SunParams {
    pub width: u32,
    pub height: u32,
    pub sun_azimuth_rad: f32,
    pub sun_altitude_rad: f32,
    pub zenith_luminance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::BufferPlan;

    #[test]
    fn unknown_kind_is_a_config_error() {
        assert!(StageKind::from_name("volume", false).is_err());
    }

    #[test]
    fn sun_aliases_share_the_chain() {
        let v1 = StageKind::SunV1.stage_descs(64, 64);
        let v2 = StageKind::SunV2.stage_descs(64, 64);
        assert_eq!(v1.len(), v2.len());
        assert_eq!(v1[0].source, v2[0].source);
        assert_eq!(v1[1].retrieve_size, v2[1].retrieve_size);
    }

    #[test]
    fn capture_needs_no_kernels() {
        assert!(StageKind::Capture { unfolded: true }.stage_descs(64, 64).is_empty());
        assert_eq!(StageKind::Capture { unfolded: false }.params_size(), 0);
    }

    #[test]
    fn area_chain_retrieves_one_float_from_two_allocations() {
        let descs = StageKind::Area.stage_descs(64, 48);
        let plan = BufferPlan::new(&descs);
        assert_eq!(plan.allocation_count(), 2);
        assert_eq!(descs[0].output_size, 48 * 4);
        assert_eq!(descs[1].retrieve_size, 4);
        assert_eq!(descs[0].dispatch, (1, 48, 1));
    }

    #[test]
    fn groups_chain_retrieves_all_buckets() {
        let descs = StageKind::Groups.stage_descs(32, 32);
        assert_eq!(descs[1].retrieve_size, (4 * MAX_GROUPS) as u64);
        assert_eq!(descs[0].output_size, (32 * 4 * MAX_GROUPS) as u64);
    }

    #[test]
    fn param_blocks_fit_the_push_constant_limit() {
        assert!(StageKind::Area.params_size() <= 128);
        assert!(StageKind::Groups.params_size() <= 128);
        assert!(StageKind::SunV1.params_size() <= 128);
        // Push constants are written in 4-byte units.
        assert_eq!(StageKind::Groups.params_size() % 4, 0);
        assert_eq!(StageKind::SunV1.params_size() % 4, 0);
    }
}
