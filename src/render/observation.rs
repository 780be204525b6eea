use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// One observation point: where the capture happens and the per-point
/// parameters the reduction stages consume.
#[derive(Debug, Clone)]
pub struct Observation {
    pub position: Vec3,
    pub view_direction: Vec3,
    /// Field of view in degrees, used to gate the groups reduction.
    pub field_of_view: f32,
    /// Sun samples evaluated by the sun stages, one entry per sample. The
    /// three vectors have equal length.
    pub solar_azimuths: Vec<f32>,
    pub solar_altitudes: Vec<f32>,
    pub solar_zenith_luminances: Vec<f32>,
}

/// Stride of one [`ObservationRecord`] in the uniform buffer. Padded so any
/// record index is a legal dynamic offset.
pub const OBSERVATION_RECORD_STRIDE: u64 = 512;

/// Portion of an [`ObservationRecord`] the shaders actually declare.
pub const OBSERVATION_RECORD_SIZE: u64 = 416;

/// GPU-visible data of one observation: the six face view-projection
/// matrices plus the point itself. Layout matches the `ViewProps` uniform in
/// the scene shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObservationRecord {
    view_proj: [[f32; 16]; 6],
    position: [f32; 4],
    view_direction: [f32; 3],
    field_of_view: f32,
    _pad: [f32; 24],
}

/// Face basis table: view direction and up vector per cube face, order
/// front/back/right/left/up/down.
const FACE_BASES: [(Vec3, Vec3); 6] = [
    (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(0.0, 0.0, 1.0), Vec3::new(-1.0, 0.0, 0.0)),
    (Vec3::new(0.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 0.0)),
];

impl ObservationRecord {
    /// Builds the record for one observation. Every face uses a 90 degree
    /// perspective with the clip-space correction folded into the
    /// projection.
    pub fn new(observation: &Observation, width: u32, height: u32) -> Self {
        let projection = Mat4::perspective_rh_gl(
            std::f32::consts::FRAC_PI_2,
            width as f32 / height as f32,
            0.01,
            100001.0,
        );
        let clip = Mat4::from_cols(
            Vec4::new(-1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, -1.0, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 0.5, 0.0),
            Vec4::new(0.0, 0.0, 0.5, 1.0),
        );
        let projection = clip * projection;

        let pos = observation.position;
        let mut view_proj = [[0.0f32; 16]; 6];
        for (face, (dir, up)) in FACE_BASES.iter().enumerate() {
            view_proj[face] = (projection * Mat4::look_at_rh(pos, pos + *dir, *up)).to_cols_array();
        }

        Self {
            view_proj,
            position: pos.extend(1.0).to_array(),
            view_direction: observation.view_direction.to_array(),
            field_of_view: observation.field_of_view,
            _pad: [0.0; 24],
        }
    }

    #[cfg(test)]
    fn face_view_proj(&self, face: usize) -> Mat4 { Mat4::from_cols_array(&self.view_proj[face]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn observation(position: Vec3) -> Observation {
        Observation {
            position,
            view_direction: Vec3::X,
            field_of_view: 180.0,
            solar_azimuths: vec![],
            solar_altitudes: vec![],
            solar_zenith_luminances: vec![],
        }
    }

    #[test]
    fn record_fills_its_stride() {
        assert_eq!(
            std::mem::size_of::<ObservationRecord>() as u64,
            OBSERVATION_RECORD_STRIDE
        );
        assert!(OBSERVATION_RECORD_SIZE <= OBSERVATION_RECORD_STRIDE);
        // Dynamic offsets must be 256-aligned.
        assert_eq!(OBSERVATION_RECORD_STRIDE % 256, 0);
    }

    #[test]
    fn face_centers_project_to_screen_center() {
        let pos = Vec3::new(2.0, -1.0, 3.0);
        let record = ObservationRecord::new(&observation(pos), 128, 128);
        for (face, (dir, _)) in FACE_BASES.iter().enumerate() {
            let clip = record.face_view_proj(face) * (pos + *dir).extend(1.0);
            let ndc = clip / clip.w;
            assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
            assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn faces_look_in_distinct_directions() {
        let record = ObservationRecord::new(&observation(Vec3::ZERO), 64, 64);
        for a in 0..6 {
            for b in (a + 1)..6 {
                assert_ne!(
                    record.view_proj[a], record.view_proj[b],
                    "faces {a} and {b} share a view-projection"
                );
            }
        }
    }

    #[test]
    fn record_carries_the_observation() {
        let mut obs = observation(Vec3::new(1.0, 2.0, 3.0));
        obs.view_direction = Vec3::new(0.0, 1.0, 0.0);
        obs.field_of_view = 120.0;
        let record = ObservationRecord::new(&obs, 64, 64);
        assert_eq!(record.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(record.view_direction, [0.0, 1.0, 0.0]);
        assert_eq!(record.field_of_view, 120.0);
    }
}
