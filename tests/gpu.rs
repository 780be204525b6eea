//! End-to-end tests against a real adapter. All ignored by default; run with
//! `--ignored` on a machine with a GPU.

use cubevis::{
    compute::{
        stages::{AreaParams, GroupsParams, SunParams},
        StageKind, StagedComputeEngine,
    },
    gfx::{CubeImage, GpuConfig, GpuContext, Usage},
    img::{FlattenLayout, HostImage},
    render::{CubeRenderer, Geometry, Material, Observation, SceneObject},
};
use glam::{Mat4, Vec3};

/// The kernels weight each pixel by its approximate solid angle; the CPU
/// reference gives the exact value the chain should sum to when every pixel
/// contributes.
fn full_sphere_weight(n: u32, m: u32) -> f32 {
    let mut sum = 0.0;
    for j in 0..m {
        for i in 0..n {
            sum += cubevis::math::solid_angle_weight(i, j, n, m);
        }
    }
    sum * 6.0
}

fn context() -> GpuContext {
    pollster::block_on(GpuContext::offscreen(GpuConfig::default()))
        .expect("failed to create a GPU context")
}

/// A 16x16 cube texture with constant pixels.
fn uploaded_cube(ctx: &GpuContext, pixel: [f32; 4]) -> CubeImage {
    let mut cube = CubeImage::new(ctx, Usage::ColorTexture, 16, 16);
    let face = || {
        HostImage::from_pixels(
            16,
            16,
            pixel.iter().copied().cycle().take(16 * 16 * 4).collect(),
        )
    };
    let faces = [face(), face(), face(), face(), face(), face()];
    cube.upload_faces(ctx, &faces);
    cube
}

fn run_metric(
    ctx: &GpuContext,
    kind: StageKind,
    cube: &mut CubeImage,
    params: &[u8],
) -> Vec<f32> {
    let mut engine = StagedComputeEngine::new(ctx, kind.stage_descs(16, 16), kind.params_size());
    engine
        .compute_all_stages(ctx, cube, params)
        .expect("stage chain failed")
        .values
}

#[test]
#[ignore = "requires a GPU"]
fn capture_chain_is_empty_and_returns_nothing() {
    let ctx = context();
    let mut cube = uploaded_cube(&ctx, [0.0, 0.0, 0.0, 1.0]);
    let mut engine = StagedComputeEngine::new(&ctx, Vec::new(), 0);
    let result = engine
        .compute_all_stages(&ctx, &mut cube, &[])
        .expect("empty chain failed");
    assert!(result.values.is_empty());
    assert!(result.image.is_none());
}

#[test]
#[ignore = "requires a GPU"]
fn fully_covered_sphere_has_area_4_pi() {
    let ctx = context();
    // Every pixel of every face carries a positive distance.
    let mut cube = uploaded_cube(&ctx, [0.0, 0.0, 0.0, 2.5]);
    let params = AreaParams::new(16, 16);
    let values = run_metric(&ctx, StageKind::Area, &mut cube, bytemuck::bytes_of(&params));
    assert_eq!(values.len(), 1);
    let expected = full_sphere_weight(16, 16);
    assert!(
        (values[0] - expected).abs() / expected < 1e-3,
        "area {} does not match the reference weight sum {expected}",
        values[0]
    );
    // The weight sum itself should land near the full sphere.
    let sphere = 4.0 * std::f32::consts::PI;
    assert!((expected - sphere).abs() / sphere < 0.05);
}

#[test]
#[ignore = "requires a GPU"]
fn single_visible_face_sums_one_sixth_of_the_weights() {
    let ctx = context();
    let mut cube = CubeImage::new(&ctx, Usage::ColorTexture, 16, 16);
    let face = |alpha: f32| {
        HostImage::from_pixels(
            16,
            16,
            [0.0, 0.0, 0.0, alpha]
                .iter()
                .copied()
                .cycle()
                .take(16 * 16 * 4)
                .collect(),
        )
    };
    // Only the front face carries hits.
    let faces = [
        face(1.0),
        face(0.0),
        face(0.0),
        face(0.0),
        face(0.0),
        face(0.0),
    ];
    cube.upload_faces(&ctx, &faces);

    let params = AreaParams::new(16, 16);
    let values = run_metric(&ctx, StageKind::Area, &mut cube, bytemuck::bytes_of(&params));
    // The weight table is identical per face, so one face is a sixth of the
    // six-face sum.
    let expected = full_sphere_weight(16, 16) / 6.0;
    assert!(
        (values[0] - expected).abs() / expected < 1e-3,
        "single-face area {} does not match {expected}",
        values[0]
    );
}

#[test]
#[ignore = "requires a GPU"]
fn uploaded_faces_round_trip_through_grid_retrieval() {
    let ctx = context();
    let mut cube = CubeImage::new(&ctx, Usage::ColorTexture, 16, 16);
    let face = |seed: f32| {
        HostImage::from_pixels(16, 16, (0..16 * 16 * 4).map(|i| seed + i as f32).collect())
    };
    let faces = [
        face(0.0),
        face(10_000.0),
        face(20_000.0),
        face(30_000.0),
        face(40_000.0),
        face(50_000.0),
    ];
    cube.upload_faces(&ctx, &faces);

    let layout = FlattenLayout::Grid;
    let flat = cube.retrieve(&ctx, layout).expect("readback failed");
    assert_eq!((flat.width, flat.height), (48, 32));
    for (i, face) in faces.iter().enumerate() {
        let (ox, oy) = layout.face_offset(i as u32, 16, 16);
        let tile = flat.extract(ox, oy, 16, 16);
        assert_eq!(tile.pixels, face.pixels, "face {i} did not round-trip");
    }
}

#[test]
#[ignore = "requires a GPU"]
fn groups_attribute_the_whole_sphere_to_one_bucket() {
    let ctx = context();
    // Red channel 3 puts every pixel in bucket 3.
    let mut cube = uploaded_cube(&ctx, [3.0, 0.0, 0.0, 1.0]);
    let params = GroupsParams::new(16, 16, 360.0, Vec3::X);
    let values = run_metric(&ctx, StageKind::Groups, &mut cube, bytemuck::bytes_of(&params));
    assert_eq!(values.len(), 32);
    let expected = full_sphere_weight(16, 16);
    assert!((values[3] - expected).abs() / expected < 1e-3);
    for (i, v) in values.iter().enumerate() {
        if i != 3 {
            assert_eq!(*v, 0.0, "bucket {i} should be empty");
        }
    }
}

#[test]
#[ignore = "requires a GPU"]
fn open_sky_collects_positive_luminance() {
    let ctx = context();
    // Red channel zero marks sky everywhere.
    let mut cube = uploaded_cube(&ctx, [0.0, 0.0, 0.0, 0.0]);
    let params = SunParams {
        width: 16,
        height: 16,
        sun_azimuth_rad: std::f32::consts::FRAC_PI_4,
        sun_altitude_rad: std::f32::consts::FRAC_PI_4,
        zenith_luminance: 1000.0,
    };
    let values = run_metric(&ctx, StageKind::SunV1, &mut cube, bytemuck::bytes_of(&params));
    assert_eq!(values.len(), 1);
    assert!(values[0] > 0.0);
}

#[test]
#[ignore = "requires a GPU"]
fn renderer_compiles_one_pipeline_per_material() {
    let ctx = context();
    let mut renderer = CubeRenderer::new(&ctx, 32, 32);
    for _ in 0..3 {
        renderer.add_scene_object(SceneObject {
            geometry: Geometry::unit_cube(),
            material: Material::VertexColor,
            model_matrix: Mat4::IDENTITY,
        });
    }
    renderer.set_observations(vec![Observation {
        position: Vec3::ZERO,
        view_direction: Vec3::X,
        field_of_view: 360.0,
        solar_azimuths: Vec::new(),
        solar_altitudes: Vec::new(),
        solar_zenith_luminances: Vec::new(),
    }]);

    renderer.draw(&ctx, 0);
    renderer.draw(&ctx, 0);
    assert_eq!(renderer.pipeline_compiles(), 1);
}

#[test]
#[ignore = "requires a GPU"]
fn enclosed_observation_sees_geometry_in_every_direction() {
    let ctx = context();
    let mut renderer = CubeRenderer::new(&ctx, 32, 32);
    renderer.add_scene_object(SceneObject {
        geometry: Geometry::unit_cube(),
        material: Material::VertexColor,
        // Scale the cube up so the observation point sits inside it.
        model_matrix: Mat4::from_scale(Vec3::splat(10.0)),
    });
    renderer.set_observations(vec![Observation {
        position: Vec3::ZERO,
        view_direction: Vec3::X,
        field_of_view: 360.0,
        solar_azimuths: Vec::new(),
        solar_altitudes: Vec::new(),
        solar_zenith_luminances: Vec::new(),
    }]);
    renderer.draw(&ctx, 0);

    let flat = renderer
        .color_cube_mut()
        .retrieve(&ctx, FlattenLayout::Grid)
        .expect("readback failed");
    assert_eq!((flat.width, flat.height), (96, 64));

    // Alpha carries the distance to the hit, positive everywhere inside.
    let covered = flat
        .pixels
        .chunks_exact(4)
        .filter(|px| px[3] > 0.0)
        .count();
    assert_eq!(covered, (flat.width * flat.height) as usize);
}

#[test]
#[ignore = "requires a GPU"]
fn area_shrinks_when_the_scene_opens_up() {
    let ctx = context();
    let mut renderer = CubeRenderer::new(&ctx, 32, 32);
    renderer.add_scene_object(SceneObject {
        geometry: Geometry::unit_cube(),
        material: Material::VertexColor,
        // A small cube off to the side covers only part of the sphere.
        model_matrix: Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)),
    });
    renderer.set_observations(vec![Observation {
        position: Vec3::ZERO,
        view_direction: Vec3::X,
        field_of_view: 360.0,
        solar_azimuths: Vec::new(),
        solar_altitudes: Vec::new(),
        solar_zenith_luminances: Vec::new(),
    }]);
    renderer.draw(&ctx, 0);

    let kind = StageKind::Area;
    let mut engine =
        StagedComputeEngine::new(&ctx, kind.stage_descs(32, 32), kind.params_size());
    let params = AreaParams::new(32, 32);
    let values = engine
        .compute_all_stages(&ctx, renderer.color_cube_mut(), bytemuck::bytes_of(&params))
        .expect("stage chain failed")
        .values;

    assert!(values[0] > 0.0);
    assert!(values[0] < std::f32::consts::PI, "area {} too large", values[0]);
}
