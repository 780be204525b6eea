//! Run orchestration: builds the scene and the metric stage chains from a
//! run description, renders every observation, and assembles the result
//! file.

use crate::{
    compute::{
        stages::{AreaParams, GroupsParams, SunParams},
        StageKind, StagedComputeEngine,
    },
    config::{GeometryDesc, MaterialDesc, RunDescription},
    error::Error,
    gfx::{CubeImage, GpuContext, Usage},
    img::{FlattenLayout, HostImage, StoreFormat},
    render::{CubeRenderer, Geometry, Material, SceneObject},
};
use glam::Mat4;
use serde_json::json;
use std::{path::PathBuf, thread::JoinHandle};

struct StageEntry {
    name: String,
    kind: StageKind,
    engine: StagedComputeEngine,
}

/// What one stage produced for one observation.
enum StageRecord {
    Values(Vec<f32>),
    Image(PathBuf),
}

/// Expands the `{index}`, `{stage}` and `{ext}` placeholders of the image
/// naming pattern. Indices are zero-padded to four digits.
fn expand_image_name(pattern: &str, index: usize, stage: &str, format: StoreFormat) -> PathBuf {
    let ext = match format {
        StoreFormat::Png => "png",
        StoreFormat::Hdr => "hdr",
        StoreFormat::Json => "json",
        StoreFormat::Data => "data",
    };
    PathBuf::from(
        pattern
            .replace("{index}", &format!("{index:04}"))
            .replace("{stage}", stage)
            .replace("{ext}", ext),
    )
}

/// One fully prepared run: GPU scene, observation list, stage engines, and
/// the accumulated per-observation records.
pub struct Service {
    header_name: String,
    output_path: PathBuf,
    image_naming: String,
    image_format: StoreFormat,

    renderer: CubeRenderer,
    stages: Vec<StageEntry>,

    results: Vec<Vec<(String, StageRecord)>>,
    pending_saves: Vec<(PathBuf, JoinHandle<Result<PathBuf, Error>>)>,
}

impl Service {
    /// Builds the scene, uploads environment maps, and compiles one stage
    /// chain per configured metric. `output_override` replaces the result
    /// path from the description when present.
    pub fn new(
        ctx: &GpuContext,
        desc: RunDescription,
        output_override: Option<PathBuf>,
    ) -> Result<Self, Error> {
        desc.validate()?;

        let (width, height) = (desc.rendering.render_width, desc.rendering.render_height);
        let mut renderer = CubeRenderer::new(ctx, width, height);
        renderer.set_observations(desc.observations());

        for obj_desc in desc.scene_objects {
            let geometry = match obj_desc.geometry {
                GeometryDesc::IndexedArray {
                    positions,
                    vertex_data,
                    indices,
                } => Geometry::new(positions, vertex_data, indices)?,
                GeometryDesc::UnitCube => Geometry::unit_cube(),
            };

            let material = match obj_desc.material {
                None | Some(MaterialDesc::VertexData) => Material::VertexColor,
                Some(MaterialDesc::EnvironmentMap { cube_faces }) => {
                    Material::env_cube(load_environment_cube(ctx, &cube_faces)?)
                }
            };

            let model_matrix = match obj_desc.model_matrix {
                None => Mat4::IDENTITY,
                Some(m) => {
                    let cols: [f32; 16] = m
                        .try_into()
                        .map_err(|_| Error::config("modelMatrix must have 16 entries"))?;
                    Mat4::from_cols_array(&cols)
                }
            };

            renderer.add_scene_object(SceneObject {
                geometry,
                material,
                model_matrix,
            });
        }

        let stages = desc
            .compute_stages
            .iter()
            .map(|stage| {
                let kind = stage.stage_kind()?;
                let engine = StagedComputeEngine::new(
                    ctx,
                    kind.stage_descs(width, height),
                    kind.params_size(),
                );
                Ok(StageEntry {
                    name: stage.name.clone(),
                    kind,
                    engine,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            header_name: desc.header.name,
            output_path: output_override.unwrap_or(desc.output.filename),
            image_naming: desc.output.image_naming,
            image_format: StoreFormat::from_name(&desc.output.images_type)?,
            renderer,
            stages,
            results: Vec::new(),
            pending_saves: Vec::new(),
        })
    }

    /// Renders every observation and runs every configured stage against the
    /// captured cube. Image saves are handed to background threads and
    /// joined by [`Service::output_json`].
    pub fn run(&mut self, ctx: &GpuContext) -> Result<(), Error> {
        let Service {
            renderer,
            stages,
            results,
            pending_saves,
            image_naming,
            image_format,
            ..
        } = self;
        let (width, height) = (renderer.width(), renderer.height());
        let count = renderer.observations().len();
        log::info!(
            "Processing {} observation(s) through {} stage(s)",
            count,
            stages.len()
        );

        for index in 0..count {
            let observation = renderer.observations()[index].clone();
            renderer.draw(ctx, index);
            log::debug!("Rendered observation {index}");

            let mut row = Vec::with_capacity(stages.len());
            for entry in stages.iter_mut() {
                let record = match entry.kind {
                    StageKind::Capture { unfolded } => {
                        let layout = if unfolded {
                            FlattenLayout::Unfolded
                        } else {
                            FlattenLayout::Grid
                        };
                        let image = renderer.color_cube_mut().retrieve(ctx, layout)?;
                        let path =
                            expand_image_name(image_naming, index, &entry.name, *image_format);
                        pending_saves
                            .push((path.clone(), image.write_async(path.clone(), *image_format)));
                        StageRecord::Image(path)
                    }
                    StageKind::Area => {
                        let params = AreaParams::new(width, height);
                        let result = entry.engine.compute_all_stages(
                            ctx,
                            renderer.color_cube_mut(),
                            bytemuck::bytes_of(&params),
                        )?;
                        StageRecord::Values(result.values)
                    }
                    StageKind::Groups => {
                        let params = GroupsParams::new(
                            width,
                            height,
                            observation.field_of_view,
                            observation.view_direction,
                        );
                        let result = entry.engine.compute_all_stages(
                            ctx,
                            renderer.color_cube_mut(),
                            bytemuck::bytes_of(&params),
                        )?;
                        StageRecord::Values(result.values)
                    }
                    StageKind::SunV1 | StageKind::SunV2 => {
                        let samples = observation.solar_azimuths.len();
                        let mut values = Vec::with_capacity(samples);
                        for j in 0..samples {
                            let params = SunParams {
                                width,
                                height,
                                sun_azimuth_rad: observation.solar_azimuths[j],
                                sun_altitude_rad: observation.solar_altitudes[j],
                                zenith_luminance: observation.solar_zenith_luminances[j],
                            };
                            let result = entry.engine.compute_all_stages(
                                ctx,
                                renderer.color_cube_mut(),
                                bytemuck::bytes_of(&params),
                            )?;
                            values.push(result.values.first().copied().unwrap_or(0.0));
                        }
                        StageRecord::Values(values)
                    }
                };
                row.push((entry.name.clone(), record));
            }
            results.push(row);
        }
        Ok(())
    }

    /// Joins all pending image saves and assembles the result document.
    pub fn output_json(&mut self) -> Result<serde_json::Value, Error> {
        for (path, handle) in self.pending_saves.drain(..) {
            match handle.join() {
                Ok(Ok(saved)) => log::debug!("Saved {}", saved.display()),
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(Error::ImageSave {
                        path,
                        reason: "background save panicked".into(),
                    })
                }
            }
        }

        let results: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (name, record) in row {
                    let value = match record {
                        StageRecord::Values(values) => json!({ "values": values }),
                        StageRecord::Image(path) => json!({ "imagePath": path }),
                    };
                    obj.insert(name.clone(), value);
                }
                serde_json::Value::Object(obj)
            })
            .collect();

        Ok(json!({
            "header": { "name": self.header_name },
            "results": results,
        }))
    }

    /// Writes the result document to the configured path.
    pub fn save_output(&mut self) -> Result<PathBuf, Error> {
        let document = self.output_json()?;
        let file = std::fs::File::create(&self.output_path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &document)?;
        log::info!("Result written to {}", self.output_path.display());
        Ok(self.output_path.clone())
    }
}

fn load_environment_cube(ctx: &GpuContext, paths: &[PathBuf]) -> Result<CubeImage, Error> {
    let faces = paths
        .iter()
        .map(HostImage::open)
        .collect::<Result<Vec<_>, Error>>()?;
    let (width, height) = (faces[0].width, faces[0].height);
    for (i, face) in faces.iter().enumerate() {
        if face.width != width || face.height != height {
            return Err(Error::config(format!(
                "environment face {i} is {}x{}, expected {width}x{height}",
                face.width, face.height
            )));
        }
    }
    let faces: [HostImage; 6] = faces
        .try_into()
        .map_err(|_| Error::config("environmentMap needs 6 cubeFaces"))?;

    let mut cube = CubeImage::new(ctx, Usage::ColorTexture, width, height);
    cube.upload_faces(ctx, &faces);
    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names_expand_with_padded_index() {
        let path = expand_image_name("{index}_{stage}.{ext}", 7, "capture", StoreFormat::Png);
        assert_eq!(path, PathBuf::from("0007_capture.png"));
    }

    #[test]
    fn image_names_honor_the_format_extension() {
        let path = expand_image_name("out/{stage}-{index}.{ext}", 12, "cube", StoreFormat::Hdr);
        assert_eq!(path, PathBuf::from("out/cube-0012.hdr"));
    }

    #[test]
    fn literal_patterns_pass_through() {
        let path = expand_image_name("fixed.png", 0, "capture", StoreFormat::Png);
        assert_eq!(path, PathBuf::from("fixed.png"));
    }
}
