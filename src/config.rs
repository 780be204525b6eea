//! The JSON run description: what to render, from where, and which
//! reductions to apply. Parsed eagerly and validated before any GPU work.

use crate::{compute::StageKind, error::Error, render::Observation};
use glam::Vec3;
use serde::Deserialize;
use std::{collections::HashSet, path::{Path, PathBuf}};

#[derive(Debug, Deserialize)]
pub struct RunDescription {
    pub header: Header,
    pub rendering: Rendering,
    #[serde(rename = "sceneObjects")]
    pub scene_objects: Vec<SceneObjectDesc>,
    #[serde(rename = "observationPoints")]
    pub observation_points: ObservationPoints,
    #[serde(rename = "computeStages")]
    pub compute_stages: Vec<ComputeStageDesc>,
    pub output: OutputDesc,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Rendering {
    #[serde(rename = "renderWidth", default = "default_render_dim")]
    pub render_width: u32,
    #[serde(rename = "renderHeight", default = "default_render_dim")]
    pub render_height: u32,
}

fn default_render_dim() -> u32 { 512 }

#[derive(Debug, Deserialize)]
pub struct SceneObjectDesc {
    #[serde(flatten)]
    pub geometry: GeometryDesc,
    /// Column-major 4x4 model matrix, identity when absent.
    #[serde(rename = "modelMatrix")]
    pub model_matrix: Option<Vec<f32>>,
    pub material: Option<MaterialDesc>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum GeometryDesc {
    #[serde(rename = "indexedArray")]
    IndexedArray {
        positions: Vec<f32>,
        #[serde(rename = "vertexData")]
        vertex_data: Vec<f32>,
        indices: Vec<u32>,
    },
    #[serde(rename = "unitCube")]
    UnitCube,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum MaterialDesc {
    #[serde(rename = "vertexData")]
    VertexData,
    #[serde(rename = "environmentMap")]
    EnvironmentMap {
        #[serde(rename = "cubeFaces")]
        cube_faces: Vec<PathBuf>,
    },
}

/// Structure-of-arrays observation list, three floats per position and view
/// direction. Sun sample arrays may be absent when no sun stage runs.
#[derive(Debug, Deserialize)]
pub struct ObservationPoints {
    pub positions: Vec<f32>,
    #[serde(rename = "viewDirections")]
    pub view_directions: Vec<f32>,
    #[serde(rename = "fieldOfViews")]
    pub field_of_views: Vec<f32>,
    #[serde(rename = "solarAzimuths", default)]
    pub solar_azimuths: Vec<Vec<f32>>,
    #[serde(rename = "solarAltitudes", default)]
    pub solar_altitudes: Vec<Vec<f32>>,
    #[serde(rename = "solarZenithLuminances", default)]
    pub solar_zenith_luminances: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ComputeStageDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Capture only: flatten as a 4x3 cross instead of the 3x2 grid.
    #[serde(default)]
    pub unfolded: bool,
}

impl ComputeStageDesc {
    pub fn stage_kind(&self) -> Result<StageKind, Error> {
        StageKind::from_name(&self.kind, self.unfolded)
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputDesc {
    pub filename: PathBuf,
    /// Image file pattern; `{index}`, `{stage}` and `{ext}` are expanded.
    #[serde(rename = "imageNaming", default = "default_image_naming")]
    pub image_naming: String,
    #[serde(rename = "imagesType", default = "default_images_type")]
    pub images_type: String,
}

fn default_image_naming() -> String { "{index}_{stage}.{ext}".to_string() }

fn default_images_type() -> String { "png".to_string() }

impl RunDescription {
    /// Reads, parses and validates a run description file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let desc: RunDescription = serde_json::from_str(&text)?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let (w, h) = (self.rendering.render_width, self.rendering.render_height);
        if w == 0 || h == 0 || w % 16 != 0 || h % 16 != 0 {
            return Err(Error::config(format!(
                "render dimensions must be positive multiples of 16, got {w}x{h}"
            )));
        }

        for obj in &self.scene_objects {
            if let Some(matrix) = &obj.model_matrix {
                if matrix.len() != 16 {
                    return Err(Error::config(format!(
                        "modelMatrix must have 16 entries, got {}",
                        matrix.len()
                    )));
                }
            }
            if let Some(MaterialDesc::EnvironmentMap { cube_faces }) = &obj.material {
                if cube_faces.len() != 6 {
                    return Err(Error::config(format!(
                        "environmentMap needs 6 cubeFaces, got {}",
                        cube_faces.len()
                    )));
                }
            }
        }

        self.validate_observations()?;

        let mut names = HashSet::new();
        for stage in &self.compute_stages {
            if stage.name.is_empty() {
                return Err(Error::config("compute stage name must not be empty"));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate compute stage name '{}'",
                    stage.name
                )));
            }
            stage.stage_kind()?;
        }

        crate::img::StoreFormat::from_name(&self.output.images_type)?;

        Ok(())
    }

    fn validate_observations(&self) -> Result<(), Error> {
        let obs = &self.observation_points;
        if obs.positions.is_empty() || obs.positions.len() % 3 != 0 {
            return Err(Error::config(
                "observationPoints.positions must be a non-empty multiple of 3",
            ));
        }
        let count = obs.positions.len() / 3;
        if obs.view_directions.len() != obs.positions.len() {
            return Err(Error::config(format!(
                "observationPoints.viewDirections has {} floats, expected {}",
                obs.view_directions.len(),
                obs.positions.len()
            )));
        }
        if obs.field_of_views.len() != count {
            return Err(Error::config(format!(
                "observationPoints.fieldOfViews has {} entries, expected {count}",
                obs.field_of_views.len()
            )));
        }
        for (label, arr) in [
            ("solarAzimuths", &obs.solar_azimuths),
            ("solarAltitudes", &obs.solar_altitudes),
            ("solarZenithLuminances", &obs.solar_zenith_luminances),
        ] {
            if !arr.is_empty() && arr.len() != count {
                return Err(Error::config(format!(
                    "observationPoints.{label} has {} entries, expected {count}",
                    arr.len()
                )));
            }
        }
        for i in 0..count {
            let az = obs.solar_azimuths.get(i).map_or(0, Vec::len);
            let al = obs.solar_altitudes.get(i).map_or(0, Vec::len);
            let zl = obs.solar_zenith_luminances.get(i).map_or(0, Vec::len);
            if az != al || az != zl {
                return Err(Error::config(format!(
                    "observation {i} has mismatched sun sample arrays ({az}/{al}/{zl})"
                )));
            }
        }
        Ok(())
    }

    /// The parsed observation list.
    pub fn observations(&self) -> Vec<Observation> {
        let obs = &self.observation_points;
        let count = obs.positions.len() / 3;
        (0..count)
            .map(|i| Observation {
                position: Vec3::from_slice(&obs.positions[i * 3..i * 3 + 3]),
                view_direction: Vec3::from_slice(&obs.view_directions[i * 3..i * 3 + 3]),
                field_of_view: obs.field_of_views[i],
                solar_azimuths: obs.solar_azimuths.get(i).cloned().unwrap_or_default(),
                solar_altitudes: obs.solar_altitudes.get(i).cloned().unwrap_or_default(),
                solar_zenith_luminances: obs
                    .solar_zenith_luminances
                    .get(i)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "header": { "name": "test run" },
            "rendering": { "renderWidth": 64, "renderHeight": 64 },
            "sceneObjects": [ { "type": "unitCube" } ],
            "observationPoints": {
                "positions": [0.0, 0.0, 1.5],
                "viewDirections": [1.0, 0.0, 0.0],
                "fieldOfViews": [360.0]
            },
            "computeStages": [ { "name": "visible_area", "type": "area" } ],
            "output": { "filename": "out.json" }
        })
    }

    fn parse(value: serde_json::Value) -> RunDescription {
        serde_json::from_value(value).expect("description should deserialize")
    }

    #[test]
    fn minimal_description_is_valid() {
        let desc = parse(minimal_json());
        desc.validate().unwrap();
        assert_eq!(desc.header.name, "test run");
        assert_eq!(desc.output.image_naming, "{index}_{stage}.{ext}");
        assert_eq!(desc.observations().len(), 1);
    }

    #[test]
    fn render_size_must_be_multiple_of_16() {
        let mut json = minimal_json();
        json["rendering"]["renderWidth"] = serde_json::json!(100);
        assert!(parse(json).validate().is_err());
    }

    #[test]
    fn unknown_stage_kind_is_rejected() {
        let mut json = minimal_json();
        json["computeStages"][0]["type"] = serde_json::json!("volume");
        assert!(parse(json).validate().is_err());
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let mut json = minimal_json();
        json["computeStages"] = serde_json::json!([
            { "name": "a", "type": "area" },
            { "name": "a", "type": "groups" }
        ]);
        assert!(parse(json).validate().is_err());
    }

    #[test]
    fn mismatched_view_directions_are_rejected() {
        let mut json = minimal_json();
        json["observationPoints"]["viewDirections"] = serde_json::json!([1.0, 0.0]);
        assert!(parse(json).validate().is_err());
    }

    #[test]
    fn mismatched_sun_samples_are_rejected() {
        let mut json = minimal_json();
        json["observationPoints"]["solarAzimuths"] = serde_json::json!([[0.1, 0.2]]);
        json["observationPoints"]["solarAltitudes"] = serde_json::json!([[0.3]]);
        json["observationPoints"]["solarZenithLuminances"] = serde_json::json!([[1000.0]]);
        assert!(parse(json).validate().is_err());
    }

    #[test]
    fn sun_samples_parse_per_observation() {
        let mut json = minimal_json();
        json["observationPoints"]["solarAzimuths"] = serde_json::json!([[0.1, 0.2]]);
        json["observationPoints"]["solarAltitudes"] = serde_json::json!([[0.3, 0.4]]);
        json["observationPoints"]["solarZenithLuminances"] = serde_json::json!([[1.0, 2.0]]);
        let desc = parse(json);
        desc.validate().unwrap();
        let obs = desc.observations();
        assert_eq!(obs[0].solar_azimuths, vec![0.1, 0.2]);
        assert_eq!(obs[0].solar_zenith_luminances, vec![1.0, 2.0]);
    }

    #[test]
    fn indexed_array_geometry_parses() {
        let mut json = minimal_json();
        json["sceneObjects"] = serde_json::json!([{
            "type": "indexedArray",
            "positions": [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            "vertexData": [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0],
            "indices": [0, 1, 2],
            "modelMatrix": [
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0
            ],
            "material": { "type": "vertexData" }
        }]);
        let desc = parse(json);
        desc.validate().unwrap();
        match &desc.scene_objects[0].geometry {
            GeometryDesc::IndexedArray { indices, .. } => assert_eq!(indices.len(), 3),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn truncated_env_map_is_rejected() {
        let mut json = minimal_json();
        json["sceneObjects"] = serde_json::json!([{
            "type": "unitCube",
            "material": { "type": "environmentMap", "cubeFaces": ["a.png", "b.png"] }
        }]);
        assert!(parse(json).validate().is_err());
    }
}
