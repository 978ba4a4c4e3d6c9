use serde::Serialize;

use crate::types::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SceneDefinition {
    pub name: &'static str,
    pub brightness: u8,
    pub hue: f32,
    pub saturation: f32,
}

const fn preset(name: &'static str, brightness: u8, hue: f32, saturation: f32) -> SceneDefinition {
    SceneDefinition {
        name,
        brightness,
        hue,
        saturation,
    }
}

pub const MONOCHROME_SCENES: &[SceneDefinition] = &[
    preset("Bright", 100, 0.0, 0.0),
    preset("Reading", 70, 0.0, 0.0),
    preset("Relax", 40, 0.0, 0.0),
    preset("Night", 10, 0.0, 0.0),
];

pub const COLOR_SCENES: &[SceneDefinition] = &[
    preset("Daylight", 100, 45.0, 10.0),
    preset("Reading", 80, 40.0, 30.0),
    preset("Relax", 40, 30.0, 70.0),
    preset("Night", 10, 20.0, 90.0),
    preset("Ocean", 60, 200.0, 80.0),
];

pub fn scene_by_id(scenes: &[SceneDefinition], id: u8) -> Option<&SceneDefinition> {
    if id == 0 {
        return None;
    }
    scenes.get(usize::from(id) - 1)
}

pub fn next_scene(current: u8, scene_count: usize) -> Option<u8> {
    if scene_count == 0 {
        return None;
    }
    let count = u8::try_from(scene_count).unwrap_or(u8::MAX);
    if current == 0 || current >= count {
        Some(1)
    } else {
        Some(current + 1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneView {
    pub id: u8,
    pub name: &'static str,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
}

pub fn scene_views(capabilities: &Capabilities) -> Vec<SceneView> {
    capabilities
        .scenes
        .iter()
        .zip(1_u8..)
        .map(|(scene, id)| SceneView {
            id,
            name: scene.name,
            brightness: scene.brightness,
            hue: capabilities.supports_color.then_some(scene.hue),
            saturation: capabilities.supports_color.then_some(scene.saturation),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_one_based() {
        assert_eq!(scene_by_id(MONOCHROME_SCENES, 0), None);
        assert_eq!(scene_by_id(MONOCHROME_SCENES, 1).map(|s| s.name), Some("Bright"));
        assert_eq!(scene_by_id(MONOCHROME_SCENES, 3).map(|s| s.brightness), Some(40));
        assert_eq!(scene_by_id(MONOCHROME_SCENES, 5), None);
    }

    #[test]
    fn scene_three_is_relax_in_every_table() {
        assert_eq!(scene_by_id(MONOCHROME_SCENES, 3).unwrap().brightness, 40);
        assert_eq!(scene_by_id(COLOR_SCENES, 3).unwrap().brightness, 40);
    }

    #[test]
    fn cycle_skips_custom_and_wraps() {
        let count = MONOCHROME_SCENES.len();
        let mut observed = Vec::new();
        let mut current = 0;
        for _ in 0..6 {
            current = next_scene(current, count).unwrap();
            observed.push(current);
        }
        assert_eq!(observed, vec![1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn cycle_without_scenes_is_noop() {
        assert_eq!(next_scene(0, 0), None);
        assert_eq!(next_scene(3, 0), None);
    }

    #[test]
    fn stale_scene_beyond_table_restarts_cycle() {
        assert_eq!(next_scene(9, 4), Some(1));
    }

    #[test]
    fn views_hide_color_for_monochrome() {
        let views = scene_views(&Capabilities::monochrome_with_scenes());
        assert_eq!(views.len(), 4);
        assert_eq!(views[0].id, 1);
        assert!(views.iter().all(|view| view.hue.is_none()));

        let json = serde_json::to_string(&views[2]).unwrap();
        assert_eq!(json, r#"{"id":3,"name":"Relax","brightness":40}"#);
    }
}
