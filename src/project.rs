//! Rendering a specification into the runtime's project files.
//!
//! The runtime reads a single `game.json` laid out the way its editor saves
//! projects, plus an `index.html` that boots it. Both renderings are pure and
//! deterministic: maps are ordered and nothing reads the clock.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{
    BehaviorKind, EventRule, GameObject, GameSpecification, Instruction, ObjectKind,
    PropertyValue, RefKind, ResolutionMode, Resource,
};
use crate::validate;

pub type Result<T> = std::result::Result<T, ProjectError>;

/// A specification that validation should have rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("'{scene}/{object}' property '{key}' names missing {kind} '{target}'")]
    DanglingReference {
        scene: String,
        object: String,
        key: String,
        kind: RefKind,
        target: String,
    },

    #[error("event in scene '{scene}' names missing {kind} '{target}'")]
    DanglingEventReference {
        scene: String,
        kind: RefKind,
        target: String,
    },

    #[error("'{scene}/{object}' has a non-finite value under '{key}'")]
    NonFiniteNumber {
        scene: String,
        object: String,
        key: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime release the project files are written for.
const GD_VERSION: GdVersion = GdVersion {
    major: 5,
    minor: 4,
    build: 0,
    revision: 0,
};

const DEFAULT_WINDOW: (u32, u32) = (800, 600);
const STANDARD_EVENT: &str = "BuiltinCommonInstructions::Standard";
const MOBILE_LAYER: &str = "MobileUI";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub first_layout: String,
    pub gd_version: GdVersion,
    pub properties: ProjectProperties,
    pub resources: ProjectResources,
    pub objects: Vec<ProjectObject>,
    pub layouts: Vec<Layout>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GdVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProperties {
    pub name: String,
    pub description: String,
    pub version: String,
    pub project_uuid: String,
    pub orientation: &'static str,
    pub size_on_startup_mode: &'static str,
    pub adapt_game_resolution_at_runtime: bool,
    pub pixels_rounding: bool,
    pub window_width: u32,
    pub window_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_viewport: Option<MobileViewport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileViewport {
    pub width: &'static str,
    pub initial_scale: f64,
    pub maximum_scale: f64,
    pub user_scalable: bool,
}

#[derive(Debug, Serialize)]
pub struct ProjectResources {
    pub resources: Vec<ProjectResource>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResource {
    pub name: String,
    pub kind: &'static str,
    pub file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub name: String,
    pub layers: Vec<Layer>,
    pub objects: Vec<ProjectObject>,
    pub events: Vec<ProjectEvent>,
}

#[derive(Debug, Serialize)]
pub struct Layer {
    pub name: &'static str,
    pub visibility: bool,
}

#[derive(Debug, Serialize)]
pub struct ProjectObject {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<&'static str>,
    pub behaviors: Vec<ProjectBehavior>,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Serialize)]
pub struct ProjectBehavior {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Serialize)]
pub struct ProjectEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub conditions: Vec<ProjectInstruction>,
    pub actions: Vec<ProjectInstruction>,
}

#[derive(Debug, Serialize)]
pub struct ProjectInstruction {
    #[serde(rename = "type")]
    pub kind: InstructionType,
    pub parameters: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InstructionType {
    pub value: String,
}

/// Render the project, re-checking what validation guarantees.
pub fn render(spec: &GameSpecification) -> Result<Project> {
    let mobile = spec.is_derived();
    let (window_width, window_height) = spec
        .properties()
        .viewport
        .map_or(DEFAULT_WINDOW, |v| (v.width, v.height));

    let properties = ProjectProperties {
        name: spec.properties().name.clone(),
        description: spec.properties().description.clone(),
        version: format!("1.0.{}", spec.version()),
        project_uuid: spec.id().to_string(),
        orientation: spec.properties().orientation.as_str(),
        size_on_startup_mode: match spec.properties().resolution_mode {
            ResolutionMode::NoChanges => "",
            mode => mode.as_str(),
        },
        adapt_game_resolution_at_runtime: spec.properties().resolution_mode
            != ResolutionMode::NoChanges,
        pixels_rounding: mobile,
        window_width,
        window_height,
        mobile_viewport: spec.properties().viewport.map(|v| MobileViewport {
            width: "device-width",
            initial_scale: 1.0,
            maximum_scale: 1.0,
            user_scalable: v.user_scalable,
        }),
    };

    let mut layouts = Vec::with_capacity(spec.scenes().len());
    for scene in spec.scenes() {
        let mut objects = Vec::with_capacity(scene.objects().len());
        for object in scene.objects() {
            check_object(spec, scene, object)?;
            objects.push(render_object(object));
        }

        let mut events = Vec::with_capacity(scene.events().len());
        for rule in scene.events() {
            events.push(render_rule(spec, scene, rule)?);
        }

        let mut layers = vec![Layer {
            name: "",
            visibility: true,
        }];
        if mobile {
            layers.push(Layer {
                name: MOBILE_LAYER,
                visibility: true,
            });
        }

        layouts.push(Layout {
            name: scene.name().to_string(),
            layers,
            objects,
            events,
        });
    }

    Ok(Project {
        first_layout: spec
            .scenes()
            .next()
            .map(|s| s.name().to_string())
            .unwrap_or_default(),
        gd_version: GD_VERSION,
        properties,
        resources: ProjectResources {
            resources: spec.resources().iter().map(render_resource).collect(),
        },
        objects: Vec::new(),
        layouts,
    })
}

/// `game.json` bytes.
pub fn to_json(project: &Project) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(project)?)
}

/// The page that loads `game.json` into the runtime.
pub fn index_html(spec: &GameSpecification) -> String {
    let title = escape_html(&spec.properties().name);
    let viewport = match spec.properties().viewport {
        Some(v) if !v.user_scalable => {
            "width=device-width, initial-scale=1, maximum-scale=1, user-scalable=no"
        }
        _ => "width=device-width, initial-scale=1",
    };
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"{viewport}\">\n\
         <title>{title}</title>\n\
         <script src=\"gdjs/runtime.js\"></script>\n\
         </head>\n\
         <body>\n\
         <canvas id=\"game\"></canvas>\n\
         <script>gdjs.boot(\"game.json\", document.getElementById(\"game\"));</script>\n\
         </body>\n\
         </html>\n"
    )
}

/// A file inside a preview or export bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// The runtime files for `spec`, in a fixed order.
pub fn bundle_files(spec: &GameSpecification) -> Result<Vec<BundleFile>> {
    let project = render(spec)?;
    Ok(vec![
        BundleFile {
            path: "game.json".into(),
            bytes: to_json(&project)?,
        },
        BundleFile {
            path: "index.html".into(),
            bytes: index_html(spec).into_bytes(),
        },
    ])
}

/// Where a resource lands inside a bundle.
pub fn asset_path(resource: &Resource) -> String {
    format!("assets/{}", resource.file.trim_start_matches("./"))
}

fn check_object(
    spec: &GameSpecification,
    scene: &crate::model::Scene,
    object: &GameObject,
) -> Result<()> {
    let values = object
        .properties()
        .iter()
        .chain(object.behaviors().iter().flat_map(|b| &b.parameters));
    for (key, value) in values {
        if !value.is_finite() {
            return Err(ProjectError::NonFiniteNumber {
                scene: scene.name().to_string(),
                object: object.name().to_string(),
                key: key.clone(),
            });
        }
    }

    for (key, value) in object.properties() {
        let Some(kind) = RefKind::for_key(key) else {
            continue;
        };
        let target = value.as_text().unwrap_or_default();
        if !validate::resolves(spec, scene, kind, target) {
            return Err(ProjectError::DanglingReference {
                scene: scene.name().to_string(),
                object: object.name().to_string(),
                key: key.clone(),
                kind,
                target: target.to_string(),
            });
        }
    }
    Ok(())
}

fn render_object(object: &GameObject) -> ProjectObject {
    ProjectObject {
        name: object.name().to_string(),
        kind: object_type(object.kind()),
        layer: (object.kind() == ObjectKind::TouchControl).then_some(MOBILE_LAYER),
        behaviors: object
            .behaviors()
            .iter()
            .map(|b| ProjectBehavior {
                name: b.name.clone().unwrap_or_else(|| b.kind.to_string()),
                kind: behavior_type(&b.kind),
                properties: b.parameters.clone(),
            })
            .collect(),
        variables: object
            .properties()
            .iter()
            .map(|(name, value)| Variable {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

fn render_rule(
    spec: &GameSpecification,
    scene: &crate::model::Scene,
    rule: &EventRule,
) -> Result<ProjectEvent> {
    let instruction = |i: &Instruction| -> Result<ProjectInstruction> {
        let mut parameters = Vec::with_capacity(i.parameters.len() + 2);
        if let Some(object) = &i.object {
            if scene.object(object).is_none() {
                return Err(ProjectError::DanglingEventReference {
                    scene: scene.name().to_string(),
                    kind: RefKind::Object,
                    target: object.clone(),
                });
            }
            parameters.push(object.clone());
        }
        if let Some(target) = &i.scene {
            if spec.scene(target).is_none() {
                return Err(ProjectError::DanglingEventReference {
                    scene: scene.name().to_string(),
                    kind: RefKind::Scene,
                    target: target.clone(),
                });
            }
            parameters.push(target.clone());
        }
        parameters.extend(i.parameters.iter().cloned());
        Ok(ProjectInstruction {
            kind: InstructionType {
                value: i.kind.clone(),
            },
            parameters,
        })
    };

    Ok(ProjectEvent {
        kind: STANDARD_EVENT,
        conditions: rule
            .conditions
            .iter()
            .map(instruction)
            .collect::<Result<_>>()?,
        actions: rule.actions.iter().map(instruction).collect::<Result<_>>()?,
    })
}

fn render_resource(resource: &Resource) -> ProjectResource {
    ProjectResource {
        name: resource.name.clone(),
        kind: resource.kind.as_str(),
        file: asset_path(resource),
    }
}

fn object_type(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Sprite => "Sprite",
        ObjectKind::TiledSprite => "TiledSpriteObject::TiledSprite",
        ObjectKind::PanelSprite => "PanelSpriteObject::PanelSprite",
        ObjectKind::Text => "TextObject::Text",
        ObjectKind::Particles => "ParticleSystem::ParticleEmitter",
        ObjectKind::TouchControl => "SpriteMultitouchJoystick::SpriteMultitouchJoystick",
    }
}

fn behavior_type(kind: &BehaviorKind) -> String {
    let runtime = match kind {
        BehaviorKind::PlatformerObject => "PlatformBehavior::PlatformerObjectBehavior",
        BehaviorKind::Platform => "PlatformBehavior::PlatformBehavior",
        BehaviorKind::TopDownMovement => "TopDownMovementBehavior::TopDownMovementBehavior",
        BehaviorKind::Physics => "Physics2::Physics2Behavior",
        BehaviorKind::Health => "Health::Health",
        BehaviorKind::Respawn => "Health::Respawn",
        BehaviorKind::Bounce => "Bounce::Bounce",
        BehaviorKind::Draggable => "DraggableBehavior::Draggable",
        BehaviorKind::DestroyOutsideScreen => "DestroyOutsideBehavior::DestroyOutside",
        BehaviorKind::Tween => "Tween::TweenBehavior",
        BehaviorKind::Timer => "Timer::Timer",
        BehaviorKind::Extension(name) => name,
    };
    runtime.to_string()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
