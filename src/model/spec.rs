//! Specification tree: game properties, scenes, objects, behaviors, event rules.
//!
//! Scenes and objects sit behind `Arc` so that successive versions share every
//! subtree an edit did not touch. Mutation goes through `Arc::make_mut` inside
//! the edit interpreter and the mobile transform; nothing outside the crate can
//! reach the fields.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mobile::MobileProfile;

/// The canonical, versioned description of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSpecification {
    pub(crate) id: Uuid,
    pub(crate) version: u64,
    pub(crate) properties: GameProperties,
    #[serde(default)]
    pub(crate) resources: Vec<Resource>,
    #[serde(default)]
    pub(crate) scenes: Vec<Arc<Scene>>,

    /// Present only on values derived for preview or export. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) overlay: Option<MobileProfile>,
}

impl GameSpecification {
    /// An empty specification at version 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 0,
            properties: GameProperties::named(name),
            resources: Vec::new(),
            scenes: Vec::new(),
            overlay: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn properties(&self) -> &GameProperties {
        &self.properties
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn scenes(&self) -> impl ExactSizeIterator<Item = &Scene> {
        self.scenes.iter().map(AsRef::as_ref)
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes().find(|s| s.name == name)
    }

    /// Total number of objects across all scenes.
    pub fn object_count(&self) -> usize {
        self.scenes().map(|s| s.objects.len()).sum()
    }

    /// Total number of event rules across all scenes.
    pub fn event_rule_count(&self) -> usize {
        self.scenes().map(|s| s.events.len()).sum()
    }

    /// The mobile profile this value was derived with, if any.
    pub fn overlay(&self) -> Option<&MobileProfile> {
        self.overlay.as_ref()
    }

    /// Whether this is a preview-only value that must never be committed.
    pub fn is_derived(&self) -> bool {
        self.overlay.is_some()
    }

    /// Whether `a` and `b` hold the same scene allocation.
    ///
    /// Used to observe structural sharing between versions.
    pub fn shares_scene(a: &Self, b: &Self, name: &str) -> bool {
        let find = |spec: &Self| spec.scenes.iter().find(|s| s.name == name).cloned();
        match (find(a), find(b)) {
            (Some(x), Some(y)) => Arc::ptr_eq(&x, &y),
            _ => false,
        }
    }
}

/// Top-level game settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProperties {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub resolution_mode: ResolutionMode,

    /// Device viewport, set only on mobile-derived values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

impl GameProperties {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            orientation: Orientation::default(),
            resolution_mode: ResolutionMode::default(),
            viewport: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    Default,
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
        }
    }
}

/// How the runtime adapts the game resolution to the window at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionMode {
    AdaptWidth,
    AdaptHeight,
    #[default]
    NoChanges,
}

impl ResolutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdaptWidth => "adaptWidth",
            Self::AdaptHeight => "adaptHeight",
            Self::NoChanges => "noChanges",
        }
    }
}

/// Logical viewport for a target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub user_scalable: bool,
}

/// A named asset file bundled with the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,

    /// Path relative to the asset root, `/`-separated.
    pub file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Image,
    Audio,
    Font,
    Json,
    Video,
}

impl ResourceKind {
    /// Classifies a file by extension. Unknown extensions are not assets.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => Some(Self::Image),
            "mp3" | "wav" | "ogg" => Some(Self::Audio),
            "ttf" | "otf" | "woff" | "woff2" => Some(Self::Font),
            "json" => Some(Self::Json),
            "mp4" | "webm" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Font => "font",
            Self::Json => "json",
            Self::Video => "video",
        }
    }
}

/// A level or screen: an ordered set of objects plus event rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) objects: Vec<Arc<GameObject>>,
    #[serde(default)]
    pub(crate) events: Vec<EventRule>,
}

impl Scene {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objects(&self) -> impl ExactSizeIterator<Item = &GameObject> {
        self.objects.iter().map(AsRef::as_ref)
    }

    pub fn object(&self, name: &str) -> Option<&GameObject> {
        self.objects().find(|o| o.name == name)
    }

    pub fn events(&self) -> &[EventRule] {
        &self.events
    }
}

/// An object placed in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameObject {
    pub(crate) name: String,
    pub(crate) kind: ObjectKind,
    #[serde(default)]
    pub(crate) behaviors: Vec<Behavior>,
    #[serde(default)]
    pub(crate) properties: BTreeMap<String, PropertyValue>,
}

impl GameObject {
    pub(crate) fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            behaviors: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn behaviors(&self) -> &[Behavior] {
        &self.behaviors
    }

    pub fn has_behavior(&self, kind: &BehaviorKind) -> bool {
        self.behaviors.iter().any(|b| &b.kind == kind)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Sprite,
    TiledSprite,
    PanelSprite,
    Text,
    Particles,

    /// On-screen control surface (d-pad, button, touch zone).
    TouchControl,
}

/// A behavior attached to an object.
///
/// Identity within an object is `(kind, name)`. Single-instance kinds never
/// carry a name; multi-instance kinds are told apart by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Behavior {
    pub kind: BehaviorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, PropertyValue>,
}

impl Behavior {
    pub fn new(kind: BehaviorKind) -> Self {
        Self {
            kind,
            name: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Whether this behavior answers to the given identity.
    pub fn is(&self, kind: &BehaviorKind, name: Option<&str>) -> bool {
        &self.kind == kind && self.name.as_deref() == name
    }

    /// `Kind` or `Kind:name`, for messages.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{name}", self.kind),
            None => self.kind.to_string(),
        }
    }
}

/// Behavior types understood by the runtime.
///
/// Anything of the form `Extension::Name` is accepted as an extension behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BehaviorKind {
    PlatformerObject,
    Platform,
    TopDownMovement,
    Physics,
    Health,
    Respawn,
    Bounce,
    Draggable,
    DestroyOutsideScreen,
    Tween,
    Timer,
    Extension(String),
}

impl BehaviorKind {
    /// The behavior that must also be attached for this one to work.
    pub fn prerequisite(&self) -> Option<BehaviorKind> {
        match self {
            Self::Respawn => Some(Self::Health),
            Self::Bounce => Some(Self::Physics),
            _ => None,
        }
    }

    /// Whether more than one instance may be attached to a single object.
    pub fn is_multi_instance(&self) -> bool {
        matches!(self, Self::Tween | Self::Timer)
    }

    /// Whether the behavior moves its object from player input.
    pub fn is_controllable(&self) -> bool {
        matches!(self, Self::PlatformerObject | Self::TopDownMovement)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PlatformerObject => "PlatformerObject",
            Self::Platform => "Platform",
            Self::TopDownMovement => "TopDownMovement",
            Self::Physics => "Physics",
            Self::Health => "Health",
            Self::Respawn => "Respawn",
            Self::Bounce => "Bounce",
            Self::Draggable => "Draggable",
            Self::DestroyOutsideScreen => "DestroyOutsideScreen",
            Self::Tween => "Tween",
            Self::Timer => "Timer",
            Self::Extension(name) => name,
        }
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown behavior type '{0}'")]
pub struct UnknownBehavior(String);

impl FromStr for BehaviorKind {
    type Err = UnknownBehavior;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "PlatformerObject" => Self::PlatformerObject,
            "Platform" => Self::Platform,
            "TopDownMovement" => Self::TopDownMovement,
            "Physics" => Self::Physics,
            "Health" => Self::Health,
            "Respawn" => Self::Respawn,
            "Bounce" => Self::Bounce,
            "Draggable" => Self::Draggable,
            "DestroyOutsideScreen" => Self::DestroyOutsideScreen,
            "Tween" => Self::Tween,
            "Timer" => Self::Timer,
            other => match other.split_once("::") {
                Some((ext, name)) if !ext.is_empty() && !name.is_empty() => {
                    Self::Extension(other.to_string())
                }
                _ => return Err(UnknownBehavior(other.to_string())),
            },
        };
        Ok(kind)
    }
}

impl TryFrom<String> for BehaviorKind {
    type Error = UnknownBehavior;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BehaviorKind> for String {
    fn from(kind: BehaviorKind) -> Self {
        match kind {
            BehaviorKind::Extension(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// A property or parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numbers must be finite; everything else always is.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            _ => true,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// What a property key refers to by name, if anything.
///
/// Relations between entities are names resolved against the specification,
/// never live pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// An object in the same scene.
    Object,
    Scene,
    Resource,
}

impl RefKind {
    pub fn for_key(key: &str) -> Option<Self> {
        match key {
            "targets" | "follows" | "spawns" | "attachedTo" => Some(Self::Object),
            "nextScene" => Some(Self::Scene),
            "image" | "sound" | "font" | "tileset" => Some(Self::Resource),
            _ => None,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Object => "object",
            Self::Scene => "scene",
            Self::Resource => "resource",
        })
    }
}

/// When all conditions hold, run the actions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRule {
    #[serde(default)]
    pub conditions: Vec<Instruction>,
    #[serde(default)]
    pub actions: Vec<Instruction>,
}

impl EventRule {
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.conditions.iter().chain(&self.actions)
    }
}

/// A single condition or action, naming the entities it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub kind: String,

    /// Object in the rule's scene.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

impl Instruction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            object: None,
            scene: None,
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn on_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    #[must_use]
    pub fn to_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameters.push(parameter.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_kind_parses_known_and_extension_names() {
        assert_eq!("Health".parse::<BehaviorKind>(), Ok(BehaviorKind::Health));
        assert_eq!(
            "Inventory::Holder".parse::<BehaviorKind>(),
            Ok(BehaviorKind::Extension("Inventory::Holder".into()))
        );
        assert!("Jetpack".parse::<BehaviorKind>().is_err());
        assert!("::Holder".parse::<BehaviorKind>().is_err());
    }

    #[test]
    fn behavior_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&BehaviorKind::PlatformerObject).unwrap();
        assert_eq!(json, "\"PlatformerObject\"");

        let err = serde_json::from_str::<BehaviorKind>("\"Teleport\"").unwrap_err();
        assert!(err.to_string().contains("unknown behavior type"));
    }

    #[test]
    fn property_values_deserialize_untagged() {
        let values: Vec<PropertyValue> = serde_json::from_str(r#"[true, 2.5, "Player"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                PropertyValue::Bool(true),
                PropertyValue::Number(2.5),
                PropertyValue::Text("Player".into()),
            ]
        );
    }

    #[test]
    fn reference_keys() {
        assert_eq!(RefKind::for_key("targets"), Some(RefKind::Object));
        assert_eq!(RefKind::for_key("nextScene"), Some(RefKind::Scene));
        assert_eq!(RefKind::for_key("image"), Some(RefKind::Resource));
        assert_eq!(RefKind::for_key("speed"), None);
    }

    #[test]
    fn new_specification_is_empty_at_version_zero() {
        let spec = GameSpecification::new("Untitled");
        assert_eq!(spec.version(), 0);
        assert_eq!(spec.scenes().len(), 0);
        assert_eq!(spec.object_count(), 0);
        assert!(!spec.is_derived());
    }
}
