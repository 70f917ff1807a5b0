//! Built-in starting points for a new session.
//!
//! Each template is an edit batch replayed onto an empty specification, so a
//! template can only ever produce something the edit interpreter accepts.

use std::fmt;
use std::str::FromStr;

use crate::edit::{self, EditError};
use crate::model::{
    BehaviorKind, EditOperation, EventRule, GameSpecification, Instruction, ObjectKind,
    Orientation,
};
use crate::validate::{self, Limits, ValidationResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Template {
    #[default]
    Blank,
    Platformer,
    TopDown,
    Puzzle,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown template '{0}'; expected one of: blank, platformer, top-down, puzzle")]
pub struct UnknownTemplate(String);

impl Template {
    pub const ALL: [Template; 4] = [Self::Blank, Self::Platformer, Self::TopDown, Self::Puzzle];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "blank",
            Self::Platformer => "platformer",
            Self::TopDown => "top-down",
            Self::Puzzle => "puzzle",
        }
    }

    /// Picks a template from a free-form game description.
    ///
    /// Falls back to [`Template::Blank`] when nothing matches.
    pub fn from_description(description: &str) -> Self {
        const KEYWORDS: &[(&str, Template)] = &[
            ("platform", Template::Platformer),
            ("jump", Template::Platformer),
            ("runner", Template::Platformer),
            ("top-down", Template::TopDown),
            ("top down", Template::TopDown),
            ("topdown", Template::TopDown),
            ("rpg", Template::TopDown),
            ("adventure", Template::TopDown),
            ("puzzle", Template::Puzzle),
            ("match", Template::Puzzle),
            ("grid", Template::Puzzle),
            ("tile", Template::Puzzle),
        ];
        let description = description.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(keyword, _)| description.contains(keyword))
            .map_or(Self::Blank, |&(_, template)| template)
    }

    /// Builds the template as a version-0 specification named `name`.
    pub fn build(self, name: &str) -> Result<GameSpecification, EditError> {
        let mut spec = GameSpecification::new(name);
        edit::apply_ops(&mut spec, &self.operations())?;
        if let ValidationResult::Invalid(errors) = validate::validate(&spec, &Limits::default()) {
            return Err(EditError::ValidationFailed(errors));
        }
        Ok(spec)
    }

    fn operations(self) -> Vec<EditOperation> {
        match self {
            Self::Blank => vec![EditOperation::add_scene("Main")],
            Self::Platformer => platformer(),
            Self::TopDown => top_down(),
            Self::Puzzle => puzzle(),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Template {
    type Err = UnknownTemplate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTemplate(s.to_string()))
    }
}

fn platformer() -> Vec<EditOperation> {
    const LEVEL: &str = "Level1";
    vec![
        EditOperation::SetGameProperties {
            name: None,
            description: Some("Run, jump and collect coins.".into()),
            orientation: Some(Orientation::Landscape),
            resolution_mode: None,
        },
        EditOperation::add_scene(LEVEL),
        EditOperation::add_object(LEVEL, "Player", ObjectKind::Sprite),
        EditOperation::add_behavior(LEVEL, "Player", BehaviorKind::PlatformerObject),
        EditOperation::add_behavior(LEVEL, "Player", BehaviorKind::Health),
        EditOperation::add_behavior(LEVEL, "Player", BehaviorKind::Respawn),
        EditOperation::add_object(LEVEL, "Ground", ObjectKind::TiledSprite),
        EditOperation::add_behavior(LEVEL, "Ground", BehaviorKind::Platform),
        EditOperation::add_object(LEVEL, "Coin", ObjectKind::Sprite),
        EditOperation::add_object(LEVEL, "Score", ObjectKind::Text),
        EditOperation::set_property(LEVEL, "Score", "text", "Score: 0"),
        EditOperation::ReplaceEventRules {
            scene: LEVEL.into(),
            rules: vec![EventRule {
                conditions: vec![
                    Instruction::new("CollisionNP")
                        .on_object("Player")
                        .with_parameter("Coin"),
                ],
                actions: vec![Instruction::new("Delete").on_object("Coin")],
            }],
        },
    ]
}

fn top_down() -> Vec<EditOperation> {
    const WORLD: &str = "World";
    vec![
        EditOperation::SetGameProperties {
            name: None,
            description: Some("Explore the map from above.".into()),
            orientation: Some(Orientation::Landscape),
            resolution_mode: None,
        },
        EditOperation::add_scene(WORLD),
        EditOperation::add_object(WORLD, "Hero", ObjectKind::Sprite),
        EditOperation::add_behavior(WORLD, "Hero", BehaviorKind::TopDownMovement),
        EditOperation::add_object(WORLD, "Wall", ObjectKind::TiledSprite),
        EditOperation::add_object(WORLD, "Chest", ObjectKind::Sprite),
        EditOperation::ReplaceEventRules {
            scene: WORLD.into(),
            rules: vec![EventRule {
                conditions: vec![
                    Instruction::new("CollisionNP")
                        .on_object("Hero")
                        .with_parameter("Wall"),
                ],
                actions: vec![Instruction::new("SeparateFromObjects").on_object("Hero")],
            }],
        },
    ]
}

fn puzzle() -> Vec<EditOperation> {
    const BOARD: &str = "Board";
    const WIN: &str = "Win";
    vec![
        EditOperation::SetGameProperties {
            name: None,
            description: Some("Drag tiles into place.".into()),
            orientation: Some(Orientation::Portrait),
            resolution_mode: None,
        },
        EditOperation::add_scene(BOARD),
        EditOperation::add_scene(WIN),
        EditOperation::add_object(BOARD, "Tile", ObjectKind::PanelSprite),
        EditOperation::add_behavior(BOARD, "Tile", BehaviorKind::Draggable),
        EditOperation::add_object(BOARD, "Goal", ObjectKind::Sprite),
        EditOperation::set_property(BOARD, "Goal", "nextScene", WIN),
        EditOperation::add_object(WIN, "Message", ObjectKind::Text),
        EditOperation::set_property(WIN, "Message", "text", "Solved!"),
        EditOperation::ReplaceEventRules {
            scene: BOARD.into(),
            rules: vec![EventRule {
                conditions: vec![
                    Instruction::new("CollisionNP")
                        .on_object("Tile")
                        .with_parameter("Goal"),
                ],
                actions: vec![Instruction::new("Scene").to_scene(WIN)],
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_is_a_valid_version_zero() {
        for template in Template::ALL {
            let spec = template.build("Starter").unwrap();
            assert_eq!(spec.version(), 0, "{template}");
            assert_eq!(spec.properties().name, "Starter");
            assert!(spec.scenes().len() >= 1, "{template}");
            assert!(validate::validate(&spec, &Limits::default()).is_valid());
        }
    }

    #[test]
    fn platformer_has_a_controllable_player() {
        let spec = Template::Platformer.build("Jumper").unwrap();
        let player = spec.scene("Level1").unwrap().object("Player").unwrap();
        assert!(player.has_behavior(&BehaviorKind::PlatformerObject));
        assert_eq!(spec.properties().orientation, Orientation::Landscape);
    }

    #[test]
    fn names_round_trip() {
        for template in Template::ALL {
            assert_eq!(template.as_str().parse::<Template>(), Ok(template));
        }
        assert!("tower-defense".parse::<Template>().is_err());
    }

    #[test]
    fn descriptions_pick_a_template() {
        assert_eq!(Template::from_description("A Mario-style platformer"), Template::Platformer);
        assert_eq!(Template::from_description("zelda-like top down RPG"), Template::TopDown);
        assert_eq!(Template::from_description("match-3"), Template::Puzzle);
        assert_eq!(Template::from_description("something else"), Template::Blank);
    }
}
