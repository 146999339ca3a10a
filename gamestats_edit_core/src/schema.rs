use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::binary_kv::KvNode;

/// Permission bits that mark a definition as server-owned. Anything with one
/// of these bits set can never be written from the client.
pub const PROTECTED_MASK: i32 = 3;

const ENGLISH: &str = "english";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawStatType {
    Integer,
    Float,
    AverageRate,
    Achievements,
    GroupAchievements,
}

static STAT_TYPES: Lazy<HashMap<i32, RawStatType>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(1, RawStatType::Integer);
    map.insert(2, RawStatType::Float);
    map.insert(3, RawStatType::AverageRate);
    map.insert(4, RawStatType::Achievements);
    map.insert(5, RawStatType::GroupAchievements);
    map
});

#[derive(Debug, Clone)]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    /// English text is always retained so search works regardless of the
    /// active language.
    pub english_name: String,
    pub english_description: String,
    pub icon_normal: String,
    pub icon_locked: String,
    pub is_hidden: bool,
    pub permission: i32,
}

impl AchievementDefinition {
    pub fn is_protected(&self) -> bool {
        self.permission & PROTECTED_MASK != 0
    }
}

#[derive(Debug, Clone)]
pub struct IntStatDefinition {
    pub id: String,
    pub display_name: String,
    pub min_value: i32,
    pub max_value: i32,
    /// Largest absolute change a single commit may apply; 0 means unbounded.
    pub max_change: i32,
    pub increment_only: bool,
    pub default_value: i32,
    pub permission: i32,
}

#[derive(Debug, Clone)]
pub struct FloatStatDefinition {
    pub id: String,
    pub display_name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub max_change: f32,
    pub increment_only: bool,
    pub default_value: f32,
    pub permission: i32,
}

#[derive(Debug, Clone)]
pub enum StatDefinition {
    Integer(IntStatDefinition),
    Float(FloatStatDefinition),
}

impl StatDefinition {
    pub fn id(&self) -> &str {
        match self {
            StatDefinition::Integer(def) => &def.id,
            StatDefinition::Float(def) => &def.id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            StatDefinition::Integer(def) => &def.display_name,
            StatDefinition::Float(def) => &def.display_name,
        }
    }

    pub fn permission(&self) -> i32 {
        match self {
            StatDefinition::Integer(def) => def.permission,
            StatDefinition::Float(def) => def.permission,
        }
    }

    pub fn increment_only(&self) -> bool {
        match self {
            StatDefinition::Integer(def) => def.increment_only,
            StatDefinition::Float(def) => def.increment_only,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.permission() & PROTECTED_MASK != 0
    }
}

/// Definitions for one title, extracted from a decoded schema tree. Holds no
/// live values; those belong to the session layer.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    pub game_id: String,
    pub language: String,
    pub achievements: Vec<AchievementDefinition>,
    pub stats: Vec<StatDefinition>,
}

impl SchemaCatalog {
    pub fn empty(game_id: &str, language: &str) -> Self {
        Self {
            game_id: game_id.to_string(),
            language: language.to_string(),
            achievements: Vec::new(),
            stats: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty() && self.stats.is_empty()
    }

    pub fn achievement(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|def| def.id == id)
    }

    pub fn stat(&self, id: &str) -> Option<&StatDefinition> {
        self.stats.iter().find(|def| def.id() == id)
    }
}

/// Resolves localized text: exact requested language, then English, then the
/// node's own scalar value, then the supplied default. Each localized field
/// re-derives this independently.
pub fn localized_string(node: Option<&KvNode>, language: &str, default: &str) -> String {
    let Some(node) = node else {
        return default.to_string();
    };
    if let Some(text) = node.child(language).and_then(KvNode::scalar_text) {
        return text;
    }
    if let Some(text) = node.child(ENGLISH).and_then(KvNode::scalar_text) {
        return text;
    }
    if let Some(text) = node.scalar_text() {
        return text;
    }
    default.to_string()
}

/// Extracts all achievement and stat definitions for one title. Pure function
/// of the decoded tree; a missing stats section yields an empty catalog, not
/// an error.
pub fn build_catalog(root: &KvNode, game_id: &str, language: &str) -> SchemaCatalog {
    let Some(stats_section) = find_stats_section(root, game_id) else {
        debug!(game_id, "schema has no stats section");
        return SchemaCatalog::empty(game_id, language);
    };

    let mut catalog = SchemaCatalog::empty(game_id, language);
    for stat in &stats_section.children {
        let raw_type = stat
            .child("type_int")
            .or_else(|| stat.child("type"))
            .and_then(KvNode::as_i32)
            .unwrap_or(0);
        let Some(stat_type) = STAT_TYPES.get(&raw_type) else {
            debug!(game_id, raw_type, node = %stat.name, "skipping stat with unknown type");
            continue;
        };

        match stat_type {
            RawStatType::Integer => {
                catalog
                    .stats
                    .push(StatDefinition::Integer(build_int_stat(stat, language)));
            }
            RawStatType::Float | RawStatType::AverageRate => {
                catalog
                    .stats
                    .push(StatDefinition::Float(build_float_stat(stat, language)));
            }
            RawStatType::Achievements | RawStatType::GroupAchievements => {
                if let Some(bits) = stat.child("bits") {
                    for bit in &bits.children {
                        catalog.achievements.push(build_achievement(bit, language));
                    }
                }
            }
        }
    }
    catalog
}

/// Lookup path is root → child named after the title → "stats". Two fallbacks
/// cover schemas shipped without the title wrapper: the root itself, then the
/// first child of root, whichever carries a "stats" section.
fn find_stats_section<'a>(root: &'a KvNode, game_id: &str) -> Option<&'a KvNode> {
    if let Some(section) = root.child(game_id).and_then(|game| game.child("stats")) {
        return Some(section);
    }
    if let Some(section) = root.child("stats") {
        return Some(section);
    }
    root.children
        .first()
        .and_then(|first| first.child("stats"))
}

// Stat and bit nodes carry their stable id in a "name" child; fall back to
// the node's own key so ids stay unique when it is missing.
fn stat_id(node: &KvNode) -> String {
    node.child("name")
        .and_then(KvNode::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| node.name.clone())
}

fn build_int_stat(stat: &KvNode, language: &str) -> IntStatDefinition {
    let id = stat_id(stat);
    let display = stat.child("display").and_then(|d| d.child("name"));
    IntStatDefinition {
        display_name: localized_string(display, language, &id),
        min_value: stat.child("min").and_then(KvNode::as_i32).unwrap_or(i32::MIN),
        max_value: stat.child("max").and_then(KvNode::as_i32).unwrap_or(i32::MAX),
        max_change: stat
            .child("maxchange")
            .and_then(KvNode::as_i32)
            .unwrap_or(0),
        increment_only: stat
            .child("incrementonly")
            .and_then(KvNode::as_bool)
            .unwrap_or(false),
        default_value: stat
            .child("default")
            .and_then(KvNode::as_i32)
            .unwrap_or(0),
        permission: stat
            .child("permission")
            .and_then(KvNode::as_i32)
            .unwrap_or(0),
        id,
    }
}

fn build_float_stat(stat: &KvNode, language: &str) -> FloatStatDefinition {
    let id = stat_id(stat);
    let display = stat.child("display").and_then(|d| d.child("name"));
    FloatStatDefinition {
        display_name: localized_string(display, language, &id),
        min_value: stat
            .child("min")
            .and_then(KvNode::as_f32)
            .unwrap_or(f32::MIN),
        max_value: stat
            .child("max")
            .and_then(KvNode::as_f32)
            .unwrap_or(f32::MAX),
        max_change: stat
            .child("maxchange")
            .and_then(KvNode::as_f32)
            .unwrap_or(0.0),
        increment_only: stat
            .child("incrementonly")
            .and_then(KvNode::as_bool)
            .unwrap_or(false),
        default_value: stat
            .child("default")
            .and_then(KvNode::as_f32)
            .unwrap_or(0.0),
        permission: stat
            .child("permission")
            .and_then(KvNode::as_i32)
            .unwrap_or(0),
        id,
    }
}

fn build_achievement(bit: &KvNode, language: &str) -> AchievementDefinition {
    let id = stat_id(bit);
    let display = bit.child("display");
    let name_node = display.and_then(|d| d.child("name"));
    let desc_node = display.and_then(|d| d.child("desc"));
    AchievementDefinition {
        name: localized_string(name_node, language, &id),
        description: localized_string(desc_node, language, ""),
        english_name: localized_string(name_node, ENGLISH, &id),
        english_description: localized_string(desc_node, ENGLISH, ""),
        icon_normal: display
            .and_then(|d| d.child("icon"))
            .and_then(KvNode::as_str)
            .unwrap_or_default()
            .to_string(),
        icon_locked: display
            .and_then(|d| d.child("icon_gray"))
            .and_then(KvNode::as_str)
            .unwrap_or_default()
            .to_string(),
        is_hidden: display
            .and_then(|d| d.child("hidden"))
            .and_then(KvNode::as_bool)
            .unwrap_or(false),
        permission: bit
            .child("permission")
            .and_then(KvNode::as_i32)
            .unwrap_or(0),
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_catalog, localized_string, StatDefinition};
    use crate::binary_kv::{decode, stream::StreamBuilder};

    fn sample_schema() -> Vec<u8> {
        StreamBuilder::new()
            .begin_nested("440")
            .begin_nested("stats")
            .begin_nested("1")
            .int32("type", 1)
            .string("name", "Kills")
            .int32("min", 0)
            .int32("max", 9999)
            .int32("incrementonly", 1)
            .begin_nested("display")
            .begin_nested("name")
            .string("english", "Total kills")
            .string("german", "Abschüsse")
            .end()
            .end()
            .end()
            .begin_nested("2")
            .int32("type", 2)
            .string("name", "Accuracy")
            .float32("min", 0.0)
            .float32("max", 1.0)
            .int32("permission", 2)
            .end()
            .begin_nested("3")
            .int32("type", 4)
            .begin_nested("bits")
            .begin_nested("0")
            .string("name", "Win10")
            .int32("permission", 1)
            .begin_nested("display")
            .begin_nested("name")
            .string("english", "Decorated veteran")
            .end()
            .begin_nested("desc")
            .string("english", "Win 10 rounds")
            .end()
            .string("icon", "win10.jpg")
            .string("icon_gray", "win10_locked.jpg")
            .int32("hidden", 1)
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .finish()
    }

    #[test]
    fn catalog_extracts_definitions() {
        let root = decode(&sample_schema()).expect("decode");
        let catalog = build_catalog(&root, "440", "german");

        assert_eq!(catalog.stats.len(), 2);
        match catalog.stat("Kills").expect("Kills present") {
            StatDefinition::Integer(def) => {
                assert_eq!(def.display_name, "Abschüsse");
                assert_eq!(def.min_value, 0);
                assert_eq!(def.max_value, 9999);
                assert!(def.increment_only);
                assert_eq!(def.max_change, 0);
                assert!(!catalog.stat("Kills").unwrap().is_protected());
            }
            other => panic!("expected integer stat, got {other:?}"),
        }
        match catalog.stat("Accuracy").expect("Accuracy present") {
            StatDefinition::Float(def) => {
                assert_eq!(def.permission, 2);
                assert!(catalog.stat("Accuracy").unwrap().is_protected());
            }
            other => panic!("expected float stat, got {other:?}"),
        }

        assert_eq!(catalog.achievements.len(), 1);
        let ach = catalog.achievement("Win10").expect("Win10 present");
        assert_eq!(ach.name, "Decorated veteran");
        assert_eq!(ach.english_name, "Decorated veteran");
        assert_eq!(ach.description, "Win 10 rounds");
        assert_eq!(ach.icon_normal, "win10.jpg");
        assert_eq!(ach.icon_locked, "win10_locked.jpg");
        assert!(ach.is_hidden);
        assert!(ach.is_protected());
    }

    #[test]
    fn average_rate_maps_to_float() {
        let bytes = StreamBuilder::new()
            .begin_nested("10")
            .begin_nested("stats")
            .begin_nested("1")
            .int32("type_int", 3)
            .string("name", "KillsPerHour")
            .end()
            .end()
            .end()
            .end()
            .finish();
        let root = decode(&bytes).expect("decode");
        let catalog = build_catalog(&root, "10", "english");
        assert!(matches!(
            catalog.stat("KillsPerHour"),
            Some(StatDefinition::Float(_))
        ));
    }

    #[test]
    fn missing_stats_section_yields_empty_catalog() {
        let bytes = StreamBuilder::new()
            .begin_nested("500")
            .string("gamename", "No Stats Here")
            .end()
            .end()
            .finish();
        let root = decode(&bytes).expect("decode");
        let catalog = build_catalog(&root, "500", "english");
        assert!(catalog.is_empty());
    }

    #[test]
    fn root_level_stats_fallback() {
        // some schemas ship without the title wrapper node
        let bytes = StreamBuilder::new()
            .begin_nested("stats")
            .begin_nested("1")
            .int32("type", 1)
            .string("name", "Score")
            .end()
            .end()
            .end()
            .finish();
        let root = decode(&bytes).expect("decode");
        let catalog = build_catalog(&root, "99", "english");
        assert!(catalog.stat("Score").is_some());
    }

    #[test]
    fn first_child_stats_fallback() {
        let bytes = StreamBuilder::new()
            .begin_nested("wrong_id")
            .begin_nested("stats")
            .begin_nested("1")
            .int32("type", 1)
            .string("name", "Score")
            .end()
            .end()
            .end()
            .end()
            .finish();
        let root = decode(&bytes).expect("decode");
        let catalog = build_catalog(&root, "99", "english");
        assert!(catalog.stat("Score").is_some());
    }

    #[test]
    fn localized_string_fallback_chain() {
        let bytes = StreamBuilder::new()
            .begin_nested("display")
            .begin_nested("name")
            .string("english", "English only")
            .end()
            .string("plain", "scalar text")
            .begin_nested("empty")
            .end()
            .end()
            .end()
            .finish();
        let root = decode(&bytes).expect("decode");
        let display = root.child("display").expect("display");

        // only "english" present: any other language falls back to it
        assert_eq!(
            localized_string(display.child("name"), "french", "dflt"),
            "English only"
        );
        // scalar node with no language children: its own value
        assert_eq!(
            localized_string(display.child("plain"), "french", "dflt"),
            "scalar text"
        );
        // nothing at all: supplied default
        assert_eq!(localized_string(display.child("empty"), "french", "dflt"), "dflt");
        assert_eq!(localized_string(None, "french", "Kills"), "Kills");
    }
}
