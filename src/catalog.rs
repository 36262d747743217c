//! Command catalog - the remote application's commands and their display names
//!
//! Static, read-only after construction. Display names are localized through a
//! table keyed by [`Locale`]; anything missing falls back to English.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported UI languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    En,
    De,
    Es,
    Fr,
    It,
    Ja,
    Ko,
    Nl,
    Pt,
    Sv,
    ZhCn,
    ZhTw,
}

const LOCALE_TAGS: &[(&str, Locale)] = &[
    ("en", Locale::En),
    ("de", Locale::De),
    ("es", Locale::Es),
    ("fr", Locale::Fr),
    ("it", Locale::It),
    ("ja", Locale::Ja),
    ("ko", Locale::Ko),
    ("nl", Locale::Nl),
    ("pt", Locale::Pt),
    ("sv", Locale::Sv),
    ("zh_cn", Locale::ZhCn),
    ("zh_tw", Locale::ZhTw),
];

impl Locale {
    /// Parse a language tag such as `de`, `zh_TW` or `zh-cn`
    ///
    /// Region suffixes on languages without a regional table (`fr_CA`) map to
    /// the base language. Unknown tags give `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace('-', "_");
        LOCALE_TAGS
            .iter()
            .find(|(t, _)| *t == normalized)
            .or_else(|| {
                let base = normalized.split('_').next().unwrap_or_default();
                LOCALE_TAGS.iter().find(|(t, _)| *t == base)
            })
            .map(|(_, locale)| *locale)
    }

    /// Like [`Locale::parse`] but falls back to English
    pub fn parse_or_default(tag: &str) -> Self {
        Self::parse(tag).unwrap_or_default()
    }

    pub fn tag(self) -> &'static str {
        LOCALE_TAGS
            .iter()
            .find(|(_, l)| *l == self)
            .map(|(t, _)| *t)
            .unwrap_or("en")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How the remote application interprets a command's parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSemantics {
    /// Slider-like parameter that follows the control's value
    Continuous,
    /// One-shot action fired on button press
    Action,
    /// On/off state
    Toggle,
    /// Handled by the bridge itself: move to the previous/next profile
    ProfileSwitch,
}

/// One catalog row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub group: &'static str,
    pub min: f64,
    pub max: f64,
    pub semantics: ValueSemantics,
}

struct Row(
    &'static str,
    &'static str,
    &'static str,
    f64,
    f64,
    ValueSemantics,
);

use ValueSemantics::{Action, Continuous, ProfileSwitch, Toggle};

const COMMANDS: &[Row] = &[
    Row("Exposure", "Exposure", "Basic", -5.0, 5.0, Continuous),
    Row("Contrast", "Contrast", "Basic", -100.0, 100.0, Continuous),
    Row("Highlights", "Highlights", "Basic", -100.0, 100.0, Continuous),
    Row("Shadows", "Shadows", "Basic", -100.0, 100.0, Continuous),
    Row("Whites", "Whites", "Basic", -100.0, 100.0, Continuous),
    Row("Blacks", "Blacks", "Basic", -100.0, 100.0, Continuous),
    Row("Temperature", "Temperature", "Basic", 2000.0, 50000.0, Continuous),
    Row("Tint", "Tint", "Basic", -150.0, 150.0, Continuous),
    Row("Texture", "Texture", "Presence", -100.0, 100.0, Continuous),
    Row("Clarity", "Clarity", "Presence", -100.0, 100.0, Continuous),
    Row("Dehaze", "Dehaze", "Presence", -100.0, 100.0, Continuous),
    Row("Vibrance", "Vibrance", "Presence", -100.0, 100.0, Continuous),
    Row("Saturation", "Saturation", "Presence", -100.0, 100.0, Continuous),
    Row("Sharpness", "Sharpening Amount", "Detail", 0.0, 150.0, Continuous),
    Row("LuminanceSmoothing", "Luminance Noise Reduction", "Detail", 0.0, 100.0, Continuous),
    Row("PostCropVignetteAmount", "Vignette Amount", "Effects", -100.0, 100.0, Continuous),
    Row("GrainAmount", "Grain Amount", "Effects", 0.0, 100.0, Continuous),
    Row("CropAngle", "Crop Angle", "Crop", -45.0, 45.0, Continuous),
    Row("Pick", "Pick", "Library", 0.0, 1.0, Action),
    Row("Reject", "Reject", "Library", 0.0, 1.0, Action),
    Row("RemoveFlag", "Unflag", "Library", 0.0, 1.0, Action),
    Row("SetRating1", "Rating 1", "Library", 0.0, 1.0, Action),
    Row("SetRating5", "Rating 5", "Library", 0.0, 1.0, Action),
    Row("Next", "Next Photo", "Navigation", 0.0, 1.0, Action),
    Row("Prev", "Previous Photo", "Navigation", 0.0, 1.0, Action),
    Row("Undo", "Undo", "General", 0.0, 1.0, Action),
    Row("Redo", "Redo", "General", 0.0, 1.0, Action),
    Row("ResetAll", "Reset All Settings", "General", 0.0, 1.0, Action),
    Row("ToggleBeforeAfter", "Before/After", "View", 0.0, 1.0, Toggle),
    Row("ToggleZoom", "Zoom", "View", 0.0, 1.0, Toggle),
    Row("PrevPro", "Previous Profile", "Profiles", 0.0, 1.0, ProfileSwitch),
    Row("NextPro", "Next Profile", "Profiles", 0.0, 1.0, ProfileSwitch),
];

const TRANSLATIONS: &[(Locale, &[(&str, &str)])] = &[
    (
        Locale::De,
        &[
            ("Exposure", "Belichtung"),
            ("Contrast", "Kontrast"),
            ("Highlights", "Lichter"),
            ("Shadows", "Tiefen"),
            ("Whites", "Weiß"),
            ("Blacks", "Schwarz"),
            ("Temperature", "Temperatur"),
            ("Tint", "Tönung"),
            ("Clarity", "Klarheit"),
            ("Saturation", "Sättigung"),
            ("Undo", "Rückgängig"),
            ("Next", "Nächstes Foto"),
            ("Prev", "Vorheriges Foto"),
            ("PrevPro", "Vorheriges Profil"),
            ("NextPro", "Nächstes Profil"),
        ],
    ),
    (
        Locale::Fr,
        &[
            ("Exposure", "Exposition"),
            ("Contrast", "Contraste"),
            ("Highlights", "Hautes lumières"),
            ("Shadows", "Ombres"),
            ("Whites", "Blancs"),
            ("Blacks", "Noirs"),
            ("Temperature", "Température"),
            ("Tint", "Teinte"),
            ("Clarity", "Clarté"),
            ("Undo", "Annuler"),
            ("PrevPro", "Profil précédent"),
            ("NextPro", "Profil suivant"),
        ],
    ),
    (
        Locale::Es,
        &[
            ("Exposure", "Exposición"),
            ("Contrast", "Contraste"),
            ("Highlights", "Iluminaciones"),
            ("Shadows", "Sombras"),
            ("Temperature", "Temperatura"),
            ("Undo", "Deshacer"),
        ],
    ),
    (
        Locale::Ja,
        &[
            ("Exposure", "露光量"),
            ("Contrast", "コントラスト"),
            ("Highlights", "ハイライト"),
            ("Shadows", "シャドウ"),
        ],
    ),
];

/// Read-only table of supported commands
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    locale: Locale,
    commands: Vec<CommandInfo>,
    index: HashMap<&'static str, usize>,
}

impl CommandCatalog {
    /// Build the catalog with display names for `locale`
    pub fn new(locale: Locale) -> Self {
        let translations: HashMap<&str, &str> = TRANSLATIONS
            .iter()
            .find(|(l, _)| *l == locale)
            .map(|(_, table)| table.iter().copied().collect())
            .unwrap_or_default();

        let commands: Vec<CommandInfo> = COMMANDS
            .iter()
            .map(|Row(id, name, group, min, max, semantics)| CommandInfo {
                id: *id,
                display_name: translations.get(id).copied().unwrap_or(*name),
                group: *group,
                min: *min,
                max: *max,
                semantics: *semantics,
            })
            .collect();
        let index = commands
            .iter()
            .enumerate()
            .map(|(i, info)| (info.id, i))
            .collect();

        Self {
            locale,
            commands,
            index,
        }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn lookup(&self, id: &str) -> Option<&CommandInfo> {
        self.index.get(id).map(|i| &self.commands[*i])
    }

    pub fn all(&self) -> &[CommandInfo] {
        &self.commands
    }

    /// Distinct groups in catalog order
    pub fn groups(&self) -> Vec<&'static str> {
        let mut groups: Vec<&'static str> = Vec::new();
        for info in &self.commands {
            if !groups.contains(&info.group) {
                groups.push(info.group);
            }
        }
        groups
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::new(Locale::En)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parsing() {
        assert_eq!(Locale::parse("de"), Some(Locale::De));
        assert_eq!(Locale::parse("zh_TW"), Some(Locale::ZhTw));
        assert_eq!(Locale::parse("zh-cn"), Some(Locale::ZhCn));
        assert_eq!(Locale::parse("fr_CA"), Some(Locale::Fr));
        assert_eq!(Locale::parse("tlh"), None);
        assert_eq!(Locale::parse_or_default("tlh"), Locale::En);
    }

    #[test]
    fn test_lookup_and_not_found() {
        let catalog = CommandCatalog::default();
        let exposure = catalog.lookup("Exposure").unwrap();
        assert_eq!(exposure.display_name, "Exposure");
        assert_eq!(exposure.semantics, ValueSemantics::Continuous);
        assert!(catalog.lookup("Teleport").is_none());
        assert_eq!(catalog.all().len(), COMMANDS.len());
    }

    #[test]
    fn test_localized_names_fall_back_to_english() {
        let catalog = CommandCatalog::new(Locale::De);
        assert_eq!(catalog.lookup("Exposure").unwrap().display_name, "Belichtung");
        assert_eq!(catalog.lookup("Dehaze").unwrap().display_name, "Dehaze");

        // No table at all for Korean
        let catalog = CommandCatalog::new(Locale::Ko);
        assert_eq!(catalog.lookup("Exposure").unwrap().display_name, "Exposure");
    }

    #[test]
    fn test_profile_switch_commands() {
        let catalog = CommandCatalog::default();
        assert_eq!(
            catalog.lookup("NextPro").unwrap().semantics,
            ValueSemantics::ProfileSwitch
        );
        assert!(catalog.groups().contains(&"Profiles"));
    }
}
