//! Keymap selection
//!
//! Turns the keyboard fields of the client core data (layout id, type and
//! subtype) into xkb rule names and compiles them with libxkbcommon.
//!
//! Layout ids are Windows keyboard layout identifiers (KLIDs): the low word
//! is the language id, the high word selects a variant.

use crate::input::error::{InputError, Result};
use serde::Serialize;
use tracing::{debug, warn};
use xkbcommon::xkb;

/// Keyboard description reported by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardInfo {
    /// Keyboard layout identifier
    pub layout: u32,
    /// Keyboard type (1..=8)
    pub keyboard_type: u32,
    /// OEM subtype
    pub subtype: u32,
}

/// Keyboard type: IBM enhanced (101/102-key)
pub const KBD_TYPE_IBM_ENHANCED: u32 = 4;
/// Keyboard type: Japanese
pub const KBD_TYPE_JAPANESE: u32 = 7;
/// Keyboard type: Korean
pub const KBD_TYPE_KOREAN: u32 = 8;

const LANG_JAPANESE: u32 = 0x0411;
const LANG_KOREAN: u32 = 0x0412;
const KBD_PORTUGUESE_BRAZILIAN_ABNT2: u32 = 0x0001_0416;

/// KLID to xkb layout and variant
///
/// Rows with no layout are known ids that xkb has no equivalent for.
const LAYOUTS: &[(u32, Option<&str>, Option<&str>)] = &[
    (0x0000_0401, Some("ara"), None),
    (0x0000_0402, None, None),
    (0x0000_0404, None, None),
    (0x0000_0405, Some("cz"), None),
    (0x0002_0405, Some("cz"), Some("bksl")),
    (0x0001_0405, Some("cz"), Some("qwerty")),
    (0x0000_0406, Some("dk"), None),
    (0x0000_0407, Some("de"), None),
    (0xB000_0407, Some("de"), Some("neo")),
    (0x0001_0407, Some("de"), Some("qwerty")),
    (0x0000_0408, Some("gr"), None),
    (0x0001_0408, Some("gr"), Some("simple")),
    (0x0002_0408, Some("gr"), Some("extended")),
    (0x0006_0408, Some("gr"), Some("polytonic")),
    (0x0000_0409, Some("us"), None),
    (0x0002_0409, Some("us"), Some("intl")),
    (0x0005_0409, Some("ara"), Some("buckwalter")),
    (0x0000_040A, Some("es"), None),
    (0x0001_040A, Some("es"), Some("nodeadkeys")),
    (0x0000_040B, Some("fi"), None),
    (0x0000_040C, Some("fr"), None),
    (0x0000_040D, Some("il"), None),
    (0x0000_040E, Some("hu"), None),
    (0x0001_040E, Some("hu"), Some("standard")),
    (0x0000_040F, Some("is"), None),
    (0x0000_0410, Some("it"), None),
    (0x0001_0410, Some("it"), Some("nodeadkeys")),
    (0x0000_0411, Some("jp"), None),
    (0xE001_0411, Some("jp"), Some("kana")),
    (0x0000_0412, Some("kr"), None),
    (0xE001_0412, Some("kr"), Some("kr104")),
    (0x0000_0413, Some("nl"), None),
    (0x0000_0414, Some("no"), None),
    (0x0000_0415, Some("pl"), None),
    (0x0001_0415, Some("pl"), Some("qwertz")),
    (0x0000_0416, Some("br"), None),
    (0x0001_0416, Some("br"), Some("nativo")),
    (0x0000_0418, Some("ro"), None),
    (0x0000_0419, Some("ru"), None),
    (0x0001_0419, Some("ru"), Some("typewriter")),
    (0x0000_041A, Some("hr"), None),
    (0x0000_041B, Some("sk"), None),
    (0x0001_041B, Some("sk"), Some("qwerty")),
    (0x0000_041C, None, None),
    (0x0000_041D, Some("se"), None),
    (0x0000_041E, Some("th"), None),
    (0x0001_041E, Some("th"), Some("tis")),
    (0x0000_041F, Some("tr"), None),
    (0x0001_041F, Some("tr"), Some("f")),
    (0x0000_0420, Some("in"), Some("urd-phonetic3")),
    (0x0000_0422, Some("ua"), None),
    (0x0000_0423, Some("by"), None),
    (0x0000_0424, Some("si"), None),
    (0x0000_0425, Some("ee"), None),
    (0x0000_0426, Some("lv"), None),
    (0x0001_0426, Some("lv"), Some("qwerty")),
    (0x0000_0427, Some("lt"), Some("ibm")),
    (0x0001_0427, Some("lt"), None),
    (0x0000_0429, Some("ir"), Some("pes")),
    (0x0005_0429, Some("af"), Some("basic")),
    (0x0000_0428, Some("tj"), None),
    (0x0000_042A, Some("vn"), None),
    (0x0000_042B, Some("am"), None),
    (0x0001_042B, Some("am"), Some("western")),
    (0x0000_042C, None, None),
    (0x0000_042F, Some("mk"), None),
    (0x0000_0437, Some("ge"), None),
    (0x0000_0438, None, None),
    (0x0000_0439, None, None),
    (0x0001_0439, Some("in"), None),
    (0x0000_043A, None, None),
    (0x0001_043A, Some("mt"), None),
    (0x0000_043B, Some("no"), Some("smi")),
    (0x0001_043B, Some("no"), Some("smi")),
    (0x0000_043F, Some("kz"), None),
    (0x0000_0440, Some("kg"), Some("phonetic")),
    (0x0000_0442, Some("tm"), None),
    (0x0000_0443, Some("uz"), Some("latin")),
    (0x0000_0444, Some("ru"), Some("tt")),
    (0x0000_0445, Some("bd"), None),
    (0x0001_0445, Some("bd"), Some("probhat")),
    (0x0000_0446, None, None),
    (0x0000_0447, Some("in"), Some("guj")),
    (0x0000_0449, Some("in"), Some("tam")),
    (0x0000_044A, Some("in"), Some("tel")),
    (0x0000_044B, Some("in"), Some("kan")),
    (0x0000_044C, Some("in"), Some("mal")),
    (0x0000_044E, None, None),
    (0x0000_0450, Some("mn"), None),
    (0x0000_0452, Some("gb"), Some("intl")),
    (0x0000_045A, Some("syc"), None),
    (0x0001_045A, Some("syc"), Some("syc_phonetic")),
    (0x0000_0461, Some("np"), None),
    (0x0000_0462, Some("nl"), None),
    (0x0000_0463, Some("af"), Some("ps")),
    (0x0000_0465, None, None),
    (0x0001_0465, None, None),
    (0x0000_046E, None, None),
    (0x0000_0481, Some("mao"), None),
    (0x0000_0804, None, None),
    (0x0000_0807, Some("ch"), Some("de_nodeadkeys")),
    (0x0000_0809, Some("gb"), None),
    (0x0000_080A, Some("latam"), None),
    (0x0000_080C, Some("be"), None),
    (0x0001_080C, Some("be"), None),
    (0x0000_0813, Some("be"), Some("oss_sundeadkeys")),
    (0x0000_0816, Some("pt"), None),
    (0x0000_081A, Some("rs"), Some("latin")),
    (0x0000_082C, Some("az"), Some("cyrillic")),
    (0x0000_083B, Some("se"), Some("smi")),
    (0x0000_0843, Some("af"), Some("uz")),
    (0x0000_085D, Some("ca"), Some("ike")),
    (0x0000_0C0C, Some("ca"), Some("fr-legacy")),
    (0x0000_0C1A, Some("rs"), None),
    (0x0000_1009, Some("ca"), Some("fr-legacy")),
    (0x0001_1009, Some("ca"), Some("multix")),
    (0x0000_100C, Some("ch"), Some("fr")),
    (0x0000_141A, Some("ba"), None),
    (0x0000_1809, None, None),
    (0x0001_1809, Some("ie"), Some("CloGaelach")),
    (0x0000_201A, Some("ba"), Some("us")),
    (0x0001_0409, Some("us"), Some("dvorak")),
    (0x0003_0409, Some("us"), Some("dvorak-l")),
    (0x0004_0409, Some("us"), Some("dvorak-r")),
];

/// Keyboard type to xkb model; empty means the xkb default
const MODELS: [&str; 9] = [
    "",      // 0: unused
    "",      // 1: IBM PC/XT (83-key)
    "",      // 2: Olivetti "ICO" (102-key)
    "",      // 3: IBM PC/AT (84-key)
    "pc102", // 4: IBM enhanced (101/102-key)
    "",      // 5: Nokia 1050
    "",      // 6: Nokia 9140
    "jp106", // 7: Japanese
    "",      // 8: Korean
];

/// Rule names handed to xkbcommon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XkbNames {
    /// Rules file
    pub rules: String,
    /// Keyboard model
    pub model: String,
    /// Layout
    pub layout: String,
    /// Layout variant
    pub variant: String,
}

/// Look up a layout id in the layout table
///
/// Returns `None` for ids the table does not know and for known ids
/// without an xkb equivalent.
pub fn layout_for(layout: u32) -> Option<(&'static str, Option<&'static str>)> {
    LAYOUTS
        .iter()
        .find(|(id, _, _)| *id == layout)
        .and_then(|(_, name, variant)| name.map(|name| (name, *variant)))
}

/// Model string for a keyboard type
pub fn model_for_type(keyboard_type: u32) -> &'static str {
    MODELS
        .get(keyboard_type as usize)
        .copied()
        .unwrap_or_default()
}

/// Select xkb rule names for a client keyboard
pub fn resolve_names(info: &KeyboardInfo) -> XkbNames {
    let mut names = XkbNames {
        rules: "evdev".to_string(),
        model: model_for_type(info.keyboard_type).to_string(),
        ..Default::default()
    };

    match layout_for(info.layout) {
        Some((layout, variant)) => {
            names.layout = layout.to_string();
            names.variant = variant.unwrap_or_default().to_string();
        }
        None => warn!(
            "No xkb layout for keyboard layout 0x{:08X}, using defaults",
            info.layout
        ),
    }

    let language = info.layout & 0xFFFF;

    if info.keyboard_type == KBD_TYPE_KOREAN && language == LANG_KOREAN {
        match info.subtype {
            0 | 3 => names.variant = "kr104".to_string(),
            6 => names.variant = "kr106".to_string(),
            _ => {}
        }
    } else if language == LANG_JAPANESE && info.keyboard_type != KBD_TYPE_JAPANESE {
        names.layout = "us".to_string();
        names.variant.clear();
    }

    if info.layout == KBD_PORTUGUESE_BRAZILIAN_ABNT2 {
        names.model = "pc105".to_string();
    }

    debug!(
        "Keyboard 0x{:08X} type {} subtype {} -> model={:?} layout={:?} variant={:?}",
        info.layout, info.keyboard_type, info.subtype, names.model, names.layout, names.variant
    );
    names
}

/// Whether right Ctrl/Alt act as Hanja/Hangul on this keyboard
pub fn is_korean_103(info: &KeyboardInfo) -> bool {
    info.keyboard_type == KBD_TYPE_KOREAN && info.subtype == 6
}

/// Compile rule names into an xkb keymap in text v1 format
pub fn compile_keymap(names: &XkbNames) -> Result<String> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);

    let keymap = xkb::Keymap::new_from_names(
        &context,
        &names.rules,
        &names.model,
        &names.layout,
        &names.variant,
        None,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .ok_or_else(|| {
        InputError::XkbError(format!(
            "failed to compile keymap {}/{}/{}",
            names.model, names.layout, names.variant
        ))
    })?;

    let text = keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1);
    if text.is_empty() {
        return Err(InputError::XkbError("empty keymap".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(layout: u32, keyboard_type: u32, subtype: u32) -> KeyboardInfo {
        KeyboardInfo {
            layout,
            keyboard_type,
            subtype,
        }
    }

    #[test]
    fn test_table_size() {
        assert!(LAYOUTS.len() >= 120);
    }

    #[test]
    fn test_us_enhanced() {
        let names = resolve_names(&info(0x409, KBD_TYPE_IBM_ENHANCED, 0));
        assert_eq!(names.rules, "evdev");
        assert_eq!(names.model, "pc102");
        assert_eq!(names.layout, "us");
        assert_eq!(names.variant, "");
    }

    #[test]
    fn test_variant_lookup() {
        assert_eq!(layout_for(0x0001_0409), Some(("us", Some("dvorak"))));
        assert_eq!(layout_for(0x0000_0407), Some(("de", None)));
        assert_eq!(layout_for(0x0000_041C), None);
        assert_eq!(layout_for(0xDEAD_BEEF), None);
    }

    #[test]
    fn test_korean_overrides() {
        assert_eq!(resolve_names(&info(0x412, 8, 3)).variant, "kr104");
        assert_eq!(resolve_names(&info(0x412, 8, 0)).variant, "kr104");
        assert_eq!(resolve_names(&info(0x412, 8, 6)).variant, "kr106");
        assert_eq!(resolve_names(&info(0x412, 4, 6)).variant, "");
        assert!(is_korean_103(&info(0x412, 8, 6)));
    }

    #[test]
    fn test_japanese_fallback() {
        let names = resolve_names(&info(0x411, KBD_TYPE_IBM_ENHANCED, 0));
        assert_eq!(names.layout, "us");

        let names = resolve_names(&info(0x411, KBD_TYPE_JAPANESE, 0));
        assert_eq!(names.layout, "jp");
        assert_eq!(names.model, "jp106");
    }

    #[test]
    fn test_abnt2_model() {
        let names = resolve_names(&info(KBD_PORTUGUESE_BRAZILIAN_ABNT2, 4, 0));
        assert_eq!(names.model, "pc105");
        assert_eq!(names.layout, "br");
    }

    #[test]
    fn test_unknown_type_uses_default_model() {
        assert_eq!(model_for_type(42), "");
        assert_eq!(model_for_type(7), "jp106");
    }

    #[test]
    fn test_compile_keymap() {
        // Needs xkeyboard-config on the host
        let names = resolve_names(&info(0x409, 4, 0));
        match compile_keymap(&names) {
            Ok(text) => assert!(text.contains("xkb_keymap")),
            Err(e) => println!("Keymap compilation unavailable: {}", e),
        }
    }
}
