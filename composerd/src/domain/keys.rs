//! Key codes and modifier masks
//!
//! The engine speaks X11 keysyms with an X11-style modifier mask, so these
//! values are fixed by the engine ABI rather than chosen here.

use bitflags::bitflags;

bitflags! {
    /// Modifier mask passed alongside a keysym
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct KeyModifiers: u32 {
        const SHIFT = 1 << 0;
        const LOCK = 1 << 1;
        const CONTROL = 1 << 2;
        const ALT = 1 << 3;
        const SUPER = 1 << 26;
        const HYPER = 1 << 27;
        const META = 1 << 28;
        /// Key release rather than key press
        const RELEASE = 1 << 30;
    }
}

pub const BACKSPACE: i32 = 0xff08;
pub const TAB: i32 = 0xff09;
pub const RETURN: i32 = 0xff0d;
pub const ESCAPE: i32 = 0xff1b;
pub const HOME: i32 = 0xff50;
pub const LEFT: i32 = 0xff51;
pub const UP: i32 = 0xff52;
pub const RIGHT: i32 = 0xff53;
pub const DOWN: i32 = 0xff54;
pub const PAGE_UP: i32 = 0xff55;
pub const PAGE_DOWN: i32 = 0xff56;
pub const END: i32 = 0xff57;
pub const SHIFT_L: i32 = 0xffe1;
pub const SHIFT_R: i32 = 0xffe2;
pub const DELETE: i32 = 0xffff;
pub const SPACE: i32 = 0x20;
pub const BRACE_LEFT: i32 = 0x7b;
pub const BRACE_RIGHT: i32 = 0x7d;

/// Resolve a keysym name as used in `{name}` key sequence escapes
pub fn keysym_from_name(name: &str) -> Option<i32> {
    let code = match name {
        "BackSpace" => BACKSPACE,
        "Tab" => TAB,
        "Return" => RETURN,
        "Escape" => ESCAPE,
        "Home" => HOME,
        "Left" => LEFT,
        "Up" => UP,
        "Right" => RIGHT,
        "Down" => DOWN,
        "Page_Up" => PAGE_UP,
        "Page_Down" => PAGE_DOWN,
        "End" => END,
        "Shift_L" => SHIFT_L,
        "Shift_R" => SHIFT_R,
        "Delete" => DELETE,
        "space" => SPACE,
        "braceleft" => BRACE_LEFT,
        "braceright" => BRACE_RIGHT,
        _ => return None,
    };
    Some(code)
}

/// Printable ASCII characters map onto their own keysym
pub fn keysym_from_char(c: char) -> Option<i32> {
    if c.is_ascii_graphic() || c == ' ' {
        Some(c as i32)
    } else {
        None
    }
}

/// Parse a key sequence such as `"nihao{space}"` into keysyms
///
/// Returns `None` if any character or `{name}` escape is unknown.
pub fn parse_sequence(sequence: &str) -> Option<Vec<i32>> {
    let mut codes = Vec::new();
    let mut chars = sequence.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
            codes.push(keysym_from_name(&name)?);
        } else {
            codes.push(keysym_from_char(c)?);
        }
    }
    Some(codes)
}

/// Check whether a keysym is a printable ASCII character
pub fn is_printable(code: i32) -> bool {
    (0x20..0x7f).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keysym_from_name() {
        assert_eq!(keysym_from_name("BackSpace"), Some(0xff08));
        assert_eq!(keysym_from_name("space"), Some(0x20));
        assert_eq!(keysym_from_name("braceleft"), Some(0x7b));
        assert_eq!(keysym_from_name("NoSuchKey"), None);
    }

    #[test]
    fn test_keysym_from_char() {
        assert_eq!(keysym_from_char('a'), Some(0x61));
        assert_eq!(keysym_from_char(' '), Some(SPACE));
        assert_eq!(keysym_from_char('你'), None);
        assert_eq!(keysym_from_char('\n'), None);
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("ni{space}"), Some(vec![0x6e, 0x69, SPACE]));
        assert_eq!(
            parse_sequence("{braceleft}{braceright}"),
            Some(vec![BRACE_LEFT, BRACE_RIGHT])
        );
        assert_eq!(parse_sequence("a{}"), None);
        assert_eq!(parse_sequence("a{Nope}"), None);
        assert_eq!(parse_sequence(""), Some(vec![]));
    }

    #[test]
    fn test_modifier_bits() {
        let mods = KeyModifiers::SHIFT | KeyModifiers::CONTROL;
        assert_eq!(mods.bits(), 0b101);
        assert!(KeyModifiers::from_bits_truncate(1 << 30).contains(KeyModifiers::RELEASE));
    }
}
