//! JavaScript key code → Windows virtual-key translation.
//!
//! Letters A–Z and digits 0–9 share values between the two
//! conventions and pass through numerically; everything else is an
//! explicit mapping covering F-keys, arrows, modifiers, numpad, media
//! keys and OEM punctuation. Unknown codes map to `None` and are
//! dropped by the injector.

// Virtual-key values per the Win32 convention.
pub const VK_BACK: u16 = 0x08;
pub const VK_TAB: u16 = 0x09;
pub const VK_RETURN: u16 = 0x0D;
pub const VK_SHIFT: u16 = 0x10;
pub const VK_CONTROL: u16 = 0x11;
pub const VK_MENU: u16 = 0x12;
pub const VK_PAUSE: u16 = 0x13;
pub const VK_CAPITAL: u16 = 0x14;
pub const VK_ESCAPE: u16 = 0x1B;
pub const VK_SPACE: u16 = 0x20;
pub const VK_PRIOR: u16 = 0x21;
pub const VK_NEXT: u16 = 0x22;
pub const VK_END: u16 = 0x23;
pub const VK_HOME: u16 = 0x24;
pub const VK_LEFT: u16 = 0x25;
pub const VK_UP: u16 = 0x26;
pub const VK_RIGHT: u16 = 0x27;
pub const VK_DOWN: u16 = 0x28;
pub const VK_SNAPSHOT: u16 = 0x2C;
pub const VK_INSERT: u16 = 0x2D;
pub const VK_DELETE: u16 = 0x2E;
pub const VK_LWIN: u16 = 0x5B;
pub const VK_RWIN: u16 = 0x5C;
pub const VK_APPS: u16 = 0x5D;
pub const VK_NUMPAD0: u16 = 0x60;
pub const VK_MULTIPLY: u16 = 0x6A;
pub const VK_ADD: u16 = 0x6B;
pub const VK_SUBTRACT: u16 = 0x6D;
pub const VK_DECIMAL: u16 = 0x6E;
pub const VK_DIVIDE: u16 = 0x6F;
pub const VK_F1: u16 = 0x70;
pub const VK_NUMLOCK: u16 = 0x90;
pub const VK_SCROLL: u16 = 0x91;
pub const VK_VOLUME_MUTE: u16 = 0xAD;
pub const VK_VOLUME_DOWN: u16 = 0xAE;
pub const VK_VOLUME_UP: u16 = 0xAF;
pub const VK_MEDIA_NEXT_TRACK: u16 = 0xB0;
pub const VK_MEDIA_PREV_TRACK: u16 = 0xB1;
pub const VK_MEDIA_STOP: u16 = 0xB2;
pub const VK_MEDIA_PLAY_PAUSE: u16 = 0xB3;
pub const VK_OEM_1: u16 = 0xBA;
pub const VK_OEM_PLUS: u16 = 0xBB;
pub const VK_OEM_COMMA: u16 = 0xBC;
pub const VK_OEM_MINUS: u16 = 0xBD;
pub const VK_OEM_PERIOD: u16 = 0xBE;
pub const VK_OEM_2: u16 = 0xBF;
pub const VK_OEM_3: u16 = 0xC0;
pub const VK_OEM_4: u16 = 0xDB;
pub const VK_OEM_5: u16 = 0xDC;
pub const VK_OEM_6: u16 = 0xDD;
pub const VK_OEM_7: u16 = 0xDE;

/// Translate a JavaScript `keyCode` to a virtual key. `None` for
/// codes the host has no mapping for.
pub fn js_key_to_vk(code: u16) -> Option<u16> {
    if (65..=90).contains(&code) || (48..=57).contains(&code) {
        return Some(code);
    }
    let vk = match code {
        8 => VK_BACK,
        9 => VK_TAB,
        13 => VK_RETURN,
        16 => VK_SHIFT,
        17 => VK_CONTROL,
        18 => VK_MENU,
        19 => VK_PAUSE,
        20 => VK_CAPITAL,
        27 => VK_ESCAPE,
        32 => VK_SPACE,
        33 => VK_PRIOR,
        34 => VK_NEXT,
        35 => VK_END,
        36 => VK_HOME,
        37 => VK_LEFT,
        38 => VK_UP,
        39 => VK_RIGHT,
        40 => VK_DOWN,
        44 => VK_SNAPSHOT,
        45 => VK_INSERT,
        46 => VK_DELETE,
        91 => VK_LWIN,
        92 => VK_RWIN,
        // Numpad digits are contiguous in both conventions.
        96..=105 => VK_NUMPAD0 + (code - 96),
        106 => VK_MULTIPLY,
        107 => VK_ADD,
        109 => VK_SUBTRACT,
        110 => VK_DECIMAL,
        111 => VK_DIVIDE,
        // F1..F12.
        112..=123 => VK_F1 + (code - 112),
        144 => VK_NUMLOCK,
        145 => VK_SCROLL,
        173 => VK_VOLUME_MUTE,
        174 => VK_VOLUME_DOWN,
        175 => VK_VOLUME_UP,
        176 => VK_MEDIA_NEXT_TRACK,
        177 => VK_MEDIA_PREV_TRACK,
        178 => VK_MEDIA_STOP,
        179 => VK_MEDIA_PLAY_PAUSE,
        186 => VK_OEM_1,
        187 => VK_OEM_PLUS,
        188 => VK_OEM_COMMA,
        189 => VK_OEM_MINUS,
        190 => VK_OEM_PERIOD,
        191 => VK_OEM_2,
        192 => VK_OEM_3,
        219 => VK_OEM_4,
        220 => VK_OEM_5,
        221 => VK_OEM_6,
        222 => VK_OEM_7,
        _ => return None,
    };
    Some(vk)
}

/// Keys that need the extended-key flag when injected: editing and
/// arrow cluster, meta keys, numpad divide and num lock, plus the
/// right-hand modifiers when distinguished by scan code.
pub fn is_extended_key(vk: u16) -> bool {
    matches!(
        vk,
        VK_INSERT
            | VK_DELETE
            | VK_HOME
            | VK_END
            | VK_PRIOR
            | VK_NEXT
            | VK_LEFT
            | VK_RIGHT
            | VK_UP
            | VK_DOWN
            | VK_LWIN
            | VK_RWIN
            | VK_APPS
            | VK_DIVIDE
            | VK_NUMLOCK
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits_pass_through() {
        assert_eq!(js_key_to_vk(65), Some(65)); // A
        assert_eq!(js_key_to_vk(90), Some(90)); // Z
        assert_eq!(js_key_to_vk(48), Some(48)); // 0
        assert_eq!(js_key_to_vk(57), Some(57)); // 9
    }

    #[test]
    fn function_keys_and_numpad_are_contiguous() {
        assert_eq!(js_key_to_vk(112), Some(VK_F1));
        assert_eq!(js_key_to_vk(123), Some(VK_F1 + 11)); // F12
        assert_eq!(js_key_to_vk(96), Some(VK_NUMPAD0));
        assert_eq!(js_key_to_vk(105), Some(VK_NUMPAD0 + 9));
    }

    #[test]
    fn named_keys_translate() {
        assert_eq!(js_key_to_vk(13), Some(VK_RETURN));
        assert_eq!(js_key_to_vk(27), Some(VK_ESCAPE));
        assert_eq!(js_key_to_vk(37), Some(VK_LEFT));
        assert_eq!(js_key_to_vk(179), Some(VK_MEDIA_PLAY_PAUSE));
        assert_eq!(js_key_to_vk(222), Some(VK_OEM_7));
    }

    #[test]
    fn unknown_codes_are_none() {
        assert_eq!(js_key_to_vk(7), None);
        assert_eq!(js_key_to_vk(255), None);
        assert_eq!(js_key_to_vk(108), None); // gap in the numpad block
    }

    #[test]
    fn extended_key_set() {
        assert!(is_extended_key(VK_INSERT));
        assert!(is_extended_key(VK_LEFT));
        assert!(is_extended_key(VK_DIVIDE));
        assert!(is_extended_key(VK_NUMLOCK));
        assert!(!is_extended_key(VK_RETURN));
        assert!(!is_extended_key(65));
    }
}
