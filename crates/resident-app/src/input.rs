//! Interactive key map

/// Commands available from the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    DumpWidgetTree,
    DumpRenderTree,
    DumpLayerTree,
    DumpSemanticsTree,
    ToggleDebugPaint,
    TogglePerformanceOverlay,
    Screenshot,
    TogglePlatform,
    Quit,
    Detach,
    HotReload,
    HotRestart,
}

/// Commands available in every mode. `L` and `S` are case-sensitive.
pub fn common_command(key: char) -> Option<Command> {
    let command = match key {
        'h' | 'H' | '?' => Command::Help,
        'w' | 'W' => Command::DumpWidgetTree,
        't' | 'T' => Command::DumpRenderTree,
        'L' => Command::DumpLayerTree,
        'S' => Command::DumpSemanticsTree,
        'p' => Command::ToggleDebugPaint,
        'P' => Command::TogglePerformanceOverlay,
        's' => Command::Screenshot,
        'o' | 'O' => Command::TogglePlatform,
        'q' | 'Q' => Command::Quit,
        'd' | 'D' => Command::Detach,
        _ => return None,
    };
    Some(command)
}

/// Hot mode additions.
pub fn hot_command(key: char) -> Option<Command> {
    match key {
        'r' => Some(Command::HotReload),
        'R' => Some(Command::HotRestart),
        _ => None,
    }
}

/// Resolve a keystroke; unknown keys map to `None` and are ignored.
pub fn map_key(key: char, hot: bool) -> Option<Command> {
    common_command(key).or_else(|| if hot { hot_command(key) } else { None })
}

pub fn help_text(hot: bool) -> Vec<&'static str> {
    let mut lines = Vec::new();
    if hot {
        lines.push("r Hot reload.");
        lines.push("R Hot restart.");
    }
    lines.extend([
        "h Repeat this help message.",
        "d Detach (terminate \"resident\" but leave application running).",
        "q Quit (terminate the application on the device).",
        "s Save a screenshot to the project directory.",
        "w Dump widget hierarchy to the console.",
        "t Dump rendering tree to the console.",
        "L Dump layer tree to the console.",
        "S Dump accessibility tree in traversal order.",
        "p Toggle the display of construction lines.",
        "P Toggle performance overlay.",
        "o Simulate different operating systems.",
    ]);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_keys() {
        assert_eq!(map_key('w', false), Some(Command::DumpWidgetTree));
        assert_eq!(map_key('W', false), Some(Command::DumpWidgetTree));
        assert_eq!(map_key('?', false), Some(Command::Help));
        assert_eq!(map_key('Q', false), Some(Command::Quit));
    }

    #[test]
    fn test_case_sensitive_keys() {
        assert_eq!(map_key('L', false), Some(Command::DumpLayerTree));
        assert_eq!(map_key('l', false), None);
        assert_eq!(map_key('S', false), Some(Command::DumpSemanticsTree));
        assert_eq!(map_key('s', false), Some(Command::Screenshot));
        assert_eq!(map_key('p', false), Some(Command::ToggleDebugPaint));
        assert_eq!(map_key('P', false), Some(Command::TogglePerformanceOverlay));
    }

    #[test]
    fn test_reload_keys_only_in_hot_mode() {
        assert_eq!(map_key('r', true), Some(Command::HotReload));
        assert_eq!(map_key('R', true), Some(Command::HotRestart));
        assert_eq!(map_key('r', false), None);
        assert_eq!(map_key('R', false), None);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        assert_eq!(map_key('x', true), None);
        assert_eq!(map_key(' ', true), None);
    }

    #[test]
    fn test_help_mentions_reload_in_hot_mode() {
        assert!(help_text(true).iter().any(|l| l.starts_with("r ")));
        assert!(!help_text(false).iter().any(|l| l.starts_with("r ")));
    }
}
