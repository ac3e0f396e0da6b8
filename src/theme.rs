use ratatui::style::Color;

// Muted terminal palette
pub const NEON_GREEN: Color = Color::Rgb(0, 160, 50);
pub const NEON_CYAN: Color = Color::Rgb(0, 150, 160);
pub const NEON_MAGENTA: Color = Color::Rgb(160, 60, 160);
pub const NEON_YELLOW: Color = Color::Rgb(180, 160, 60);
pub const NEON_RED: Color = Color::Rgb(180, 60, 60);
pub const DARK_BG: Color = Color::Rgb(15, 15, 25);
pub const MATRIX_GREEN: Color = Color::Rgb(30, 130, 30);
pub const CYBER_BLUE: Color = Color::Rgb(60, 130, 180);
pub const GAUGE_BG: Color = Color::Rgb(20, 20, 30);

// One colour per plotted line
pub const UTIL_LINE: Color = NEON_GREEN;
pub const GPU_MEM_LINE: Color = NEON_MAGENTA;
pub const RSS_LINE: Color = CYBER_BLUE;
pub const VSZ_LINE: Color = NEON_YELLOW;

/// Colour for a percentage, hotter as it climbs.
pub fn load_color(percent: f64) -> Color {
    if percent > 90.0 {
        NEON_RED
    } else if percent > 50.0 {
        NEON_YELLOW
    } else {
        NEON_GREEN
    }
}
