//! Series colour palette.

/// Colours assigned to series in creation order.
pub const COLOR_PALETTE: [&str; 6] = [
    "#667eea", "#38a169", "#f6ad55", "#ed64a6", "#4299e1", "#805ad5",
];

/// Colour for the series created `index`-th (zero-based), cycling the palette.
pub fn palette_color(index: usize) -> &'static str {
    COLOR_PALETTE[index % COLOR_PALETTE.len()]
}
