//! Editor settings that influence which cells are loaded and how they are drawn.

use serde::{Deserialize, Serialize};

use super::bounds::Aabb;

/// Attribute used to colour points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSource {
    Color,
    Intensity,
    ReturnNumber,
    NumberOfReturns,
    Classification,
}

impl ColorSource {
    pub const ALL: [ColorSource; 5] = [
        ColorSource::Color,
        ColorSource::Intensity,
        ColorSource::ReturnNumber,
        ColorSource::NumberOfReturns,
        ColorSource::Classification,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ColorSource::Color => "Color",
            ColorSource::Intensity => "Intensity",
            ColorSource::ReturnNumber => "Return Number",
            ColorSource::NumberOfReturns => "Number of Returns",
            ColorSource::Classification => "Classification",
        }
    }
}

/// Viewer appearance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSettings {
    pub point_size: f32,
    pub fog_enabled: bool,
    pub point_color: [f32; 3],
    pub background: [f32; 3],
    /// Enabled flag per entry of [`ColorSource::ALL`]
    pub color_sources: [bool; 5],
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            point_size: 1.0,
            fog_enabled: false,
            point_color: [1.0, 1.0, 1.0],
            background: [0.2, 0.2, 0.2],
            color_sources: [true, false, false, false, false],
        }
    }
}

impl ViewSettings {
    /// Stored as given; the renderer decides how to draw sizes below one
    pub fn set_point_size(&mut self, size: f32) {
        self.point_size = size;
    }

    pub fn is_color_source_enabled(&self, source: ColorSource) -> bool {
        self.color_sources[Self::slot(source)]
    }

    pub fn set_color_source_enabled(&mut self, source: ColorSource, enabled: bool) {
        self.color_sources[Self::slot(source)] = enabled;
    }

    fn slot(source: ColorSource) -> usize {
        ColorSource::ALL.iter().position(|s| *s == source).unwrap_or(0)
    }
}

/// Spatial clip filter; only cells intersecting the box are loaded while enabled
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClipFilter {
    pub enabled: bool,
    pub bounds: Aabb,
}

impl ClipFilter {
    pub fn new(bounds: Aabb) -> Self {
        Self { enabled: true, bounds }
    }

    /// Whether a cell with the given bounds passes the filter
    pub fn accepts(&self, bounds: &Aabb) -> bool {
        !self.enabled || self.bounds.intersects(bounds)
    }
}

/// Number of ASPRS classification codes
pub const CLASS_COUNT: usize = 256;

/// Per-class point filter
///
/// Classes 2 to 15 (ground through transmission towers) are shown by
/// default; never-classified, unassigned and the reserved and user ranges
/// are hidden. `all` mirrors the "All" toggle of the class list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSettings {
    enabled: Vec<bool>,
    all: bool,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        let enabled = (0..CLASS_COUNT).map(|class| (2..16).contains(&class)).collect();
        Self { enabled, all: true }
    }
}

impl ClassificationSettings {
    pub fn is_enabled(&self, class: u8) -> bool {
        self.enabled.get(class as usize).copied().unwrap_or(false)
    }

    pub fn set_enabled(&mut self, class: u8, enabled: bool) {
        if let Some(slot) = self.enabled.get_mut(class as usize) {
            *slot = enabled;
        }
    }

    /// Turn every class and the "All" toggle on or off
    pub fn set_all_enabled(&mut self, enabled: bool) {
        self.enabled.iter_mut().for_each(|slot| *slot = enabled);
        self.all = enabled;
    }

    pub fn all_enabled(&self) -> bool {
        self.all
    }

    /// Enabled class codes in ascending order
    pub fn enabled_classes(&self) -> impl Iterator<Item = u8> + '_ {
        self.enabled.iter().enumerate().filter(|(_, on)| **on).map(|(class, _)| class as u8)
    }

    /// Whether a point with this classification is drawn
    pub fn accepts(&self, class: u8) -> bool {
        self.is_enabled(class)
    }

    pub fn label(class: u8) -> &'static str {
        match class {
            0 => "Never classified",
            1 => "Unassigned",
            2 => "Ground",
            3 => "Low Vegetation",
            4 => "Medium Vegetation",
            5 => "High Vegetation",
            6 => "Building",
            7 => "Low Point (Noise)",
            9 => "Water",
            10 => "Rail",
            11 => "Road Surface",
            13 => "Wire - Guard",
            14 => "Wire - Conductor",
            15 => "Transmission Tower",
            16 => "Wire - Insulator",
            17 => "Bridge Deck",
            18 => "High Noise",
            19 => "Overhead Structure",
            20 => "Ignored Ground",
            21 => "Snow",
            22 => "Temporal Exclusion",
            64..=255 => "User",
            _ => "Reserved",
        }
    }
}

/// Shared, session-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorSettings {
    pub view: ViewSettings,
    pub clip_filter: ClipFilter,
    pub classification: ClassificationSettings,
}
