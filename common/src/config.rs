use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{chart::ChartStyle, figure::Figure};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    pub settings: Settings,
    pub figures: Vec<Box<dyn Figure>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the benchmark `*.json` output files.
    pub data_dir: PathBuf,
    /// Directory the rendered images are written into.
    pub figure_dir: PathBuf,
    #[serde(default)]
    pub style: Option<StyleOverrides>,
}

/// Partial chart-style override from the config file; unset fields keep the
/// current global style.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleOverrides {
    pub font_family: Option<String>,
    pub title_font_size: Option<u32>,
    pub label_font_size: Option<u32>,
    pub legend_font_size: Option<u32>,
    pub canvas_size: Option<(u32, u32)>,
}

impl StyleOverrides {
    pub fn apply(&self, mut base: ChartStyle) -> ChartStyle {
        if let Some(font_family) = &self.font_family {
            base.font_family = font_family.clone();
        }
        if let Some(size) = self.title_font_size {
            base.title_font_size = size;
        }
        if let Some(size) = self.label_font_size {
            base.label_font_size = size;
        }
        if let Some(size) = self.legend_font_size {
            base.legend_font_size = size;
        }
        if let Some(canvas) = self.canvas_size {
            base.canvas_size = canvas;
        }
        base
    }
}
